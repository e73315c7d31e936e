//! Gasteiger–Marsili partial equalisation of orbital electronegativity.

use crate::element::Element;
use crate::error::{MoleculeError, Result};
use crate::molecule::Hybridization;

const ITERATIONS: usize = 6;
const DAMPING: f64 = 0.5;
/// Electronegativity of the hydrogen cation used as the divisor for H donors.
const HYDROGEN_CATION_CHI: f64 = 20.02;

/// `chi(q) = a + b*q + c*q^2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasteigerParams {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl GasteigerParams {
    const fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c }
    }

    pub fn chi(&self, q: f64) -> f64 {
        self.a + self.b * q + self.c * q * q
    }

    /// Electronegativity of the singly charged cation.
    pub fn chi_cation(&self) -> f64 {
        self.a + self.b + self.c
    }
}

pub fn parameters(element: Element, hybridization: Hybridization) -> Option<GasteigerParams> {
    use Hybridization::*;
    let params = match (element, hybridization) {
        (Element::H, _) => GasteigerParams::new(7.17, 6.24, -0.56),
        (Element::C, Sp3 | S) => GasteigerParams::new(7.98, 9.18, 1.88),
        (Element::C, Sp2) => GasteigerParams::new(8.79, 9.32, 1.51),
        (Element::C, Sp) => GasteigerParams::new(10.39, 9.45, 0.73),
        (Element::N, Sp3 | S) => GasteigerParams::new(11.54, 10.82, 1.36),
        (Element::N, Sp2) => GasteigerParams::new(12.87, 11.15, 0.85),
        (Element::N, Sp) => GasteigerParams::new(15.68, 11.70, -0.27),
        (Element::O, Sp3 | S) => GasteigerParams::new(14.18, 12.92, 1.39),
        (Element::O, Sp2 | Sp) => GasteigerParams::new(17.07, 13.79, 0.47),
        (Element::F, _) => GasteigerParams::new(14.66, 13.85, 2.31),
        (Element::Cl, _) => GasteigerParams::new(11.00, 9.69, 1.35),
        (Element::Br, _) => GasteigerParams::new(10.08, 8.47, 1.16),
        (Element::I, _) => GasteigerParams::new(9.90, 7.96, 0.96),
        (Element::S, _) => GasteigerParams::new(10.14, 9.13, 1.38),
        (Element::P, _) => GasteigerParams::new(8.90, 8.24, 0.96),
        _ => return None,
    };
    Some(params)
}

/// Compute partial charges for a bonded system.
///
/// `formal` seeds the charges and fixes their sum. Atoms without bonds keep
/// their formal charge and need no parameters; a bonded atom without
/// parameters is an error.
pub fn gasteiger_charges(
    elements: &[Element],
    hybridization: &[Hybridization],
    formal: &[f64],
    bonds: &[(usize, usize)],
) -> Result<Vec<f64>> {
    let n = elements.len();
    let mut bonded = vec![false; n];
    for &(a, b) in bonds {
        bonded[a] = true;
        bonded[b] = true;
    }

    let mut params = Vec::with_capacity(n);
    for i in 0..n {
        let p = parameters(elements[i], hybridization[i]);
        if p.is_none() && bonded[i] {
            return Err(MoleculeError::Charges(format!(
                "no Gasteiger parameters for bonded {} atom {i}",
                elements[i]
            )));
        }
        params.push(p);
    }

    let mut charges = formal.to_vec();
    let mut damping = 1.0;
    for _ in 0..ITERATIONS {
        damping *= DAMPING;
        let chi: Vec<f64> = params
            .iter()
            .zip(&charges)
            .map(|(p, q)| p.map(|p| p.chi(*q)).unwrap_or(0.0))
            .collect();

        let mut delta = vec![0.0; n];
        for &(a, b) in bonds {
            let (Some(pa), Some(pb)) = (params[a], params[b]) else { continue };
            // Electrons flow towards the more electronegative atom.
            let (donor, acceptor, p_donor) = if chi[a] < chi[b] { (a, b, pa) } else { (b, a, pb) };
            let divisor = if elements[donor] == Element::H {
                HYDROGEN_CATION_CHI
            } else {
                p_donor.chi_cation()
            };
            let dq = (chi[acceptor] - chi[donor]) / divisor * damping;
            delta[donor] += dq;
            delta[acceptor] -= dq;
        }
        for (q, d) in charges.iter_mut().zip(delta) {
            *q += d;
        }
    }

    if charges.iter().any(|q| !q.is_finite()) {
        return Err(MoleculeError::Charges("charges diverged".to_string()));
    }
    Ok(charges)
}

/// Assign Gasteiger charges to every atom of a small molecule in place.
pub fn assign_molecule_charges(molecule: &mut crate::molecule::Molecule) -> Result<()> {
    let adj = molecule.adjacency();
    let elements: Vec<Element> = molecule.atoms.iter().map(|a| a.element).collect();
    let hybridization: Vec<Hybridization> =
        (0..molecule.atoms.len()).map(|i| molecule.hybridization(i, &adj)).collect();
    let formal: Vec<f64> = molecule.atoms.iter().map(|a| f64::from(a.formal_charge)).collect();
    let bonds: Vec<(usize, usize)> = molecule.bonds.iter().map(|b| (b.a, b.b)).collect();

    let charges = gasteiger_charges(&elements, &hybridization, &formal, &bonds)?;
    for (atom, q) in molecule.atoms.iter_mut().zip(charges) {
        atom.partial_charge = q;
    }
    Ok(())
}
