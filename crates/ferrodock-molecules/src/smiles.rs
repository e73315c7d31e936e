//! SMILES reader.
//!
//! Supports the organic subset, aromatic atoms, bracket atoms (isotope,
//! chirality, hydrogen count, charge, atom class), branches, ring closures
//! including `%nn`, and `.`-separated fragments. Stereo markers are accepted
//! and ignored; coordinates come from embedding.

use crate::element::Element;
use crate::error::{MoleculeError, Result};
use crate::molecule::{Atom, BondOrder, Molecule};
use std::collections::HashMap;

/// Parse `input` into a molecule with implicit hydrogen counts filled in.
pub fn parse_smiles(input: &str) -> Result<Molecule> {
    let trimmed = input.trim();
    // Anything after whitespace is a title.
    let smiles = trimmed.split_whitespace().next().unwrap_or("");
    if smiles.is_empty() {
        return Err(invalid(input, "empty input"));
    }

    let mut parser = Parser {
        input,
        chars: smiles.chars().collect(),
        pos: 0,
        molecule: Molecule::default(),
        bracket: Vec::new(),
        prev: None,
        pending_bond: None,
        branches: Vec::new(),
        rings: HashMap::new(),
    };
    parser.run()?;
    let mut molecule = parser.molecule;
    assign_implicit_hydrogens(&mut molecule, &parser.bracket);
    Ok(molecule)
}

fn invalid(input: &str, reason: impl Into<String>) -> MoleculeError {
    MoleculeError::InvalidSmiles {
        input: input.to_string(),
        reason: reason.into(),
    }
}

/// Explicit bond symbol; `None` in the slot means "default".
#[derive(Debug, Clone, Copy, PartialEq)]
enum BondSymbol {
    Order(BondOrder),
    /// `/` or `\`: single bond with stereo intent.
    Directional,
}

struct RingOpening {
    atom: usize,
    bond: Option<BondSymbol>,
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
    molecule: Molecule,
    /// Whether each atom was written in brackets (fixed hydrogen count).
    bracket: Vec<bool>,
    prev: Option<usize>,
    pending_bond: Option<BondSymbol>,
    branches: Vec<Option<usize>>,
    rings: HashMap<u32, RingOpening>,
}

impl Parser<'_> {
    fn err(&self, reason: impl Into<String>) -> MoleculeError {
        invalid(self.input, format!("{} at position {}", reason.into(), self.pos))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn run(&mut self) -> Result<()> {
        while let Some(c) = self.peek() {
            match c {
                '(' => {
                    if self.prev.is_none() {
                        return Err(self.err("branch without a preceding atom"));
                    }
                    self.branches.push(self.prev);
                    self.pos += 1;
                }
                ')' => {
                    if self.pending_bond.is_some() {
                        return Err(self.err("bond symbol before ')'"));
                    }
                    self.prev = self
                        .branches
                        .pop()
                        .ok_or_else(|| self.err("unbalanced ')'"))?;
                    self.pos += 1;
                }
                '-' | '=' | '#' | ':' | '/' | '\\' => {
                    if self.pending_bond.is_some() {
                        return Err(self.err("consecutive bond symbols"));
                    }
                    if self.prev.is_none() {
                        return Err(self.err("bond symbol without a preceding atom"));
                    }
                    self.pending_bond = Some(match c {
                        '-' => BondSymbol::Order(BondOrder::Single),
                        '=' => BondSymbol::Order(BondOrder::Double),
                        '#' => BondSymbol::Order(BondOrder::Triple),
                        ':' => BondSymbol::Order(BondOrder::Aromatic),
                        _ => BondSymbol::Directional,
                    });
                    self.pos += 1;
                }
                '.' => {
                    if self.pending_bond.is_some() {
                        return Err(self.err("bond symbol before '.'"));
                    }
                    self.prev = None;
                    self.pos += 1;
                }
                '%' => {
                    let digits: String = self.chars.iter().skip(self.pos + 1).take(2).collect();
                    if digits.len() != 2 || !digits.chars().all(|d| d.is_ascii_digit()) {
                        return Err(self.err("'%' must be followed by two digits"));
                    }
                    let number = digits.parse::<u32>().map_err(|_| self.err("bad ring number"))?;
                    self.pos += 3;
                    self.ring_closure(number)?;
                }
                '0'..='9' => {
                    self.pos += 1;
                    self.ring_closure(c.to_digit(10).unwrap_or(0))?;
                }
                '[' => {
                    let atom = self.bracket_atom()?;
                    self.attach(atom, true)?;
                }
                _ => {
                    let atom = self.organic_atom()?;
                    self.attach(atom, false)?;
                }
            }
        }

        if self.pending_bond.is_some() {
            return Err(self.err("dangling bond at end of input"));
        }
        if !self.branches.is_empty() {
            return Err(self.err("unbalanced '('"));
        }
        if let Some(ring) = self.rings.keys().min() {
            return Err(self.err(format!("unclosed ring {ring}")));
        }
        if self.molecule.atoms.is_empty() {
            return Err(self.err("no atoms"));
        }
        Ok(())
    }

    fn resolve_order(&self, symbol: Option<BondSymbol>, a: usize, b: usize) -> BondOrder {
        match symbol {
            Some(BondSymbol::Order(order)) => order,
            Some(BondSymbol::Directional) => BondOrder::Single,
            None if self.molecule.atoms[a].aromatic && self.molecule.atoms[b].aromatic => BondOrder::Aromatic,
            None => BondOrder::Single,
        }
    }

    fn attach(&mut self, atom: Atom, bracketed: bool) -> Result<()> {
        let index = self.molecule.add_atom(atom);
        self.bracket.push(bracketed);
        if let Some(prev) = self.prev {
            let symbol = self.pending_bond.take();
            let order = self.resolve_order(symbol, prev, index);
            self.molecule.add_bond(prev, index, order);
        } else if self.pending_bond.is_some() {
            return Err(self.err("bond symbol without a preceding atom"));
        }
        self.prev = Some(index);
        Ok(())
    }

    fn ring_closure(&mut self, number: u32) -> Result<()> {
        let current = self.prev.ok_or_else(|| self.err("ring closure without an atom"))?;
        let symbol = self.pending_bond.take();

        match self.rings.remove(&number) {
            None => {
                self.rings.insert(number, RingOpening { atom: current, bond: symbol });
            }
            Some(opening) => {
                if opening.atom == current {
                    return Err(self.err(format!("ring {number} closes on its own atom")));
                }
                if self.molecule.bond_between(opening.atom, current).is_some() {
                    return Err(self.err(format!("ring {number} duplicates an existing bond")));
                }
                let symbol = match (opening.bond, symbol) {
                    (Some(a), Some(b)) if a != b => {
                        return Err(self.err(format!("conflicting bond orders on ring {number}")))
                    }
                    (a, b) => a.or(b),
                };
                let order = self.resolve_order(symbol, opening.atom, current);
                self.molecule.add_bond(opening.atom, current, order);
            }
        }
        Ok(())
    }

    fn organic_atom(&mut self) -> Result<Atom> {
        let c = self.peek().ok_or_else(|| self.err("unexpected end of input"))?;
        let next = self.chars.get(self.pos + 1).copied();

        let (element, aromatic, width) = match (c, next) {
            ('C', Some('l')) => (Element::Cl, false, 2),
            ('B', Some('r')) => (Element::Br, false, 2),
            ('B', _) => (Element::B, false, 1),
            ('C', _) => (Element::C, false, 1),
            ('N', _) => (Element::N, false, 1),
            ('O', _) => (Element::O, false, 1),
            ('P', _) => (Element::P, false, 1),
            ('S', _) => (Element::S, false, 1),
            ('F', _) => (Element::F, false, 1),
            ('I', _) => (Element::I, false, 1),
            ('b', _) => (Element::B, true, 1),
            ('c', _) => (Element::C, true, 1),
            ('n', _) => (Element::N, true, 1),
            ('o', _) => (Element::O, true, 1),
            ('p', _) => (Element::P, true, 1),
            ('s', _) => (Element::S, true, 1),
            _ => return Err(self.err(format!("unexpected character '{c}'"))),
        };
        self.pos += width;

        let mut atom = Atom::new(element);
        atom.aromatic = aromatic;
        Ok(atom)
    }

    fn read_number(&mut self) -> Option<u32> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        self.chars[start..self.pos].iter().collect::<String>().parse().ok()
    }

    fn bracket_atom(&mut self) -> Result<Atom> {
        self.pos += 1; // '['
        let _isotope = self.read_number();

        let first = self.peek().ok_or_else(|| self.err("unterminated bracket atom"))?;
        let second = self.chars.get(self.pos + 1).copied();
        let (element, aromatic, width) = if first.is_ascii_lowercase() {
            match (first, second) {
                ('s', Some('e')) => (Element::Se, true, 2),
                _ => {
                    let element = Element::from_symbol(&first.to_string())
                        .filter(|e| matches!(e, Element::B | Element::C | Element::N | Element::O | Element::P | Element::S))
                        .ok_or_else(|| self.err(format!("unknown aromatic symbol '{first}'")))?;
                    (element, true, 1)
                }
            }
        } else {
            let two: Option<Element> = second
                .filter(|c| c.is_ascii_lowercase())
                .and_then(|c| Element::from_symbol(&format!("{first}{c}")));
            match two {
                Some(element) => (element, false, 2),
                None => {
                    let element = Element::from_symbol(&first.to_string())
                        .ok_or_else(|| self.err(format!("unknown element '{first}'")))?;
                    (element, false, 1)
                }
            }
        };
        self.pos += width;

        // Chirality: @, @@, or @TH1-style classes.
        while self.peek() == Some('@') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_uppercase()) && self.chars.get(self.pos + 1).is_some_and(|c| c.is_ascii_uppercase()) {
            self.pos += 2;
            self.read_number();
        }

        let mut hydrogens = 0u8;
        if self.peek() == Some('H') {
            self.pos += 1;
            hydrogens = self.read_number().unwrap_or(1).min(8) as u8;
        }

        let mut charge: i32 = 0;
        if let Some(sign @ ('+' | '-')) = self.peek() {
            let unit: i32 = if sign == '+' { 1 } else { -1 };
            self.pos += 1;
            let digits_at = self.pos;
            match self.read_number() {
                Some(n) => {
                    charge = i32::try_from(n)
                        .ok()
                        .and_then(|n| n.checked_mul(unit))
                        .filter(|c| (i8::MIN as i32..=i8::MAX as i32).contains(c))
                        .ok_or_else(|| self.err(format!("charge {sign}{n} out of range")))?;
                }
                None if self.pos > digits_at => return Err(self.err("charge out of range")),
                None => {
                    charge = unit;
                    while self.peek() == Some(sign) {
                        charge = charge
                            .checked_add(unit)
                            .filter(|c| (i8::MIN as i32..=i8::MAX as i32).contains(c))
                            .ok_or_else(|| self.err("charge out of range"))?;
                        self.pos += 1;
                    }
                }
            }
        }

        if self.peek() == Some(':') {
            self.pos += 1;
            if self.read_number().is_none() {
                return Err(self.err("atom class requires a number"));
            }
        }

        if self.peek() != Some(']') {
            return Err(self.err("expected ']'"));
        }
        self.pos += 1;

        let mut atom = Atom::new(element);
        atom.aromatic = aromatic;
        atom.implicit_hydrogens = hydrogens;
        atom.formal_charge = charge as i8;
        Ok(atom)
    }
}

/// Fill implicit hydrogen counts for organic-subset atoms from their default
/// valences. Bracket atoms keep the count they were written with.
fn assign_implicit_hydrogens(molecule: &mut Molecule, bracketed: &[bool]) {
    let adj = molecule.adjacency();
    for (index, atom) in molecule.atoms.iter_mut().enumerate() {
        if bracketed[index] {
            continue;
        }
        let bonded: u8 = adj[index]
            .iter()
            .map(|&(_, bond)| molecule.bonds[bond].order.valence())
            .sum();
        let valences = atom.element.valences();

        atom.implicit_hydrogens = if atom.aromatic {
            // One valence unit goes to the π system; only the lowest valence applies.
            let lowest = valences.first().copied().unwrap_or(0);
            lowest.saturating_sub(bonded + 1)
        } else {
            valences
                .iter()
                .find(|v| **v >= bonded)
                .map(|v| v - bonded)
                .unwrap_or(0)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hydrogens(mol: &Molecule) -> Vec<u8> {
        mol.atoms.iter().map(|a| a.implicit_hydrogens).collect()
    }

    #[test]
    fn test_ethanol() {
        let mol = parse_smiles("CCO").unwrap();
        assert_eq!(mol.atoms.len(), 3);
        assert_eq!(hydrogens(&mol), vec![3, 2, 1]);
    }

    #[test]
    fn test_benzene_is_aromatic() {
        let mol = parse_smiles("c1ccccc1").unwrap();
        assert_eq!(mol.atoms.len(), 6);
        assert!(mol.atoms.iter().all(|a| a.aromatic));
        assert!(mol.bonds.iter().all(|b| b.order == BondOrder::Aromatic));
        assert_eq!(mol.bonds.len(), 6);
        assert_eq!(hydrogens(&mol), vec![1; 6]);
    }

    #[test]
    fn test_heteroaromatics() {
        let pyridine = parse_smiles("n1ccccc1").unwrap();
        assert_eq!(pyridine.atoms[0].implicit_hydrogens, 0);
        let thiophene = parse_smiles("s1cccc1").unwrap();
        assert_eq!(thiophene.atoms[0].implicit_hydrogens, 0);
        let pyrrole = parse_smiles("[nH]1cccc1").unwrap();
        assert_eq!(pyrrole.atoms[0].implicit_hydrogens, 1);
    }

    #[test]
    fn test_bracket_atoms() {
        let mol = parse_smiles("[13CH3][C@@H](N)C(=O)[O-]").unwrap();
        assert_eq!(mol.atoms[0].implicit_hydrogens, 3);
        assert_eq!(mol.atoms[1].implicit_hydrogens, 1);
        assert_eq!(mol.atoms[5].formal_charge, -1);
        assert_eq!(mol.atoms[5].implicit_hydrogens, 0);

        let ammonium = parse_smiles("[NH4+]").unwrap();
        assert_eq!(ammonium.atoms[0].formal_charge, 1);
        let iron = parse_smiles("[Fe++]").unwrap();
        assert_eq!(iron.atoms[0].formal_charge, 2);
        assert_eq!(iron.atoms[0].element, Element::Fe);
    }

    #[test]
    fn test_halogens_and_multiple_bonds() {
        let mol = parse_smiles("ClC(Br)=CC#N").unwrap();
        assert_eq!(mol.atoms[0].element, Element::Cl);
        assert_eq!(mol.atoms[2].element, Element::Br);
        assert_eq!(hydrogens(&mol), vec![0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_percent_ring_closure() {
        let mol = parse_smiles("C%10CCCCC%10").unwrap();
        assert_eq!(mol.bonds.len(), 6);
        assert!(mol.atoms.iter().all(|a| a.implicit_hydrogens == 2));
    }

    #[test]
    fn test_title_after_whitespace_is_ignored() {
        let mol = parse_smiles("CC(=O)O acetic acid").unwrap();
        assert_eq!(mol.atoms.len(), 4);
    }

    #[test]
    fn test_malformed_inputs_are_rejected() {
        for bad in ["", "   ", "C1CC", "C(C", "CC)", "C=", "=C", "CX", "[C", "C11", "C%1"] {
            let err = parse_smiles(bad).unwrap_err();
            assert!(matches!(err, MoleculeError::InvalidSmiles { .. }), "{bad}");
        }
    }

    #[test]
    fn test_out_of_range_charge_is_an_error() {
        for bad in ["[C-2147483648]", "[C+2147483648]", "[N+4294967295]", "[O-99999999999]", "[C+200]"] {
            let err = parse_smiles(bad).unwrap_err();
            assert!(matches!(err, MoleculeError::InvalidSmiles { .. }), "{bad}");
        }
        assert_eq!(parse_smiles("[Fe+127]").unwrap().atoms[0].formal_charge, 127);
        assert_eq!(parse_smiles("[O--]").unwrap().atoms[0].formal_charge, -2);
    }

    #[test]
    fn test_error_names_input() {
        let err = parse_smiles("C1CC").unwrap_err();
        assert!(err.to_string().contains("'C1CC'"));
    }
}
