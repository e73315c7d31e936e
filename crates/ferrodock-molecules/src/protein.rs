//! Receptor preparation: PDB text in, PDBQT text out.

use crate::charges::gasteiger_charges;
use crate::element::Element;
use crate::error::{MoleculeError, Result};
use crate::molecule::Hybridization;
use crate::pdb::{PdbAtom, Structure};
use crate::pdbqt::{autodock_type, PdbqtAtom, TypingContext};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Metal ions kept in the receptor, with their usual ionic charge.
pub const SUPPORTED_METALS: &[(Element, i8)] = &[
    (Element::Zn, 2),
    (Element::Fe, 2),
    (Element::Mg, 2),
    (Element::Mn, 2),
    (Element::Ca, 2),
];

/// Cofactor residue names kept in the receptor.
pub const COFACTORS: &[&str] = &[
    "HEM", "HEC", "HEA", "FAD", "FMN", "NAD", "NAP", "NDP", "NAI", "ATP", "ADP", "AMP", "ANP",
    "GTP", "GDP", "GNP", "SAM", "SAH", "COA", "PLP", "TPP", "BTN", "SF4", "FES", "MG",
];

const BOND_SLACK: f64 = 0.45;
const CELL_SIZE: f64 = 2.6;
const AMIDE_NH_LENGTH: f64 = 1.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProteinPrepOptions {
    pub add_hydrogens: bool,
    pub keep_metals: bool,
    pub keep_cofactors: bool,
    pub remove_water: bool,
}

impl Default for ProteinPrepOptions {
    fn default() -> Self {
        Self {
            add_hydrogens: true,
            keep_metals: true,
            keep_cofactors: true,
            remove_water: true,
        }
    }
}

/// What receptor preparation kept, added and dropped.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProteinReport {
    pub atoms_written: usize,
    pub chains: Vec<char>,
    pub hydrogens_added: usize,
    pub nonpolar_hydrogens_merged: usize,
    pub metals_kept: Vec<String>,
    pub cofactors_kept: Vec<String>,
    pub waters_removed: usize,
    pub hetero_dropped: usize,
    pub charges_assigned: bool,
}

/// Receptor atom during preparation.
#[derive(Debug, Clone)]
struct ReceptorAtom {
    pdb: PdbAtom,
    element: Element,
    metal: bool,
    aromatic: bool,
    hybridization: Hybridization,
    charge: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ProteinPreparer {
    options: ProteinPrepOptions,
}

impl ProteinPreparer {
    pub fn new(options: ProteinPrepOptions) -> Self {
        Self { options }
    }

    pub fn prepare(&self, pdb_text: &str) -> Result<(String, ProteinReport)> {
        let structure = Structure::parse(pdb_text)?;
        if structure.is_empty() {
            return Err(MoleculeError::StructureParse("no ATOM/HETATM records".to_string()));
        }

        let mut report = ProteinReport::default();
        let mut atoms = self.select_atoms(structure, &mut report);
        if atoms.is_empty() {
            return Err(MoleculeError::StructureParse("no receptor atoms left after filtering".to_string()));
        }

        if self.options.add_hydrogens {
            report.hydrogens_added = add_backbone_hydrogens(&mut atoms);
        }

        let bonds = infer_bonds(&atoms);
        assign_hybridization(&mut atoms, &bonds);

        match assign_charges(&mut atoms, &bonds) {
            Ok(()) => report.charges_assigned = true,
            Err(e) => {
                warn!(error = %e, "Receptor charge assignment failed, writing neutral charges");
                for atom in atoms.iter_mut().filter(|a| !a.metal) {
                    atom.charge = 0.0;
                }
            }
        }

        let (atoms, bonds, merged) = merge_nonpolar_hydrogens(atoms, bonds);
        report.nonpolar_hydrogens_merged = merged;

        let pdbqt = write_receptor(&atoms, &bonds, &mut report);
        info!(
            atoms = report.atoms_written,
            chains = report.chains.len(),
            metals = report.metals_kept.len(),
            cofactors = report.cofactors_kept.len(),
            "Prepared receptor"
        );
        Ok((pdbqt, report))
    }

    fn select_atoms(&self, structure: Structure, report: &mut ProteinReport) -> Vec<ReceptorAtom> {
        let mut atoms = Vec::with_capacity(structure.atoms.len());
        let mut cofactors = BTreeSet::new();
        let mut dropped_residues = BTreeSet::new();

        for pdb in structure.atoms {
            let Some(element) = pdb.element else {
                debug!(name = %pdb.name, res = %pdb.res_name, "Skipping atom with unknown element");
                report.hetero_dropped += 1;
                continue;
            };

            if pdb.is_water() {
                if self.options.remove_water {
                    report.waters_removed += 1;
                    continue;
                }
            } else if pdb.hetero {
                let metal = SUPPORTED_METALS.iter().find(|(m, _)| *m == element);
                if let Some((_, ionic)) = metal {
                    if !self.options.keep_metals {
                        report.hetero_dropped += 1;
                        continue;
                    }
                    let charge = if pdb.formal_charge != 0 { pdb.formal_charge } else { *ionic };
                    report.metals_kept.push(format!("{}{}", element, pdb.res_seq));
                    atoms.push(ReceptorAtom {
                        pdb,
                        element,
                        metal: true,
                        aromatic: false,
                        hybridization: Hybridization::S,
                        charge: f64::from(charge),
                    });
                    continue;
                }
                if !(self.options.keep_cofactors && COFACTORS.contains(&pdb.res_name.as_str())) {
                    dropped_residues.insert((pdb.chain_id, pdb.res_seq, pdb.res_name.clone()));
                    report.hetero_dropped += 1;
                    continue;
                }
                cofactors.insert(format!("{}{}", pdb.res_name, pdb.res_seq));
            }

            let aromatic = !pdb.hetero && is_aromatic_residue_atom(&pdb.res_name, &pdb.name);
            atoms.push(ReceptorAtom {
                charge: f64::from(pdb.formal_charge),
                pdb,
                element,
                metal: false,
                aromatic,
                hybridization: Hybridization::Sp3,
            });
        }

        if !dropped_residues.is_empty() {
            debug!(residues = dropped_residues.len(), "Dropped unsupported heteroatom residues");
        }
        report.cofactors_kept = cofactors.into_iter().collect();
        atoms
    }
}

// ── Residue templates ───────────────────────────────────────────────────────

fn is_aromatic_residue_atom(res_name: &str, atom: &str) -> bool {
    match res_name {
        "PHE" | "TYR" => matches!(atom, "CG" | "CD1" | "CD2" | "CE1" | "CE2" | "CZ"),
        "TRP" => matches!(atom, "CG" | "CD1" | "CD2" | "NE1" | "CE2" | "CE3" | "CZ2" | "CZ3" | "CH2"),
        "HIS" | "HID" | "HIE" | "HIP" => matches!(atom, "CG" | "ND1" | "CD2" | "CE1" | "NE2"),
        _ => false,
    }
}

/// Trigonal (sp2) heavy atoms of the standard residues.
fn is_planar_residue_atom(res_name: &str, atom: &str) -> bool {
    if matches!(atom, "C" | "O" | "N" | "OXT") {
        return true;
    }
    match res_name {
        "ASP" => matches!(atom, "CG" | "OD1" | "OD2"),
        "GLU" => matches!(atom, "CD" | "OE1" | "OE2"),
        "ASN" => matches!(atom, "CG" | "OD1" | "ND2"),
        "GLN" => matches!(atom, "CD" | "OE1" | "NE2"),
        "ARG" => matches!(atom, "NE" | "CZ" | "NH1" | "NH2"),
        _ => is_aromatic_residue_atom(res_name, atom),
    }
}

/// Side-chain and backbone nitrogens that carry hydrogens at physiological pH.
fn is_donor_nitrogen(res_name: &str, atom: &str) -> bool {
    atom == "N"
        || matches!(
            (res_name, atom),
            ("ARG", "NE" | "NH1" | "NH2") | ("LYS", "NZ") | ("ASN", "ND2") | ("GLN", "NE2") | ("TRP", "NE1")
        )
}

// ── Hydrogens ───────────────────────────────────────────────────────────────

/// Place the backbone amide hydrogen of every non-proline residue that
/// follows a peptide-bonded residue and has no H yet.
fn add_backbone_hydrogens(atoms: &mut Vec<ReceptorAtom>) -> usize {
    type ResidueKey = (char, i32, char);
    let mut new_atoms = {
        let mut residues: Vec<ResidueKey> = Vec::new();
        let mut index: HashMap<(ResidueKey, &str), usize> = HashMap::new();
        for (i, atom) in atoms.iter().enumerate() {
            if atom.pdb.hetero {
                continue;
            }
            let key = (atom.pdb.chain_id, atom.pdb.res_seq, atom.pdb.insertion_code);
            if residues.last() != Some(&key) {
                residues.push(key);
            }
            index.insert((key, atom.pdb.name.as_str()), i);
        }

        let mut new_atoms = Vec::new();
        for pair in residues.windows(2) {
            let (prev, current) = (pair[0], pair[1]);
            if prev.0 != current.0 || index.contains_key(&(current, "H")) {
                continue;
            }
            let (Some(&n), Some(&ca), Some(&c_prev)) = (
                index.get(&(current, "N")),
                index.get(&(current, "CA")),
                index.get(&(prev, "C")),
            ) else {
                continue;
            };
            if atoms[n].pdb.res_name == "PRO" {
                continue;
            }
            let n_pos = atoms[n].pdb.position;
            let from_c = n_pos - atoms[c_prev].pdb.position;
            let from_ca = n_pos - atoms[ca].pdb.position;
            if from_c.norm() > 2.0 || from_c.norm() < 1e-6 || from_ca.norm() < 1e-6 {
                continue;
            }
            let direction = from_c.normalize() + from_ca.normalize();
            if direction.norm() < 1e-6 {
                continue;
            }

            let mut h = atoms[n].pdb.clone();
            h.name = "H".to_string();
            h.element = Some(Element::H);
            h.position = n_pos + direction.normalize() * AMIDE_NH_LENGTH;
            h.formal_charge = 0;
            new_atoms.push((n, h));
        }
        new_atoms
    };

    let added = new_atoms.len();
    // Insert after each parent nitrogen, back to front to keep indices valid.
    new_atoms.sort_by(|a, b| b.0.cmp(&a.0));
    for (parent, pdb) in new_atoms {
        atoms.insert(
            parent + 1,
            ReceptorAtom {
                pdb,
                element: Element::H,
                metal: false,
                aromatic: false,
                hybridization: Hybridization::S,
                charge: 0.0,
            },
        );
    }
    added
}

// ── Bonds and hybridization ─────────────────────────────────────────────────

/// Distance-based covalent bonds on a uniform cell grid. Metals are never bonded.
fn infer_bonds(atoms: &[ReceptorAtom]) -> Vec<(usize, usize)> {
    let cell_of = |p: &Vector3<f64>| {
        (
            (p.x / CELL_SIZE).floor() as i64,
            (p.y / CELL_SIZE).floor() as i64,
            (p.z / CELL_SIZE).floor() as i64,
        )
    };

    let mut grid: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
    for (i, atom) in atoms.iter().enumerate() {
        if !atom.metal {
            grid.entry(cell_of(&atom.pdb.position)).or_default().push(i);
        }
    }

    let mut bonds = Vec::new();
    for (i, atom) in atoms.iter().enumerate() {
        if atom.metal {
            continue;
        }
        let (cx, cy, cz) = cell_of(&atom.pdb.position);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(cell) = grid.get(&(cx + dx, cy + dy, cz + dz)) else { continue };
                    for &j in cell {
                        if j <= i {
                            continue;
                        }
                        let other = &atoms[j];
                        if atom.element == Element::H && other.element == Element::H {
                            continue;
                        }
                        let cutoff = atom.element.covalent_radius() + other.element.covalent_radius() + BOND_SLACK;
                        let d = (atom.pdb.position - other.pdb.position).norm();
                        if d > 0.4 && d <= cutoff {
                            bonds.push((i, j));
                        }
                    }
                }
            }
        }
    }
    bonds
}

fn adjacency(n: usize, bonds: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut adj = vec![Vec::new(); n];
    for &(a, b) in bonds {
        adj[a].push(b);
        adj[b].push(a);
    }
    adj
}

fn mean_bond_angle(center: usize, neighbours: &[usize], atoms: &[ReceptorAtom]) -> Option<f64> {
    if neighbours.len() < 2 {
        return None;
    }
    let origin = atoms[center].pdb.position;
    let mut total = 0.0;
    let mut count = 0;
    for (x, &i) in neighbours.iter().enumerate() {
        for &k in &neighbours[x + 1..] {
            let u = atoms[i].pdb.position - origin;
            let v = atoms[k].pdb.position - origin;
            total += u.angle(&v).to_degrees();
            count += 1;
        }
    }
    Some(total / count as f64)
}

/// Residue templates for standard residues; bond-angle geometry for cofactors.
fn assign_hybridization(atoms: &mut [ReceptorAtom], bonds: &[(usize, usize)]) {
    let adj = adjacency(atoms.len(), bonds);
    for i in 0..atoms.len() {
        let atom = &atoms[i];
        let hybridization = if atom.metal || atom.element == Element::H || atom.element.is_halogen() {
            Hybridization::S
        } else if !atom.pdb.hetero {
            if is_planar_residue_atom(&atom.pdb.res_name, &atom.pdb.name) {
                Hybridization::Sp2
            } else {
                Hybridization::Sp3
            }
        } else {
            match mean_bond_angle(i, &adj[i], atoms) {
                Some(angle) if angle > 165.0 => Hybridization::Sp,
                Some(angle) if angle > 115.0 => Hybridization::Sp2,
                // Terminal heteroatom: follow its neighbour.
                None if adj[i].len() == 1 => {
                    let neighbour = adj[i][0];
                    match mean_bond_angle(neighbour, &adj[neighbour], atoms) {
                        Some(angle) if angle > 115.0 && angle <= 165.0 => Hybridization::Sp2,
                        _ => Hybridization::Sp3,
                    }
                }
                _ => Hybridization::Sp3,
            }
        };
        atoms[i].hybridization = hybridization;
    }
}

fn assign_charges(atoms: &mut [ReceptorAtom], bonds: &[(usize, usize)]) -> Result<()> {
    let elements: Vec<Element> = atoms.iter().map(|a| a.element).collect();
    let hybridization: Vec<Hybridization> = atoms.iter().map(|a| a.hybridization).collect();
    let formal: Vec<f64> = atoms.iter().map(|a| a.charge).collect();
    let charges = gasteiger_charges(&elements, &hybridization, &formal, bonds)?;
    for (atom, q) in atoms.iter_mut().zip(charges) {
        atom.charge = q;
    }
    Ok(())
}

/// Fold hydrogens bonded to carbon into their carbon's charge and drop them.
fn merge_nonpolar_hydrogens(
    atoms: Vec<ReceptorAtom>,
    bonds: Vec<(usize, usize)>,
) -> (Vec<ReceptorAtom>, Vec<(usize, usize)>, usize) {
    let adj = adjacency(atoms.len(), &bonds);
    let mut drop = vec![false; atoms.len()];
    let mut extra = vec![0.0; atoms.len()];
    for (i, atom) in atoms.iter().enumerate() {
        if atom.element != Element::H {
            continue;
        }
        if let [parent] = adj[i][..] {
            if atoms[parent].element == Element::C {
                drop[i] = true;
                extra[parent] += atom.charge;
            }
        }
    }

    let mut remap = vec![usize::MAX; atoms.len()];
    let mut kept = Vec::with_capacity(atoms.len());
    for (i, mut atom) in atoms.into_iter().enumerate() {
        if drop[i] {
            continue;
        }
        atom.charge += extra[i];
        remap[i] = kept.len();
        kept.push(atom);
    }
    let bonds = bonds
        .into_iter()
        .filter(|(a, b)| !drop[*a] && !drop[*b])
        .map(|(a, b)| (remap[a], remap[b]))
        .collect();
    let merged = drop.iter().filter(|d| **d).count();
    (kept, bonds, merged)
}

// ── Output ──────────────────────────────────────────────────────────────────

fn typing_context(i: usize, atoms: &[ReceptorAtom], adj: &[Vec<usize>]) -> TypingContext {
    let atom = &atoms[i];
    let attached_hydrogens = adj[i].iter().filter(|&&n| atoms[n].element == Element::H).count();
    let heavy_neighbors = adj[i].len() - attached_hydrogens;
    let polar_hydrogen = atom.element == Element::H
        && adj[i].iter().any(|&n| matches!(atoms[n].element, Element::N | Element::O | Element::S));
    let delocalized = atom.element == Element::N
        && !atom.pdb.hetero
        && is_donor_nitrogen(&atom.pdb.res_name, &atom.pdb.name);

    TypingContext {
        aromatic: atom.aromatic,
        attached_hydrogens,
        heavy_neighbors,
        delocalized,
        polar_hydrogen,
    }
}

fn write_receptor(atoms: &[ReceptorAtom], bonds: &[(usize, usize)], report: &mut ProteinReport) -> String {
    let adj = adjacency(atoms.len(), bonds);
    let mut lines = Vec::with_capacity(atoms.len() + 8);
    let mut serial = 0;
    let mut current_chain: Option<char> = None;

    for (i, atom) in atoms.iter().enumerate() {
        if current_chain.is_some() && current_chain != Some(atom.pdb.chain_id) {
            lines.push("TER".to_string());
        }
        if current_chain != Some(atom.pdb.chain_id) && !report.chains.contains(&atom.pdb.chain_id) {
            report.chains.push(atom.pdb.chain_id);
        }
        current_chain = Some(atom.pdb.chain_id);

        serial += 1;
        let ctx = typing_context(i, atoms, &adj);
        let record = PdbqtAtom {
            hetero: atom.pdb.hetero,
            serial,
            name: atom.pdb.name.clone(),
            element: atom.element,
            res_name: atom.pdb.res_name.clone(),
            chain_id: atom.pdb.chain_id,
            res_seq: atom.pdb.res_seq,
            insertion_code: atom.pdb.insertion_code,
            position: atom.pdb.position,
            occupancy: atom.pdb.occupancy,
            b_factor: atom.pdb.b_factor,
            charge: atom.charge,
            ad_type: autodock_type(atom.element, &ctx).to_string(),
        };
        lines.push(record.to_line());
    }
    if current_chain.is_some() {
        lines.push("TER".to_string());
    }
    lines.push("END".to_string());

    report.atoms_written = serial;
    let mut text = lines.join("\n");
    text.push('\n');
    text
}
