//! Ligand preparation: SMILES in, PDBQT with a torsion tree out.

use crate::charges::assign_molecule_charges;
use crate::conformer::{self, EmbeddingStrategy, ForceFieldKind};
use crate::element::Element;
use crate::error::Result;
use crate::molecule::{components_where, BondOrder, Hybridization, Molecule};
use crate::pdbqt::{autodock_type, PdbqtAtom, TypingContext};
use crate::smiles::parse_smiles;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LigandPrepOptions {
    /// Seed for the conformer embedding.
    pub seed: u64,
    pub optimize: bool,
    /// Write ROOT/BRANCH torsion trees; otherwise a rigid single root.
    pub torsion_tree: bool,
}

impl Default for LigandPrepOptions {
    fn default() -> Self {
        Self {
            seed: 42,
            optimize: true,
            torsion_tree: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LigandReport {
    pub heavy_atoms: usize,
    pub atoms_written: usize,
    pub rotatable_bonds: usize,
    /// Active torsions written to the file (0 for rigid output).
    pub torsions: usize,
    pub net_charge: i32,
    pub embedding: EmbeddingStrategy,
    pub force_field: Option<ForceFieldKind>,
    pub charges_assigned: bool,
    pub hierarchical: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LigandPreparer {
    options: LigandPrepOptions,
}

impl LigandPreparer {
    pub fn new(options: LigandPrepOptions) -> Self {
        Self { options }
    }

    pub fn prepare(&self, smiles: &str) -> Result<(String, LigandReport)> {
        let mut molecule = parse_smiles(smiles)?;
        molecule.add_hydrogens();

        let embedding = conformer::embed(&mut molecule, self.options.seed)?;
        let force_field = if self.options.optimize {
            conformer::optimize_with_fallback(&mut molecule)
        } else {
            None
        };

        let charges_assigned = match assign_molecule_charges(&mut molecule) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, smiles, "Ligand charge assignment failed, writing formal charges");
                for atom in &mut molecule.atoms {
                    atom.partial_charge = f64::from(atom.formal_charge);
                }
                false
            }
        };

        let rotatable = molecule.rotatable_bonds();
        let rotatable_bonds = rotatable.iter().filter(|r| **r).count();
        let (atoms, bonds) = build_records(&molecule, &rotatable);

        let hierarchical = self.options.torsion_tree && molecule.components().len() == 1;
        let (body, torsions) = if hierarchical {
            write_torsion_tree(atoms, &bonds)
        } else {
            (write_rigid(atoms), 0)
        };

        let mut lines = vec![
            format!("REMARK  SMILES {}", smiles.trim()),
            format!("REMARK  {torsions} active torsions"),
        ];
        lines.extend(body);
        lines.push(format!("TORSDOF {torsions}"));
        let atoms_written = lines
            .iter()
            .filter(|l| l.starts_with("ATOM") || l.starts_with("HETATM"))
            .count();
        let mut text = lines.join("\n");
        text.push('\n');

        let report = LigandReport {
            heavy_atoms: molecule.heavy_atom_count(),
            atoms_written,
            rotatable_bonds,
            torsions,
            net_charge: molecule.net_charge(),
            embedding,
            force_field,
            charges_assigned,
            hierarchical,
        };
        info!(
            heavy_atoms = report.heavy_atoms,
            rotatable_bonds,
            torsions,
            embedding = ?report.embedding,
            "Prepared ligand"
        );
        Ok((text, report))
    }
}

/// Bond between kept atoms: `(a, b, rotatable)`.
type KeptBond = (usize, usize, bool);

fn typing_context(molecule: &Molecule, adj: &[Vec<(usize, usize)>], i: usize) -> TypingContext {
    let atom = &molecule.atoms[i];
    let attached_hydrogens = adj[i].iter().filter(|(n, _)| molecule.atoms[*n].is_hydrogen()).count();
    let heavy_neighbors = adj[i].len() - attached_hydrogens;
    let has_double = adj[i]
        .iter()
        .any(|(_, b)| matches!(molecule.bonds[*b].order, BondOrder::Double | BondOrder::Triple));
    let delocalized = atom.element == Element::N
        && !atom.aromatic
        && !has_double
        && molecule.hybridization(i, adj) == Hybridization::Sp2;
    let polar_hydrogen = atom.is_hydrogen()
        && adj[i]
            .iter()
            .any(|(n, _)| matches!(molecule.atoms[*n].element, Element::N | Element::O | Element::S));

    TypingContext {
        aromatic: atom.aromatic,
        attached_hydrogens,
        heavy_neighbors,
        delocalized,
        polar_hydrogen,
    }
}

/// Type every atom, fold carbon-bound hydrogens into their carbon and
/// return the kept atoms with their bonds.
fn build_records(molecule: &Molecule, rotatable: &[bool]) -> (Vec<PdbqtAtom>, Vec<KeptBond>) {
    let adj = molecule.adjacency();
    let n = molecule.atoms.len();

    let mut merged_into: Vec<Option<usize>> = vec![None; n];
    for (i, atom) in molecule.atoms.iter().enumerate() {
        if let [(parent, _)] = adj[i].as_slice() {
            if atom.is_hydrogen() && molecule.atoms[*parent].element == Element::C {
                merged_into[i] = Some(*parent);
            }
        }
    }

    let mut charge: Vec<f64> = molecule.atoms.iter().map(|a| a.partial_charge).collect();
    for (i, parent) in merged_into.iter().enumerate() {
        if let Some(parent) = parent {
            charge[*parent] += charge[i];
        }
    }

    let mut remap = vec![usize::MAX; n];
    let mut per_element: HashMap<Element, usize> = HashMap::new();
    let mut atoms = Vec::new();
    for (i, atom) in molecule.atoms.iter().enumerate() {
        if merged_into[i].is_some() {
            continue;
        }
        let ordinal = per_element.entry(atom.element).or_insert(0);
        *ordinal += 1;
        let ctx = typing_context(molecule, &adj, i);

        remap[i] = atoms.len();
        atoms.push(PdbqtAtom {
            hetero: false,
            serial: 0,
            name: format!("{}{}", atom.element.symbol().to_ascii_uppercase(), ordinal),
            element: atom.element,
            res_name: "UNL".to_string(),
            chain_id: ' ',
            res_seq: 1,
            insertion_code: ' ',
            position: atom.position,
            occupancy: 1.0,
            b_factor: 0.0,
            charge: charge[i],
            ad_type: autodock_type(atom.element, &ctx).to_string(),
        });
    }

    let bonds = molecule
        .bonds
        .iter()
        .enumerate()
        .filter(|(_, b)| remap[b.a] != usize::MAX && remap[b.b] != usize::MAX)
        .map(|(index, b)| (remap[b.a], remap[b.b], rotatable[index]))
        .collect();
    (atoms, bonds)
}

fn write_rigid(atoms: Vec<PdbqtAtom>) -> Vec<String> {
    let mut lines = vec!["ROOT".to_string()];
    for (i, mut atom) in atoms.into_iter().enumerate() {
        atom.serial = i + 1;
        lines.push(atom.to_line());
    }
    lines.push("ENDROOT".to_string());
    lines
}

struct Branch {
    parent_atom: usize,
    child_atom: usize,
    fragment: usize,
}

struct TreeWriter {
    atoms: Vec<PdbqtAtom>,
    fragments: Vec<Vec<usize>>,
    children: Vec<Vec<Branch>>,
    serial: Vec<usize>,
    next_serial: usize,
    lines: Vec<String>,
}

impl TreeWriter {
    fn write_atom(&mut self, atom: usize) {
        self.next_serial += 1;
        self.serial[atom] = self.next_serial;
        let record = &mut self.atoms[atom];
        record.serial = self.next_serial;
        self.lines.push(record.to_line());
    }

    fn write_fragment(&mut self, fragment: usize, entry: Option<usize>) {
        if let Some(entry) = entry {
            self.write_atom(entry);
        }
        let members = self.fragments[fragment].clone();
        for atom in members {
            if Some(atom) != entry {
                self.write_atom(atom);
            }
        }
    }

    fn write_branches(&mut self, fragment: usize) {
        let branches = std::mem::take(&mut self.children[fragment]);
        for branch in branches {
            let parent_serial = self.serial[branch.parent_atom];
            let child_serial = self.next_serial + 1;
            self.lines.push(format!("BRANCH {parent_serial:>3} {child_serial:>3}"));
            self.write_fragment(branch.fragment, Some(branch.child_atom));
            self.write_branches(branch.fragment);
            self.lines.push(format!("ENDBRANCH {parent_serial:>3} {child_serial:>3}"));
        }
    }
}

/// Rigid fragments joined by rotatable bonds, rooted at the largest fragment.
fn write_torsion_tree(atoms: Vec<PdbqtAtom>, bonds: &[KeptBond]) -> (Vec<String>, usize) {
    let n = atoms.len();
    let mut adj: Vec<Vec<(usize, usize)>> = vec![Vec::new(); n];
    for (index, &(a, b, _)) in bonds.iter().enumerate() {
        adj[a].push((b, index));
        adj[b].push((a, index));
    }

    let fragments = components_where(n, &adj, |bond| !bonds[bond].2);
    let mut fragment_of = vec![0; n];
    for (f, members) in fragments.iter().enumerate() {
        for &atom in members {
            fragment_of[atom] = f;
        }
    }

    let mut root = 0;
    for (f, members) in fragments.iter().enumerate() {
        if members.len() > fragments[root].len() {
            root = f;
        }
    }

    // Breadth-first over fragments to orient every rotatable bond away from the root.
    let mut children: Vec<Vec<Branch>> = (0..fragments.len()).map(|_| Vec::new()).collect();
    let mut visited = vec![false; fragments.len()];
    visited[root] = true;
    let mut queue = std::collections::VecDeque::from([root]);
    let mut torsions = 0;
    while let Some(fragment) = queue.pop_front() {
        for &atom in &fragments[fragment] {
            for &(next, bond) in &adj[atom] {
                let target = fragment_of[next];
                if !bonds[bond].2 || visited[target] {
                    continue;
                }
                visited[target] = true;
                children[fragment].push(Branch {
                    parent_atom: atom,
                    child_atom: next,
                    fragment: target,
                });
                torsions += 1;
                queue.push_back(target);
            }
        }
    }

    let mut writer = TreeWriter {
        atoms,
        fragments,
        children,
        serial: vec![0; n],
        next_serial: 0,
        lines: vec!["ROOT".to_string()],
    };
    writer.write_fragment(root, None);
    writer.lines.push("ENDROOT".to_string());
    writer.write_branches(root);
    (writer.lines, torsions)
}
