//! 3D conformer generation.
//!
//! Coordinates come from pairwise distance restraints derived from the bond
//! graph: bond lengths from covalent radii, 1-3 distances from ideal angles
//! and soft lower bounds between atoms three or more bonds apart. A seeded
//! build-up placement is relaxed against those restraints; if the result is
//! not a sane geometry the embedding is retried once from random coordinates.

use crate::error::{MoleculeError, Result};
use crate::molecule::{BondOrder, Hybridization, Molecule};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Largest accepted deviation from a target bond length, in Å.
pub const BOND_TOLERANCE: f64 = 0.3;
/// Closest accepted approach of two non-bonded atoms, in Å.
pub const MIN_NONBONDED_DISTANCE: f64 = 0.7;

const COMPONENT_SPACING: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStrategy {
    /// Seeded build-up along the bond graph.
    BuildUp,
    /// Fallback from uniformly random starting coordinates.
    RandomCoordinates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceFieldKind {
    /// Bonds, angles, planarity and steric repulsion.
    Valence,
    /// Bonds and steric repulsion only.
    Steric,
}

// ── Restraints ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum RestraintKind {
    Harmonic,
    LowerBound,
}

#[derive(Debug, Clone, Copy)]
struct Restraint {
    i: usize,
    j: usize,
    target: f64,
    weight: f64,
    kind: RestraintKind,
}

/// A sum of pairwise distance restraints.
#[derive(Debug, Clone, Default)]
pub struct RestraintField {
    restraints: Vec<Restraint>,
}

impl RestraintField {
    fn harmonic(&mut self, i: usize, j: usize, target: f64, weight: f64) {
        self.restraints.push(Restraint { i, j, target, weight, kind: RestraintKind::Harmonic });
    }

    fn lower_bound(&mut self, i: usize, j: usize, target: f64, weight: f64) {
        self.restraints.push(Restraint { i, j, target, weight, kind: RestraintKind::LowerBound });
    }

    pub fn energy(&self, coords: &[Vector3<f64>]) -> f64 {
        self.restraints
            .iter()
            .map(|r| {
                let d = (coords[r.i] - coords[r.j]).norm();
                match r.kind {
                    RestraintKind::Harmonic => r.weight * (d - r.target).powi(2),
                    RestraintKind::LowerBound if d < r.target => r.weight * (r.target - d).powi(2),
                    RestraintKind::LowerBound => 0.0,
                }
            })
            .sum()
    }

    fn gradient(&self, coords: &[Vector3<f64>], grad: &mut [Vector3<f64>]) {
        grad.iter_mut().for_each(|g| *g = Vector3::zeros());
        for r in &self.restraints {
            let delta = coords[r.i] - coords[r.j];
            let d = delta.norm().max(1e-6);
            let violation = match r.kind {
                RestraintKind::Harmonic => d - r.target,
                RestraintKind::LowerBound if d < r.target => d - r.target,
                RestraintKind::LowerBound => continue,
            };
            let g = delta * (2.0 * r.weight * violation / d);
            grad[r.i] += g;
            grad[r.j] -= g;
        }
    }

    /// Steepest descent with an adaptive step. Returns the final energy.
    pub fn minimize(&self, coords: &mut [Vector3<f64>], max_iterations: usize) -> f64 {
        let mut grad = vec![Vector3::zeros(); coords.len()];
        let mut trial = coords.to_vec();
        let mut energy = self.energy(coords);
        let mut step = 0.1;

        for _ in 0..max_iterations {
            self.gradient(coords, &mut grad);
            let max_grad = grad.iter().map(|g| g.norm()).fold(0.0, f64::max);
            if max_grad < 1e-4 || step < 1e-7 {
                break;
            }

            let scale = step / max_grad;
            for ((t, c), g) in trial.iter_mut().zip(coords.iter()).zip(grad.iter()) {
                *t = c - g * scale;
            }
            let trial_energy = self.energy(&trial);
            if trial_energy.is_finite() && trial_energy < energy {
                coords.copy_from_slice(&trial);
                energy = trial_energy;
                step = (step * 1.2).min(0.5);
            } else {
                step *= 0.5;
            }
        }
        energy
    }
}

// ── Geometry targets ────────────────────────────────────────────────────────

/// Ideal length of every bond, indexed like `molecule.bonds`.
pub fn bond_targets(molecule: &Molecule) -> Vec<f64> {
    molecule
        .bonds
        .iter()
        .map(|b| {
            let a = molecule.atoms[b.a].element.covalent_radius();
            let c = molecule.atoms[b.b].element.covalent_radius();
            (a + c) * b.order.length_factor()
        })
        .collect()
}

fn law_of_cosines(a: f64, b: f64, angle_deg: f64) -> f64 {
    (a * a + b * b - 2.0 * a * b * angle_deg.to_radians().cos()).sqrt()
}

/// Distance between the outer atoms of a planar i-j-k-l unit.
fn planar_14(a: f64, b: f64, c: f64, theta1: f64, theta2: f64, cis: bool) -> f64 {
    let (t1, t2) = (theta1.to_radians(), theta2.to_radians());
    let side = if cis { 1.0 } else { -1.0 };
    let i = Vector3::new(a * t1.cos(), a * t1.sin(), 0.0);
    let l = Vector3::new(b - c * t2.cos(), side * c * t2.sin(), 0.0);
    (i - l).norm()
}

struct Topology {
    adj: Vec<Vec<(usize, usize)>>,
    hybridization: Vec<Hybridization>,
    bond_lengths: Vec<f64>,
    /// Topological distances, row-major `n * n`.
    distances: Vec<usize>,
}

impl Topology {
    fn new(molecule: &Molecule) -> Self {
        let adj = molecule.adjacency();
        let n = molecule.atoms.len();
        let hybridization = (0..n).map(|i| molecule.hybridization(i, &adj)).collect();
        let mut distances = Vec::with_capacity(n * n);
        for i in 0..n {
            distances.extend(molecule.topological_distances(i, &adj));
        }
        Self {
            adj,
            hybridization,
            bond_lengths: bond_targets(molecule),
            distances,
        }
    }

    fn distance(&self, i: usize, j: usize) -> usize {
        self.distances[i * self.adj.len() + j]
    }

    fn bond_length(&self, bond: usize) -> f64 {
        self.bond_lengths[bond]
    }
}

fn add_bond_terms(field: &mut RestraintField, molecule: &Molecule, topo: &Topology, weight: f64) {
    for (index, bond) in molecule.bonds.iter().enumerate() {
        field.harmonic(bond.a, bond.b, topo.bond_length(index), weight);
    }
}

fn add_angle_terms(field: &mut RestraintField, topo: &Topology, weight: f64) {
    for (center, neighbours) in topo.adj.iter().enumerate() {
        let angle = topo.hybridization[center].ideal_angle();
        for (x, &(i, bond_i)) in neighbours.iter().enumerate() {
            for &(k, bond_k) in neighbours.iter().skip(x + 1) {
                if topo.distance(i, k) < 2 {
                    continue;
                }
                let target = law_of_cosines(topo.bond_length(bond_i), topo.bond_length(bond_k), angle);
                field.harmonic(i, k, target, weight);
            }
        }
    }
}

fn add_repulsion_terms(field: &mut RestraintField, molecule: &Molecule, topo: &Topology, weight: f64) {
    let n = molecule.atoms.len();
    for i in 0..n {
        for j in (i + 1)..n {
            if topo.distance(i, j) >= 3 {
                let contact = 0.6 * (molecule.atoms[i].element.vdw_radius() + molecule.atoms[j].element.vdw_radius());
                field.lower_bound(i, j, contact, weight);
            }
        }
    }
}

/// Keep substituents of double and aromatic bonds in plane, on whichever
/// side (cis or trans) they currently sit.
fn add_planarity_terms(
    field: &mut RestraintField,
    molecule: &Molecule,
    topo: &Topology,
    coords: &[Vector3<f64>],
    weight: f64,
) {
    for (index, bond) in molecule.bonds.iter().enumerate() {
        if !matches!(bond.order, BondOrder::Double | BondOrder::Aromatic) {
            continue;
        }
        let (j, k) = (bond.a, bond.b);
        let theta1 = topo.hybridization[j].ideal_angle();
        let theta2 = topo.hybridization[k].ideal_angle();
        for &(i, bond_ij) in &topo.adj[j] {
            if i == k {
                continue;
            }
            for &(l, bond_kl) in &topo.adj[k] {
                if l == j || l == i || topo.distance(i, l) < 3 {
                    continue;
                }
                let (a, b, c) = (topo.bond_length(bond_ij), topo.bond_length(index), topo.bond_length(bond_kl));
                let cis = planar_14(a, b, c, theta1, theta2, true);
                let trans = planar_14(a, b, c, theta1, theta2, false);
                let current = (coords[i] - coords[l]).norm();
                let target = if (current - cis).abs() <= (current - trans).abs() { cis } else { trans };
                field.harmonic(i, l, target, weight);
            }
        }
    }
}

fn embedding_field(molecule: &Molecule, topo: &Topology) -> RestraintField {
    let mut field = RestraintField::default();
    add_bond_terms(&mut field, molecule, topo, 100.0);
    add_angle_terms(&mut field, topo, 50.0);
    add_repulsion_terms(&mut field, molecule, topo, 10.0);
    field
}

fn force_field(kind: ForceFieldKind, molecule: &Molecule, topo: &Topology, coords: &[Vector3<f64>]) -> RestraintField {
    let mut field = RestraintField::default();
    match kind {
        ForceFieldKind::Valence => {
            add_bond_terms(&mut field, molecule, topo, 300.0);
            add_angle_terms(&mut field, topo, 100.0);
            add_planarity_terms(&mut field, molecule, topo, coords, 20.0);
            add_repulsion_terms(&mut field, molecule, topo, 20.0);
        }
        ForceFieldKind::Steric => {
            add_bond_terms(&mut field, molecule, topo, 300.0);
            add_repulsion_terms(&mut field, molecule, topo, 50.0);
        }
    }
    field
}

// ── Embedding ───────────────────────────────────────────────────────────────

fn iterations_for(atom_count: usize) -> usize {
    (atom_count * 400).clamp(4_000, 40_000)
}

fn random_unit<R: Rng>(rng: &mut R) -> Vector3<f64> {
    loop {
        let v = Vector3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
        let norm = v.norm();
        if norm > 1e-3 && norm <= 1.0 {
            return v / norm;
        }
    }
}

/// Place atoms breadth-first along the bond graph, each at its ideal bond
/// length from its parent in a random direction biased away from the grandparent.
fn build_up_coordinates(molecule: &Molecule, topo: &Topology, rng: &mut StdRng) -> Vec<Vector3<f64>> {
    let n = molecule.atoms.len();
    let mut coords = vec![Vector3::zeros(); n];
    let mut parent: Vec<Option<usize>> = vec![None; n];
    let mut placed = vec![false; n];

    for (offset, component) in molecule.components().iter().enumerate() {
        let Some(&root) = component.first() else { continue };
        coords[root] = Vector3::new(offset as f64 * COMPONENT_SPACING, 0.0, 0.0);
        placed[root] = true;
        let mut queue = VecDeque::from([root]);

        while let Some(atom) = queue.pop_front() {
            for &(next, bond) in &topo.adj[atom] {
                if placed[next] {
                    continue;
                }
                let mut direction = random_unit(rng);
                if let Some(grandparent) = parent[atom] {
                    let away = coords[atom] - coords[grandparent];
                    if away.norm() > 1e-6 {
                        direction = (direction + away.normalize()).normalize();
                    }
                }
                coords[next] = coords[atom] + direction * topo.bond_length(bond);
                parent[next] = Some(atom);
                placed[next] = true;
                queue.push_back(next);
            }
        }
    }
    coords
}

fn random_coordinates(molecule: &Molecule, rng: &mut StdRng) -> Vec<Vector3<f64>> {
    let n = molecule.atoms.len();
    let half = (1.5 * (n as f64).cbrt()).max(1.5);
    (0..n)
        .map(|_| Vector3::new(rng.gen_range(-half..half), rng.gen_range(-half..half), rng.gen_range(-half..half)))
        .collect()
}

/// Check coordinates are finite, bonds are near their targets and no two
/// unbonded atoms overlap.
pub fn check_geometry(molecule: &Molecule, coords: &[Vector3<f64>]) -> std::result::Result<(), String> {
    if coords.iter().any(|c| !c.iter().all(|v| v.is_finite())) {
        return Err("non-finite coordinates".to_string());
    }
    let targets = bond_targets(molecule);
    for (bond, target) in molecule.bonds.iter().zip(targets) {
        let d = (coords[bond.a] - coords[bond.b]).norm();
        if (d - target).abs() > BOND_TOLERANCE {
            return Err(format!(
                "bond {}-{} is {d:.2} Å, expected {target:.2} Å",
                bond.a, bond.b
            ));
        }
    }
    for i in 0..coords.len() {
        for j in (i + 1)..coords.len() {
            if molecule.bond_between(i, j).is_some() {
                continue;
            }
            let d = (coords[i] - coords[j]).norm();
            if d < MIN_NONBONDED_DISTANCE {
                return Err(format!("atoms {i} and {j} overlap ({d:.2} Å)"));
            }
        }
    }
    Ok(())
}

/// Generate coordinates for every atom (hydrogens included) and store them
/// in `molecule`. Deterministic for a given `seed`.
pub fn embed(molecule: &mut Molecule, seed: u64) -> Result<EmbeddingStrategy> {
    if molecule.atoms.is_empty() {
        return Err(MoleculeError::Embedding("molecule has no atoms".to_string()));
    }
    let topo = Topology::new(molecule);
    let field = embedding_field(molecule, &topo);
    let iterations = iterations_for(molecule.atoms.len());

    let mut rng = StdRng::seed_from_u64(seed);
    let mut coords = build_up_coordinates(molecule, &topo, &mut rng);
    field.minimize(&mut coords, iterations);
    let strategy = match check_geometry(molecule, &coords) {
        Ok(()) => EmbeddingStrategy::BuildUp,
        Err(reason) => {
            warn!(%reason, seed, "Build-up embedding rejected, retrying from random coordinates");
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
            coords = random_coordinates(molecule, &mut rng);
            field.minimize(&mut coords, iterations);
            check_geometry(molecule, &coords).map_err(|reason| {
                MoleculeError::Embedding(format!(
                    "no acceptable geometry for {} atoms: {reason}",
                    molecule.atoms.len()
                ))
            })?;
            EmbeddingStrategy::RandomCoordinates
        }
    };

    for (atom, position) in molecule.atoms.iter_mut().zip(coords) {
        atom.position = position;
    }
    debug!(atoms = molecule.atoms.len(), ?strategy, "Embedded conformer");
    Ok(strategy)
}

/// Relax the current coordinates with `kind`. On failure the molecule is left
/// untouched.
pub fn optimize(molecule: &mut Molecule, kind: ForceFieldKind) -> Result<f64> {
    let topo = Topology::new(molecule);
    let mut coords: Vec<Vector3<f64>> = molecule.atoms.iter().map(|a| a.position).collect();
    let field = force_field(kind, molecule, &topo, &coords);
    let energy = field.minimize(&mut coords, iterations_for(molecule.atoms.len()));

    if !energy.is_finite() {
        return Err(MoleculeError::Embedding(format!("{kind:?} force field diverged")));
    }
    check_geometry(molecule, &coords)
        .map_err(|reason| MoleculeError::Embedding(format!("{kind:?} force field: {reason}")))?;

    for (atom, position) in molecule.atoms.iter_mut().zip(coords) {
        atom.position = position;
    }
    Ok(energy)
}

/// Optimise with the valence force field, falling back to the steric one.
/// Returns the field that succeeded, or `None` if both failed.
pub fn optimize_with_fallback(molecule: &mut Molecule) -> Option<ForceFieldKind> {
    for kind in [ForceFieldKind::Valence, ForceFieldKind::Steric] {
        match optimize(molecule, kind) {
            Ok(energy) => {
                debug!(?kind, energy, "Geometry optimised");
                return Some(kind);
            }
            Err(e) => warn!(?kind, error = %e, "Force field optimisation failed"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smiles::parse_smiles;

    fn prepared(smiles: &str) -> Molecule {
        let mut mol = parse_smiles(smiles).unwrap();
        mol.add_hydrogens();
        mol
    }

    #[test]
    fn test_embedding_is_deterministic() {
        let mut first = prepared("CCCC");
        let mut second = prepared("CCCC");
        embed(&mut first, 42).unwrap();
        embed(&mut second, 42).unwrap();
        for (a, b) in first.atoms.iter().zip(&second.atoms) {
            assert_eq!(a.position, b.position);
        }
    }

    #[test]
    fn test_embedded_bonds_near_targets() {
        for smiles in ["CCO", "c1ccccc1", "CC(=O)NCC", "c1ccccc1-c2ccccc2"] {
            let mut mol = prepared(smiles);
            embed(&mut mol, 7).unwrap();
            let coords: Vec<_> = mol.atoms.iter().map(|a| a.position).collect();
            check_geometry(&mol, &coords).unwrap_or_else(|e| panic!("{smiles}: {e}"));
        }
    }

    #[test]
    fn test_disconnected_fragments_are_separated() {
        let mut mol = prepared("[Na+].[Cl-]");
        embed(&mut mol, 1).unwrap();
        let d = (mol.atoms[0].position - mol.atoms[1].position).norm();
        assert!(d >= MIN_NONBONDED_DISTANCE);
    }

    #[test]
    fn test_optimize_keeps_valid_geometry() {
        let mut mol = prepared("CCCC");
        embed(&mut mol, 3).unwrap();
        assert_eq!(optimize_with_fallback(&mut mol), Some(ForceFieldKind::Valence));
        let coords: Vec<_> = mol.atoms.iter().map(|a| a.position).collect();
        assert!(check_geometry(&mol, &coords).is_ok());
    }

    #[test]
    fn test_check_geometry_rejects_collapsed_atoms() {
        let mol = prepared("CC");
        let coords = vec![Vector3::zeros(); mol.atoms.len()];
        assert!(check_geometry(&mol, &coords).is_err());
    }

    #[test]
    fn test_planar_14_distances() {
        // Ethylene-like unit: trans H..H is longer than cis.
        let cis = planar_14(1.09, 1.34, 1.09, 120.0, 120.0, true);
        let trans = planar_14(1.09, 1.34, 1.09, 120.0, 120.0, false);
        assert!(trans > cis);
        assert!((cis - 2.43).abs() < 0.05);
    }
}
