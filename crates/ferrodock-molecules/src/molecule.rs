//! Small-molecule graph: atoms, bonds and the topological queries used by
//! embedding, charge assignment and torsion-tree construction.

use crate::element::Element;
use nalgebra::Vector3;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BondOrder {
    Single,
    Double,
    Triple,
    Aromatic,
}

impl BondOrder {
    /// Contribution to an atom's valence. Aromatic bonds count as single;
    /// the extra π electron is accounted for per atom.
    pub fn valence(&self) -> u8 {
        match self {
            BondOrder::Single | BondOrder::Aromatic => 1,
            BondOrder::Double => 2,
            BondOrder::Triple => 3,
        }
    }

    /// Scale applied to the single-bond covalent radius sum.
    pub fn length_factor(&self) -> f64 {
        match self {
            BondOrder::Single => 1.0,
            BondOrder::Aromatic => 0.91,
            BondOrder::Double => 0.87,
            BondOrder::Triple => 0.78,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hybridization {
    /// Hydrogen and other atoms without p-orbital participation.
    S,
    Sp,
    Sp2,
    Sp3,
}

impl Hybridization {
    /// Ideal bond angle around an atom of this hybridization, in degrees.
    pub fn ideal_angle(&self) -> f64 {
        match self {
            Hybridization::Sp => 180.0,
            Hybridization::Sp2 => 120.0,
            Hybridization::S | Hybridization::Sp3 => 109.47,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub element: Element,
    pub aromatic: bool,
    pub formal_charge: i8,
    /// Implicit hydrogens not yet expanded into explicit atoms.
    pub implicit_hydrogens: u8,
    pub position: Vector3<f64>,
    pub partial_charge: f64,
}

impl Atom {
    pub fn new(element: Element) -> Self {
        Self {
            element,
            aromatic: false,
            formal_charge: 0,
            implicit_hydrogens: 0,
            position: Vector3::zeros(),
            partial_charge: 0.0,
        }
    }

    pub fn is_hydrogen(&self) -> bool {
        self.element == Element::H
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bond {
    pub a: usize,
    pub b: usize,
    pub order: BondOrder,
}

impl Bond {
    pub fn other(&self, atom: usize) -> usize {
        if self.a == atom {
            self.b
        } else {
            self.a
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Molecule {
    pub atoms: Vec<Atom>,
    pub bonds: Vec<Bond>,
}

impl Molecule {
    pub fn add_atom(&mut self, atom: Atom) -> usize {
        self.atoms.push(atom);
        self.atoms.len() - 1
    }

    pub fn add_bond(&mut self, a: usize, b: usize, order: BondOrder) -> usize {
        self.bonds.push(Bond { a, b, order });
        self.bonds.len() - 1
    }

    pub fn heavy_atom_count(&self) -> usize {
        self.atoms.iter().filter(|a| !a.is_hydrogen()).count()
    }

    pub fn net_charge(&self) -> i32 {
        self.atoms.iter().map(|a| i32::from(a.formal_charge)).sum()
    }

    /// Per-atom list of `(neighbour, bond index)`.
    pub fn adjacency(&self) -> Vec<Vec<(usize, usize)>> {
        let mut adj = vec![Vec::new(); self.atoms.len()];
        for (index, bond) in self.bonds.iter().enumerate() {
            adj[bond.a].push((bond.b, index));
            adj[bond.b].push((bond.a, index));
        }
        adj
    }

    pub fn bond_between(&self, a: usize, b: usize) -> Option<&Bond> {
        self.bonds
            .iter()
            .find(|bond| (bond.a == a && bond.b == b) || (bond.a == b && bond.b == a))
    }

    /// Expand implicit hydrogens into explicit atoms bonded by single bonds.
    /// New hydrogens start at their parent's position. Returns how many were added.
    pub fn add_hydrogens(&mut self) -> usize {
        let mut added = 0;
        for parent in 0..self.atoms.len() {
            let count = std::mem::take(&mut self.atoms[parent].implicit_hydrogens);
            for _ in 0..count {
                let mut hydrogen = Atom::new(Element::H);
                hydrogen.position = self.atoms[parent].position;
                let h = self.add_atom(hydrogen);
                self.add_bond(parent, h, BondOrder::Single);
                added += 1;
            }
        }
        added
    }

    /// Connected components, each a sorted list of atom indices.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let adj = self.adjacency();
        components_where(self.atoms.len(), &adj, |_| true)
    }

    /// Bonds that lie on a ring, i.e. are not bridges of the bond graph.
    pub fn ring_bonds(&self) -> Vec<bool> {
        let adj = self.adjacency();
        let n = self.atoms.len();
        let mut in_ring = vec![true; self.bonds.len()];
        let mut disc = vec![usize::MAX; n];
        let mut low = vec![0usize; n];
        let mut timer = 0;

        // Iterative Tarjan bridge search.
        for start in 0..n {
            if disc[start] != usize::MAX {
                continue;
            }
            disc[start] = timer;
            low[start] = timer;
            timer += 1;
            // (atom, bond used to reach it, next neighbour cursor)
            let mut stack: Vec<(usize, Option<usize>, usize)> = vec![(start, None, 0)];

            while let Some(frame) = stack.last_mut() {
                let (atom, via, cursor) = *frame;
                if cursor < adj[atom].len() {
                    frame.2 += 1;
                    let (next, bond) = adj[atom][cursor];
                    if Some(bond) == via {
                        continue;
                    }
                    if disc[next] == usize::MAX {
                        disc[next] = timer;
                        low[next] = timer;
                        timer += 1;
                        stack.push((next, Some(bond), 0));
                    } else {
                        low[atom] = low[atom].min(disc[next]);
                    }
                } else {
                    stack.pop();
                    if let (Some(bond), Some(parent)) = (via, stack.last()) {
                        let parent = parent.0;
                        low[parent] = low[parent].min(low[atom]);
                        if low[atom] > disc[parent] {
                            in_ring[bond] = false;
                        }
                    }
                }
            }
        }
        in_ring
    }

    pub fn hybridization(&self, atom: usize, adj: &[Vec<(usize, usize)>]) -> Hybridization {
        let element = self.atoms[atom].element;
        if element == Element::H || element.is_halogen() || element.is_metal() {
            return Hybridization::S;
        }

        let mut doubles = 0;
        let mut triple = false;
        let mut aromatic = self.atoms[atom].aromatic;
        for &(_, bond) in &adj[atom] {
            match self.bonds[bond].order {
                BondOrder::Double => doubles += 1,
                BondOrder::Triple => triple = true,
                BondOrder::Aromatic => aromatic = true,
                BondOrder::Single => {}
            }
        }

        if triple || doubles >= 2 {
            return Hybridization::Sp;
        }
        if doubles == 1 || aromatic {
            return Hybridization::Sp2;
        }
        // Amide-type nitrogen conjugated with a neighbouring π system.
        if element == Element::N {
            let conjugated = adj[atom].iter().any(|&(next, _)| {
                let next_atom = &self.atoms[next];
                next_atom.aromatic
                    || adj[next]
                        .iter()
                        .any(|&(_, b)| matches!(self.bonds[b].order, BondOrder::Double | BondOrder::Aromatic))
            });
            if conjugated && adj[atom].len() <= 3 {
                return Hybridization::Sp2;
            }
        }
        Hybridization::Sp3
    }

    fn heavy_degree(&self, atom: usize, adj: &[Vec<(usize, usize)>]) -> usize {
        adj[atom].iter().filter(|(n, _)| !self.atoms[*n].is_hydrogen()).count()
    }

    fn has_triple_bond(&self, atom: usize, adj: &[Vec<(usize, usize)>]) -> bool {
        adj[atom].iter().any(|&(_, b)| self.bonds[b].order == BondOrder::Triple)
    }

    /// Carbonyl/thiocarbonyl carbon: double-bonded to O or S.
    fn is_carbonyl_carbon(&self, atom: usize, adj: &[Vec<(usize, usize)>]) -> bool {
        self.atoms[atom].element == Element::C
            && adj[atom].iter().any(|&(n, b)| {
                self.bonds[b].order == BondOrder::Double
                    && matches!(self.atoms[n].element, Element::O | Element::S)
            })
    }

    fn is_amide_bond(&self, bond: &Bond, adj: &[Vec<(usize, usize)>]) -> bool {
        let (a, b) = (bond.a, bond.b);
        let n_c = |n: usize, c: usize| self.atoms[n].element == Element::N && self.is_carbonyl_carbon(c, adj);
        n_c(a, b) || n_c(b, a)
    }

    /// Flags for bonds the docking engine may twist: single, acyclic,
    /// between two non-terminal heavy atoms, not an amide C-N bond and not
    /// next to a triple bond.
    pub fn rotatable_bonds(&self) -> Vec<bool> {
        let adj = self.adjacency();
        let in_ring = self.ring_bonds();

        self.bonds
            .iter()
            .enumerate()
            .map(|(index, bond)| {
                bond.order == BondOrder::Single
                    && !in_ring[index]
                    && !self.atoms[bond.a].is_hydrogen()
                    && !self.atoms[bond.b].is_hydrogen()
                    && self.heavy_degree(bond.a, &adj) >= 2
                    && self.heavy_degree(bond.b, &adj) >= 2
                    && !self.is_amide_bond(bond, &adj)
                    && !self.has_triple_bond(bond.a, &adj)
                    && !self.has_triple_bond(bond.b, &adj)
            })
            .collect()
    }

    pub fn rotatable_bond_count(&self) -> usize {
        self.rotatable_bonds().iter().filter(|r| **r).count()
    }

    /// Shortest-path bond counts from `source`, `usize::MAX` when unreachable.
    pub fn topological_distances(&self, source: usize, adj: &[Vec<(usize, usize)>]) -> Vec<usize> {
        let mut dist = vec![usize::MAX; self.atoms.len()];
        let mut queue = VecDeque::from([source]);
        dist[source] = 0;
        while let Some(atom) = queue.pop_front() {
            for &(next, _) in &adj[atom] {
                if dist[next] == usize::MAX {
                    dist[next] = dist[atom] + 1;
                    queue.push_back(next);
                }
            }
        }
        dist
    }
}

/// Components of the graph restricted to bonds accepted by `keep_bond`.
pub(crate) fn components_where(
    atom_count: usize,
    adj: &[Vec<(usize, usize)>],
    keep_bond: impl Fn(usize) -> bool,
) -> Vec<Vec<usize>> {
    let mut seen = vec![false; atom_count];
    let mut result = Vec::new();
    for start in 0..atom_count {
        if seen[start] {
            continue;
        }
        seen[start] = true;
        let mut component = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(atom) = queue.pop_front() {
            for &(next, bond) in &adj[atom] {
                if !seen[next] && keep_bond(bond) {
                    seen[next] = true;
                    component.push(next);
                    queue.push_back(next);
                }
            }
        }
        component.sort_unstable();
        result.push(component);
    }
    result
}
