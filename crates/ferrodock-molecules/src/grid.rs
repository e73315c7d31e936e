//! Search-box computation from atomic coordinates.

use crate::error::{MoleculeError, Result};
use crate::pdb::{ResidueSelection, Structure};
use ferrodock_common::params::{round2, DEFAULT_BOX_SIZE};
use ferrodock_common::GridBoxParams;
use nalgebra::Vector3;
use tracing::{debug, warn};

/// Padding added on every side of a binding-site extent, in Å.
pub const SITE_PADDING: f64 = 5.0;

/// Computes grid boxes. Stateless; every method is a pure function of its input.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridBoxCalculator;

impl GridBoxCalculator {
    /// Box centred on the mean of `coords`. Uses `size` (clamped) when given,
    /// else a default cube.
    pub fn from_coordinates(coords: &[Vector3<f64>], size: Option<[f64; 3]>) -> Result<GridBoxParams> {
        let center = mean_center(coords)?;
        let size = size.unwrap_or([DEFAULT_BOX_SIZE; 3]);
        Ok(GridBoxParams::new(center, size))
    }

    /// Box sized to the padded extent of `coords`.
    pub fn enclosing(coords: &[Vector3<f64>], padding: f64) -> Result<GridBoxParams> {
        let center = mean_center(coords)?;
        let (min, max) = extent(coords);
        let size = [
            (max.x - min.x) + 2.0 * padding,
            (max.y - min.y) + 2.0 * padding,
            (max.z - min.z) + 2.0 * padding,
        ];
        Ok(GridBoxParams::new(center, size))
    }

    /// Whole-structure box from PDB text.
    pub fn from_structure(pdb: &str, size: Option<[f64; 3]>) -> Result<GridBoxParams> {
        let structure = Structure::parse(pdb)?;
        Self::from_coordinates(&structure.positions(), size)
    }

    /// Box around the selected residues.
    ///
    /// An explicit `size` is honoured (clamped); otherwise the box is the
    /// padded extent of the selection. A selection matching no atoms falls
    /// back to the whole structure.
    pub fn for_binding_site(
        pdb: &str,
        selection: &ResidueSelection,
        size: Option<[f64; 3]>,
    ) -> Result<GridBoxParams> {
        let structure = Structure::parse(pdb)?;
        let site: Vec<Vector3<f64>> = structure.select(selection).map(|a| a.position).collect();

        if site.is_empty() {
            warn!(%selection, "Binding-site selection matched no atoms, using whole structure");
            return Self::from_coordinates(&structure.positions(), size);
        }

        debug!(%selection, atoms = site.len(), "Computing binding-site box");
        match size {
            Some(size) => Self::from_coordinates(&site, Some(size)),
            None => Self::enclosing(&site, SITE_PADDING),
        }
    }

    /// Box around a reference ligand's heavy atoms, padded by `padding` Å.
    pub fn around_reference(ligand_pdb: &str, padding: f64) -> Result<GridBoxParams> {
        let structure = Structure::parse(ligand_pdb)?;
        let heavy: Vec<Vector3<f64>> = structure
            .atoms
            .iter()
            .filter(|a| !a.is_hydrogen())
            .map(|a| a.position)
            .collect();
        Self::enclosing(&heavy, padding)
    }
}

fn mean_center(coords: &[Vector3<f64>]) -> Result<[f64; 3]> {
    if coords.is_empty() {
        return Err(MoleculeError::EmptyCoordinates);
    }
    let sum = coords.iter().fold(Vector3::zeros(), |acc, c| acc + c);
    let mean = sum / coords.len() as f64;
    Ok([round2(mean.x), round2(mean.y), round2(mean.z)])
}

fn extent(coords: &[Vector3<f64>]) -> (Vector3<f64>, Vector3<f64>) {
    let mut min = Vector3::repeat(f64::MAX);
    let mut max = Vector3::repeat(f64::MIN);
    for c in coords {
        min = min.inf(c);
        max = max.sup(c);
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdb::fixtures::MINI_PROTEIN;

    #[test]
    fn test_two_atoms_default_cube() {
        let coords = [Vector3::new(0.0, 0.0, 0.0), Vector3::new(10.0, 0.0, 0.0)];
        let grid = GridBoxCalculator::from_coordinates(&coords, None).unwrap();
        assert_eq!(grid.center(), [5.0, 0.0, 0.0]);
        assert_eq!(grid.size(), [25.0, 25.0, 25.0]);
    }

    #[test]
    fn test_requested_size_is_clamped() {
        let coords = [Vector3::new(1.0, 2.0, 3.0)];
        let grid = GridBoxCalculator::from_coordinates(&coords, Some([5.0, 5.0, 5.0])).unwrap();
        assert_eq!(grid.size(), [10.0, 10.0, 10.0]);
        let grid = GridBoxCalculator::from_coordinates(&coords, Some([80.0, 30.0, 12.5])).unwrap();
        assert_eq!(grid.size(), [50.0, 30.0, 12.5]);
    }

    #[test]
    fn test_empty_coordinates_error() {
        let err = GridBoxCalculator::from_coordinates(&[], None).unwrap_err();
        assert_eq!(err.to_string(), "no atom coordinates found");
    }

    #[test]
    fn test_center_within_extent() {
        let coords = [
            Vector3::new(-3.3, 4.1, 0.0),
            Vector3::new(7.77, -2.0, 1.5),
            Vector3::new(0.01, 0.02, 9.99),
        ];
        let grid = GridBoxCalculator::from_coordinates(&coords, None).unwrap();
        let (min, max) = extent(&coords);
        for (axis, c) in grid.center().iter().enumerate() {
            assert!(*c >= min[axis] - 0.005 && *c <= max[axis] + 0.005);
        }
        assert!((grid.center_x - 1.49).abs() < 1e-9);
    }

    #[test]
    fn test_binding_site_uses_padded_extent() {
        let selection: ResidueSelection = "A:2".parse().unwrap();
        let grid = GridBoxCalculator::for_binding_site(MINI_PROTEIN, &selection, None).unwrap();
        // SER A 2 spans 3.372 Å in x and 3.2 Å in y
        assert!((grid.size_x - 13.372).abs() < 1e-6);
        assert!((grid.size_y - 13.2).abs() < 1e-6);
    }

    #[test]
    fn test_unmatched_selection_falls_back_to_whole_structure() {
        let selection: ResidueSelection = "Z:999".parse().unwrap();
        let site = GridBoxCalculator::for_binding_site(MINI_PROTEIN, &selection, None).unwrap();
        let whole = GridBoxCalculator::from_structure(MINI_PROTEIN, None).unwrap();
        assert_eq!(site, whole);
    }
}
