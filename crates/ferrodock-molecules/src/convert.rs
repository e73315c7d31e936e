//! Structure conversion to the engine's charge-annotated input format.
//!
//! [`StructureConverter`] bundles the receptor and ligand preparers behind one
//! configuration so the job pipeline only deals with text in and files out.

use crate::error::Result;
use crate::ligand::{LigandPrepOptions, LigandPreparer, LigandReport};
use crate::protein::{ProteinPrepOptions, ProteinPreparer, ProteinReport};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Options for both halves of a docking input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreparationOptions {
    #[serde(default)]
    pub protein: ProteinPrepOptions,
    #[serde(default)]
    pub ligand: LigandPrepOptions,
}

#[derive(Debug, Clone, Default)]
pub struct StructureConverter {
    protein: ProteinPreparer,
    ligand: LigandPreparer,
}

impl StructureConverter {
    pub fn new(options: PreparationOptions) -> Self {
        Self {
            protein: ProteinPreparer::new(options.protein),
            ligand: LigandPreparer::new(options.ligand),
        }
    }

    /// Convert receptor PDB text to PDBQT text.
    pub fn protein_to_pdbqt(&self, pdb: &str) -> Result<(String, ProteinReport)> {
        self.protein.prepare(pdb)
    }

    /// Convert a SMILES string to a 3D ligand in PDBQT text.
    pub fn ligand_to_pdbqt(&self, smiles: &str) -> Result<(String, LigandReport)> {
        self.ligand.prepare(smiles)
    }

    /// Convert receptor PDB text and write the result to `out`.
    pub fn convert_protein(&self, pdb: &str, out: &Path) -> Result<ProteinReport> {
        let (text, report) = self.protein_to_pdbqt(pdb)?;
        write_output(out, &text)?;
        debug!(path = %out.display(), atoms = report.atoms_written, "Wrote receptor");
        Ok(report)
    }

    /// Convert a SMILES string and write the result to `out`.
    pub fn convert_ligand(&self, smiles: &str, out: &Path) -> Result<LigandReport> {
        let (text, report) = self.ligand_to_pdbqt(smiles)?;
        write_output(out, &text)?;
        debug!(path = %out.display(), torsions = report.torsions, "Wrote ligand");
        Ok(report)
    }
}

fn write_output(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    Ok(())
}
