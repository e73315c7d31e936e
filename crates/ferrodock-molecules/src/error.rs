//! Error types for structure preparation and engine control.

use ferrodock_common::DockingError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MoleculeError>;

#[derive(Debug, Error)]
pub enum MoleculeError {
    #[error("no atom coordinates found")]
    EmptyCoordinates,

    #[error("Invalid SMILES '{input}': {reason}")]
    InvalidSmiles { input: String, reason: String },

    #[error("Structure parse error: {0}")]
    StructureParse(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Charge assignment failed: {0}")]
    Charges(String),

    #[error("{role} file not found: {}", path.display())]
    MissingFile { role: &'static str, path: PathBuf },

    #[error("Docking engine not found (searched: {searched})")]
    EngineNotFound { searched: String },

    #[error("Docking engine failed: {0}")]
    Execution(String),

    #[error("Docking engine timed out after {0}s")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MoleculeError> for DockingError {
    fn from(err: MoleculeError) -> Self {
        match err {
            MoleculeError::EmptyCoordinates
            | MoleculeError::InvalidSmiles { .. }
            | MoleculeError::StructureParse(_)
            | MoleculeError::Embedding(_)
            | MoleculeError::Charges(_)
            | MoleculeError::MissingFile { .. } => DockingError::Validation(err.to_string()),
            MoleculeError::EngineNotFound { .. }
            | MoleculeError::Execution(_)
            | MoleculeError::Timeout(_) => DockingError::Execution(err.to_string()),
            MoleculeError::Io(e) => DockingError::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_names_role() {
        let err = MoleculeError::MissingFile { role: "receptor", path: PathBuf::from("/tmp/r.pdbqt") };
        assert_eq!(err.to_string(), "receptor file not found: /tmp/r.pdbqt");
        assert!(matches!(DockingError::from(err), DockingError::Validation(_)));
    }

    #[test]
    fn test_timeout_maps_to_execution() {
        let err: DockingError = MoleculeError::Timeout(1800).into();
        assert!(matches!(err, DockingError::Execution(msg) if msg.contains("1800")));
    }
}
