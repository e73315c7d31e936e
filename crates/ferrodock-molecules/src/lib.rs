//! ferrodock Molecules - Structure preparation and docking engine control.
//!
//! The per-job docking pipeline is built from these pieces:
//! 1. Computing the search box (`grid`)
//! 2. Converting the receptor and ligand to PDBQT (`convert`, `protein`, `ligand`)
//! 3. Writing the engine configuration (`vina_config`)
//! 4. Running the engine under a timeout (`docking`)
//! 5. Parsing ranked poses from its output (`results`)

pub mod error;
pub mod element;
pub mod pdb;
pub mod grid;
pub mod molecule;
pub mod smiles;
pub mod conformer;
pub mod charges;
pub mod pdbqt;
pub mod protein;
pub mod ligand;
pub mod convert;
pub mod vina_config;
pub mod docking;
pub mod results;

pub use convert::{PreparationOptions, StructureConverter};
pub use docking::{DockingExecutor, EngineCommand, EngineOptions, ExecutionOutcome, DEFAULT_TIMEOUT};
pub use error::{MoleculeError, Result};
pub use grid::GridBoxCalculator;
pub use ligand::{LigandPrepOptions, LigandReport};
pub use pdb::ResidueSelection;
pub use protein::{ProteinPrepOptions, ProteinReport};
pub use results::{best_pose, parse_combined, summary_statistics, DockedPose, PoseSummary};
pub use vina_config::{ConfigGenerator, DockingConfig, REQUIRED_KEYS};
