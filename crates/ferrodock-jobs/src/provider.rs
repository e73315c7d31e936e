//! Sources of target structures and candidate ligands.
//!
//! The discovery side of the system supplies a protein structure per target
//! and a SMILES string per candidate. The pipeline only sees this trait.

use async_trait::async_trait;
use ferrodock_common::{DockingError, Result};
use ferrodock_molecules::ResidueSelection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// A receptor structure plus an optional binding-site hint.
#[derive(Debug, Clone)]
pub struct TargetStructure {
    /// PDB text.
    pub pdb: String,
    pub binding_site: Option<ResidueSelection>,
}

#[async_trait]
pub trait StructureProvider: Send + Sync {
    async fn target_structure(&self, target_id: &str) -> Result<TargetStructure>;

    async fn candidate_smiles(&self, candidate_id: &str) -> Result<String>;
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
pub struct InMemoryStructureProvider {
    targets: RwLock<HashMap<String, TargetStructure>>,
    candidates: RwLock<HashMap<String, String>>,
}

impl InMemoryStructureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_target(&self, target_id: &str, structure: TargetStructure) {
        self.targets.write().await.insert(target_id.to_string(), structure);
    }

    pub async fn add_candidate(&self, candidate_id: &str, smiles: &str) {
        self.candidates.write().await.insert(candidate_id.to_string(), smiles.to_string());
    }
}

#[async_trait]
impl StructureProvider for InMemoryStructureProvider {
    async fn target_structure(&self, target_id: &str) -> Result<TargetStructure> {
        self.targets
            .read()
            .await
            .get(target_id)
            .cloned()
            .ok_or_else(|| DockingError::Validation(format!("no structure for target {target_id}")))
    }

    async fn candidate_smiles(&self, candidate_id: &str) -> Result<String> {
        self.candidates
            .read()
            .await
            .get(candidate_id)
            .cloned()
            .ok_or_else(|| DockingError::Validation(format!("no SMILES for candidate {candidate_id}")))
    }
}

// =============================================================================
// Directory layout
// =============================================================================

/// Reads `targets/<id>.pdb`, optional `targets/<id>.site` and
/// `candidates/<id>.smi` under a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryStructureProvider {
    root: PathBuf,
}

/// Ids become file names, so only a conservative character set is allowed.
fn check_id(kind: &str, id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(DockingError::Validation(format!("invalid {kind} id: {id:?}")))
    }
}

impl DirectoryStructureProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_path(&self, target_id: &str, extension: &str) -> PathBuf {
        self.root.join("targets").join(format!("{target_id}.{extension}"))
    }

    fn candidate_path(&self, candidate_id: &str) -> PathBuf {
        self.root.join("candidates").join(format!("{candidate_id}.smi"))
    }

    /// Store a target structure (and binding site) for later jobs.
    pub async fn register_target(&self, target_id: &str, pdb: &str, site: Option<&ResidueSelection>) -> Result<()> {
        check_id("target", target_id)?;
        tokio::fs::create_dir_all(self.root.join("targets")).await?;
        tokio::fs::write(self.target_path(target_id, "pdb"), pdb).await?;
        let site_path = self.target_path(target_id, "site");
        match site {
            Some(site) => tokio::fs::write(&site_path, format!("{site}\n")).await?,
            None if site_path.exists() => tokio::fs::remove_file(&site_path).await?,
            None => {}
        }
        debug!(target_id, "Registered target structure");
        Ok(())
    }

    pub async fn register_candidate(&self, candidate_id: &str, smiles: &str) -> Result<()> {
        check_id("candidate", candidate_id)?;
        tokio::fs::create_dir_all(self.root.join("candidates")).await?;
        tokio::fs::write(self.candidate_path(candidate_id), format!("{}\n", smiles.trim())).await?;
        debug!(candidate_id, "Registered candidate");
        Ok(())
    }
}

async fn read_input(kind: &str, id: &str, path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DockingError::Validation(format!(
            "no {kind} input for {id} at {}",
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl StructureProvider for DirectoryStructureProvider {
    async fn target_structure(&self, target_id: &str) -> Result<TargetStructure> {
        check_id("target", target_id)?;
        let pdb = read_input("target", target_id, &self.target_path(target_id, "pdb")).await?;

        let site_path = self.target_path(target_id, "site");
        let binding_site = if site_path.exists() {
            let raw = tokio::fs::read_to_string(&site_path).await?;
            let site = raw
                .trim()
                .parse::<ResidueSelection>()
                .map_err(|e| DockingError::Validation(format!("bad binding site for {target_id}: {e}")))?;
            Some(site)
        } else {
            None
        };
        Ok(TargetStructure { pdb, binding_site })
    }

    async fn candidate_smiles(&self, candidate_id: &str) -> Result<String> {
        check_id("candidate", candidate_id)?;
        let raw = read_input("candidate", candidate_id, &self.candidate_path(candidate_id)).await?;
        // First token of the first non-comment line, as in .smi files.
        raw.lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .and_then(|line| line.split_whitespace().next())
            .map(str::to_string)
            .ok_or_else(|| DockingError::Validation(format!("empty SMILES file for candidate {candidate_id}")))
    }
}
