//! Engine configuration files (`key = value`, one per line).

use crate::error::{MoleculeError, Result};
use ferrodock_common::{DockingParams, GridBoxParams};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Keys every generated configuration carries. `seed` is optional.
pub const REQUIRED_KEYS: [&str; 13] = [
    "receptor",
    "ligand",
    "out",
    "center_x",
    "center_y",
    "center_z",
    "size_x",
    "size_y",
    "size_z",
    "exhaustiveness",
    "num_modes",
    "energy_range",
    "cpu",
];

/// Configuration for a docking run.
#[derive(Debug, Clone)]
pub struct DockingConfig {
    pub receptor: PathBuf,
    pub ligand: PathBuf,
    pub out: PathBuf,
    pub grid: GridBoxParams,
    pub params: DockingParams,
    /// Written into the header for traceability.
    pub job_id: Option<Uuid>,
}

impl DockingConfig {
    pub fn new(receptor: impl Into<PathBuf>, ligand: impl Into<PathBuf>, out: impl Into<PathBuf>, grid: GridBoxParams) -> Self {
        Self {
            receptor: receptor.into(),
            ligand: ligand.into(),
            out: out.into(),
            grid,
            params: DockingParams::default(),
            job_id: None,
        }
    }

    pub fn with_params(mut self, params: DockingParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_job_id(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

/// Number of CPUs used when the parameters leave `cpu` unset.
pub fn default_cpu() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigGenerator;

impl ConfigGenerator {
    /// Render the configuration text without touching the filesystem.
    pub fn render(config: &DockingConfig) -> String {
        let grid = &config.grid;
        let params = &config.params;
        let cpu = params.cpu.map(|c| c as usize).unwrap_or_else(default_cpu);

        let mut text = String::from("# ferrodock docking configuration\n");
        if let Some(job_id) = config.job_id {
            let _ = writeln!(text, "# job_id: {job_id}");
        }
        let _ = writeln!(text);
        let _ = writeln!(text, "receptor = {}", config.receptor.display());
        let _ = writeln!(text, "ligand = {}", config.ligand.display());
        let _ = writeln!(text, "out = {}", config.out.display());
        let _ = writeln!(text);
        let _ = writeln!(text, "center_x = {:.2}", grid.center_x);
        let _ = writeln!(text, "center_y = {:.2}", grid.center_y);
        let _ = writeln!(text, "center_z = {:.2}", grid.center_z);
        let _ = writeln!(text, "size_x = {:.2}", grid.size_x);
        let _ = writeln!(text, "size_y = {:.2}", grid.size_y);
        let _ = writeln!(text, "size_z = {:.2}", grid.size_z);
        let _ = writeln!(text);
        let _ = writeln!(text, "exhaustiveness = {}", params.exhaustiveness);
        let _ = writeln!(text, "num_modes = {}", params.num_modes);
        let _ = writeln!(text, "energy_range = {:.2}", params.energy_range);
        let _ = writeln!(text, "cpu = {cpu}");
        if let Some(seed) = params.seed {
            let _ = writeln!(text, "seed = {seed}");
        }
        text
    }

    /// Write the configuration to `path`. Receptor and ligand must exist.
    pub fn generate(config: &DockingConfig, path: &Path) -> Result<PathBuf> {
        for (role, file) in [("receptor", &config.receptor), ("ligand", &config.ligand)] {
            if !file.is_file() {
                return Err(MoleculeError::MissingFile { role, path: file.clone() });
            }
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::render(config))?;
        debug!(path = %path.display(), job_id = ?config.job_id, "Wrote docking configuration");
        Ok(path.to_path_buf())
    }

    /// Parse `key = value` lines, skipping blanks and `#` comments.
    pub fn read_entries(path: &Path) -> Result<BTreeMap<String, String>> {
        let text = std::fs::read_to_string(path)?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect())
    }

    /// True iff `path` exists and defines every required key.
    pub fn validate(path: &Path) -> bool {
        match Self::read_entries(path) {
            Ok(entries) => REQUIRED_KEYS.iter().all(|key| entries.contains_key(*key)),
            Err(_) => false,
        }
    }
}
