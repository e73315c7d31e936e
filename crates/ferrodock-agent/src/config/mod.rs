//! Configuration loading for ferrodock.
//! Reads ferrodock.toml from the current directory or the path in FERRODOCK_CONFIG.
//! Every field has a default, so a partial file (or none at all) is valid.

use anyhow::Context;
use ferrodock_jobs::{JobSettings, RetryPolicy, RunnerSettings};
use ferrodock_molecules::{EngineOptions, LigandPrepOptions, PreparationOptions, ProteinPrepOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "FERRODOCK_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "ferrodock.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub preparation: PreparationConfig,
    #[serde(default)]
    pub structures: StructuresConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String { "sqlite://./data/ferrodock.db".to_string() }
fn default_max_connections() -> u32 { 5 }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine executable (path or name). Discovered when unset.
    #[serde(default)]
    pub binary: Option<String>,
    /// Wrapper placed before the engine, e.g. `["docker", "run", "--rm", "vina-image"]`.
    #[serde(default)]
    pub launcher: Vec<String>,
    #[serde(default)]
    pub tools_dir: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 { 1800 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: None,
            launcher: Vec::new(),
            tools_dir: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_poll_secs")]
    pub dispatch_interval_secs: u64,
    #[serde(default = "default_poll_secs")]
    pub cancel_poll_interval_secs: u64,
}

fn default_worker_count() -> usize { 2 }
fn default_poll_secs() -> u64 { 5 }

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            dispatch_interval_secs: default_poll_secs(),
            cancel_poll_interval_secs: default_poll_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_max_retries() -> u32 { 2 }
fn default_initial_backoff_secs() -> u64 { 60 }
fn default_max_backoff_secs() -> u64 { 300 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_secs: default_initial_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_max_active_per_user")]
    pub max_active_per_user: u64,
    #[serde(default = "default_estimate_minutes")]
    pub estimate_minutes: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_cleanup_interval_minutes")]
    pub cleanup_interval_minutes: u64,
    #[serde(default = "default_history_max_limit")]
    pub history_max_limit: usize,
}

fn default_max_active_per_user() -> u64 { 100 }
fn default_estimate_minutes() -> u64 { 5 }
fn default_retention_days() -> i64 { 7 }
fn default_cleanup_interval_minutes() -> u64 { 60 }
fn default_history_max_limit() -> usize { 100 }

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_active_per_user: default_max_active_per_user(),
            estimate_minutes: default_estimate_minutes(),
            retention_days: default_retention_days(),
            cleanup_interval_minutes: default_cleanup_interval_minutes(),
            history_max_limit: default_history_max_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparationConfig {
    #[serde(default = "bool_true")]
    pub add_hydrogens: bool,
    #[serde(default = "bool_true")]
    pub keep_metals: bool,
    #[serde(default = "bool_true")]
    pub keep_cofactors: bool,
    #[serde(default = "bool_true")]
    pub remove_water: bool,
    #[serde(default = "default_ligand_seed")]
    pub ligand_seed: u64,
    #[serde(default = "bool_true")]
    pub optimize_ligand: bool,
    #[serde(default = "bool_true")]
    pub torsion_tree: bool,
}

fn bool_true() -> bool { true }
fn default_ligand_seed() -> u64 { 42 }

impl Default for PreparationConfig {
    fn default() -> Self {
        Self {
            add_hydrogens: true,
            keep_metals: true,
            keep_cofactors: true,
            remove_water: true,
            ligand_seed: default_ligand_seed(),
            optimize_ligand: true,
            torsion_tree: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuresConfig {
    /// Root of `targets/` and `candidates/`.
    #[serde(default = "default_inputs_dir")]
    pub inputs_dir: String,
}

fn default_inputs_dir() -> String { "./data/inputs".to_string() }

impl Default for StructuresConfig {
    fn default() -> Self {
        Self { inputs_dir: default_inputs_dir() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Parent of the per-job working directories.
    #[serde(default = "default_workspace_path")]
    pub path: String,
}

fn default_workspace_path() -> String { "./data/jobs".to_string() }

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self { path: default_workspace_path() }
    }
}

mod tests;

impl Config {
    /// Load configuration from `explicit`, else FERRODOCK_CONFIG, else
    /// ./ferrodock.toml. A missing file yields the defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => std::env::var(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE)),
        };

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using defaults. Copy ferrodock.example.toml to ferrodock.toml to customise."
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = Self::from_toml(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.workers.count == 0 {
            anyhow::bail!("workers.count must be at least 1");
        }
        if self.engine.timeout_secs == 0 {
            anyhow::bail!("engine.timeout_secs must be positive");
        }
        if self.retry.initial_backoff_secs > self.retry.max_backoff_secs {
            anyhow::bail!(
                "retry.initial_backoff_secs ({}) exceeds retry.max_backoff_secs ({})",
                self.retry.initial_backoff_secs,
                self.retry.max_backoff_secs
            );
        }
        if self.jobs.retention_days < 0 {
            anyhow::bail!("jobs.retention_days must not be negative");
        }
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            binary: self.engine.binary.as_ref().map(PathBuf::from),
            launcher: self.engine.launcher.clone(),
            tools_dir: self.engine.tools_dir.as_ref().map(PathBuf::from),
            timeout: Duration::from_secs(self.engine.timeout_secs),
        }
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            max_active_per_user: self.jobs.max_active_per_user,
            job_estimate: Duration::from_secs(self.jobs.estimate_minutes * 60),
            retention: chrono::Duration::days(self.jobs.retention_days),
            history_max_limit: self.jobs.history_max_limit,
        }
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            workers: self.workers.count,
            dispatch_interval: Duration::from_secs(self.workers.dispatch_interval_secs.max(1)),
            cancel_poll_interval: Duration::from_secs(self.workers.cancel_poll_interval_secs.max(1)),
            cleanup_interval: Duration::from_secs(self.jobs.cleanup_interval_minutes.max(1) * 60),
            workspace: PathBuf::from(&self.workspace.path),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            initial_backoff: Duration::from_secs(self.retry.initial_backoff_secs),
            max_backoff: Duration::from_secs(self.retry.max_backoff_secs),
        }
    }

    pub fn preparation_options(&self) -> PreparationOptions {
        let prep = &self.preparation;
        PreparationOptions {
            protein: ProteinPrepOptions {
                add_hydrogens: prep.add_hydrogens,
                keep_metals: prep.keep_metals,
                keep_cofactors: prep.keep_cofactors,
                remove_water: prep.remove_water,
            },
            ligand: LigandPrepOptions {
                seed: prep.ligand_seed,
                optimize: prep.optimize_ligand,
                torsion_tree: prep.torsion_tree,
            },
        }
    }
}
