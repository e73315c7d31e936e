//! Command handlers. Each returns the JSON document printed on stdout.

use anyhow::Context;
use ferrodock_common::{DockingParams, GridBoxParams};
use ferrodock_db::{Database, JobFilter};
use ferrodock_jobs::{
    sweep, DirectoryStructureProvider, DockingPipeline, JobService, SubmitRequest, TaskRunner,
};
use ferrodock_molecules::{DockingExecutor, GridBoxCalculator, ResidueSelection, StructureConverter};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::JobArgs;

pub struct App {
    config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn provider(&self) -> DirectoryStructureProvider {
        DirectoryStructureProvider::new(&self.config.structures.inputs_dir)
    }

    fn workspace(&self) -> PathBuf {
        PathBuf::from(&self.config.workspace.path)
    }

    async fn service(&self) -> anyhow::Result<Arc<JobService>> {
        let url = &self.config.database.url;
        ensure_database_dir(url)?;
        let db = Database::open(url, self.config.database.max_connections).await?;
        db.initialize().await?;
        Ok(Arc::new(JobService::new(Arc::new(db), self.config.job_settings())))
    }

    fn runner(&self, service: Arc<JobService>, workers: Option<usize>) -> anyhow::Result<Arc<TaskRunner>> {
        let executor = DockingExecutor::from_options(&self.config.engine_options())?;
        let converter = StructureConverter::new(self.config.preparation_options());
        let pipeline = DockingPipeline::new(converter, executor, Arc::new(self.provider()), self.workspace());

        let mut settings = self.config.runner_settings();
        if let Some(workers) = workers {
            settings.workers = workers.max(1);
        }
        Ok(Arc::new(TaskRunner::new(service, Arc::new(pipeline), self.config.retry_policy(), settings)))
    }

    // ── Workers ─────────────────────────────────────────────────────────────

    pub async fn worker(&self, workers: Option<usize>) -> anyhow::Result<()> {
        let service = self.service().await?;
        let runner = self.runner(service, workers)?;
        let handle = runner.start().await?;

        info!("ferrodock worker ready. Press Ctrl+C to stop.");
        tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
        info!("Shutting down, waiting for running jobs");
        handle.shutdown().await;
        Ok(())
    }

    // ── Submission ──────────────────────────────────────────────────────────

    async fn register_target(&self, job: &JobArgs) -> anyhow::Result<()> {
        let Some(pdb_path) = &job.pdb else { return Ok(()) };
        let pdb = std::fs::read_to_string(pdb_path).with_context(|| format!("reading {}", pdb_path.display()))?;
        let site = job.site.as_deref().map(str::parse::<ResidueSelection>).transpose()?;
        self.provider().register_target(&job.target, &pdb, site.as_ref()).await?;
        Ok(())
    }

    pub async fn submit(&self, candidate: &str, smiles: Option<&str>, run: bool, job: JobArgs) -> anyhow::Result<Value> {
        self.register_target(&job).await?;
        if let Some(smiles) = smiles {
            self.provider().register_candidate(candidate, smiles).await?;
        }

        let service = self.service().await?;
        let request = SubmitRequest {
            candidate_id: candidate.to_string(),
            ..submit_template(&job)?
        };
        let receipt = service.submit(request).await?;
        if !run {
            return Ok(serde_json::to_value(receipt)?);
        }

        let runner = self.runner(service.clone(), None)?;
        let status = runner.run_job(receipt.job_id).await?;
        info!(job_id = %receipt.job_id, %status, "Job run finished");
        match service.get_results(receipt.job_id).await {
            Ok(results) => Ok(serde_json::to_value(results)?),
            Err(_) => Ok(serde_json::to_value(service.get_status(receipt.job_id).await?)?),
        }
    }

    pub async fn submit_batch(
        &self,
        mut candidates: Vec<String>,
        smiles_file: Option<&Path>,
        job: JobArgs,
    ) -> anyhow::Result<Value> {
        self.register_target(&job).await?;
        if let Some(path) = smiles_file {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            let provider = self.provider();
            for (smiles, id) in parse_smiles_list(&text)? {
                provider.register_candidate(&id, &smiles).await?;
                candidates.push(id);
            }
        }

        let service = self.service().await?;
        let receipts = service.submit_batch(&candidates, submit_template(&job)?).await?;
        Ok(json!({ "count": receipts.len(), "jobs": receipts }))
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    pub async fn status(&self, job_id: Uuid) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(self.service().await?.get_status(job_id).await?)?)
    }

    pub async fn results(&self, job_id: Uuid) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(self.service().await?.get_results(job_id).await?)?)
    }

    pub async fn cancel(&self, job_id: Uuid, user: Option<&str>) -> anyhow::Result<Value> {
        let job = self.service().await?.cancel(job_id, user).await?;
        Ok(json!({ "job_id": job.id, "status": job.status, "message": job.error_message }))
    }

    pub async fn history(&self, filter: &JobFilter, limit: usize, offset: usize) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(self.service().await?.list_history(filter, limit, offset).await?)?)
    }

    pub async fn best(&self, target: &str, limit: usize) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(self.service().await?.best_results(target, limit).await?)?)
    }

    pub async fn stats(&self) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(self.service().await?.stats().await?)?)
    }

    pub async fn cleanup(&self) -> anyhow::Result<Value> {
        let service = self.service().await?;
        let report = sweep(&service, &self.workspace()).await?;
        Ok(serde_json::to_value(report)?)
    }

    // ── Engine and structures ───────────────────────────────────────────────

    pub async fn engine(&self) -> anyhow::Result<Value> {
        let executor = DockingExecutor::from_options(&self.config.engine_options())?;
        let available = executor.is_available().await;
        if !available {
            warn!(engine = %executor.command(), "Docking engine did not respond to --help");
        }
        Ok(json!({
            "command": executor.command().to_string(),
            "available": available,
            "version": executor.version().await,
            "timeout_secs": executor.default_timeout().as_secs(),
        }))
    }

    pub fn prepare_ligand(&self, smiles: &str, out: &Path) -> anyhow::Result<Value> {
        let converter = StructureConverter::new(self.config.preparation_options());
        let report = converter.convert_ligand(smiles, out)?;
        Ok(json!({ "out": out.display().to_string(), "report": report }))
    }

    pub fn prepare_receptor(&self, pdb: &Path, out: &Path) -> anyhow::Result<Value> {
        let text = std::fs::read_to_string(pdb).with_context(|| format!("reading {}", pdb.display()))?;
        let converter = StructureConverter::new(self.config.preparation_options());
        let report = converter.convert_protein(&text, out)?;
        Ok(json!({ "out": out.display().to_string(), "report": report }))
    }

    pub fn grid(&self, pdb: &Path, site: Option<&str>, reference: Option<&Path>, padding: f64) -> anyhow::Result<Value> {
        let grid = match (site, reference) {
            (_, Some(reference)) => {
                let text = std::fs::read_to_string(reference)
                    .with_context(|| format!("reading {}", reference.display()))?;
                GridBoxCalculator::around_reference(&text, padding)?
            }
            (Some(site), None) => {
                let text = std::fs::read_to_string(pdb).with_context(|| format!("reading {}", pdb.display()))?;
                GridBoxCalculator::for_binding_site(&text, &site.parse::<ResidueSelection>()?, None)?
            }
            (None, None) => {
                let text = std::fs::read_to_string(pdb).with_context(|| format!("reading {}", pdb.display()))?;
                GridBoxCalculator::from_structure(&text, None)?
            }
        };
        Ok(serde_json::to_value(grid)?)
    }
}

/// Request fields shared by every candidate of a submission.
fn submit_template(job: &JobArgs) -> anyhow::Result<SubmitRequest> {
    let grid_params = match (&job.center, &job.size) {
        (Some(center), Some(size)) => Some(GridBoxParams::new(triple(center)?, triple(size)?)),
        _ => None,
    };
    Ok(SubmitRequest {
        candidate_id: String::new(),
        target_id: job.target.clone(),
        disease_name: job.disease.clone(),
        user_id: job.user.clone(),
        grid_params,
        docking_params: DockingParams {
            exhaustiveness: job.exhaustiveness,
            num_modes: job.num_modes,
            energy_range: job.energy_range,
            cpu: job.cpu,
            seed: job.seed,
        },
    })
}

fn triple(values: &[f64]) -> anyhow::Result<[f64; 3]> {
    <[f64; 3]>::try_from(values).map_err(|_| anyhow::anyhow!("expected x,y,z, got {} values", values.len()))
}

/// `SMILES ID` pairs from a .smi listing; lines without an id are rejected.
fn parse_smiles_list(text: &str) -> anyhow::Result<Vec<(String, String)>> {
    let mut entries = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(smiles), Some(id)) => entries.push((smiles.to_string(), id.to_string())),
            _ => anyhow::bail!("line {}: expected `SMILES ID`", number + 1),
        }
    }
    if entries.is_empty() {
        anyhow::bail!("no candidates in SMILES listing");
    }
    Ok(entries)
}

/// Create the parent directory of a file-backed SQLite URL.
fn ensure_database_dir(url: &str) -> anyhow::Result<()> {
    let path = url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_args() -> JobArgs {
        JobArgs {
            target: "EGFR".into(),
            user: Some("alice".into()),
            disease: None,
            pdb: None,
            site: None,
            center: Some(vec![1.0, 2.0, 3.0]),
            size: Some(vec![5.0, 20.0, 80.0]),
            exhaustiveness: 16,
            num_modes: 9,
            energy_range: 3.0,
            cpu: None,
            seed: Some(7),
        }
    }

    #[test]
    fn test_submit_template_clamps_box() {
        let request = submit_template(&job_args()).unwrap();
        let grid = request.grid_params.unwrap();
        assert_eq!(grid.size(), [10.0, 20.0, 50.0]);
        assert_eq!(request.docking_params.exhaustiveness, 16);
        assert_eq!(request.docking_params.seed, Some(7));
        assert_eq!(request.user_id.as_deref(), Some("alice"));
    }

    #[test]
    fn test_parse_smiles_list() {
        let entries = parse_smiles_list("# header\nCCO ethanol\n\nc1ccccc1 benzene extra\n").unwrap();
        assert_eq!(entries, vec![("CCO".into(), "ethanol".into()), ("c1ccccc1".into(), "benzene".into())]);
        assert!(parse_smiles_list("CCO\n").is_err());
        assert!(parse_smiles_list("# nothing\n").is_err());
    }

    #[test]
    fn test_ensure_database_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested/deeper/ferrodock.db");
        ensure_database_dir(&format!("sqlite://{}", db.display())).unwrap();
        assert!(db.parent().unwrap().is_dir());
        ensure_database_dir("sqlite::memory:").unwrap();
    }

    #[tokio::test]
    async fn test_queue_commands_against_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.url = format!("sqlite://{}", dir.path().join("db/ferrodock.db").display());
        config.workspace.path = dir.path().join("jobs").display().to_string();
        config.structures.inputs_dir = dir.path().join("inputs").display().to_string();
        let app = App::new(config);

        let mut job = job_args();
        job.center = None;
        job.size = None;
        let receipt = app.submit("ethanol", Some("CCO"), false, job).await.unwrap();
        assert_eq!(receipt["queue_position"], 1);
        let job_id: Uuid = receipt["job_id"].as_str().unwrap().parse().unwrap();

        let status = app.status(job_id).await.unwrap();
        assert_eq!(status["status"], "queued");
        assert!(app.results(job_id).await.is_err());

        let cancelled = app.cancel(job_id, Some("alice")).await.unwrap();
        assert_eq!(cancelled["status"], "cancelled");
        assert!(dir.path().join("inputs/candidates/ethanol.smi").exists());

        let history = app.history(&JobFilter::default(), 10, 0).await.unwrap();
        assert_eq!(history["total"], 1);
    }
}
