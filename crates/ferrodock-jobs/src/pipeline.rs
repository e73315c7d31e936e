//! The per-job docking pipeline.
//!
//! convert receptor and ligand → compute the box → write the config →
//! run the engine → parse poses. One working directory per job; nothing is
//! shared between jobs.

use ferrodock_common::{DockingError, GridBoxParams, Result};
use ferrodock_db::Job;
use ferrodock_molecules::{
    parse_combined, ConfigGenerator, DockedPose, DockingConfig, DockingExecutor, GridBoxCalculator,
    StructureConverter,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::provider::StructureProvider;
use crate::service::JobFiles;

pub const RECEPTOR_FILE: &str = "receptor.pdbqt";
pub const LIGAND_FILE: &str = "ligand.pdbqt";
pub const OUTPUT_FILE: &str = "docked.pdbqt";
pub const CONFIG_FILE: &str = "config.txt";
pub const LOG_FILE: &str = "engine.log";

/// How a pipeline run ended when no error was raised.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// The engine ran to completion; `poses` may still be empty.
    Docked { poses: Vec<DockedPose>, files: JobFiles },
    /// Cancellation was signalled before or during the run.
    Cancelled,
}

pub struct DockingPipeline {
    converter: Arc<StructureConverter>,
    executor: Arc<DockingExecutor>,
    provider: Arc<dyn StructureProvider>,
    workspace: PathBuf,
    timeout: Duration,
}

impl DockingPipeline {
    pub fn new(
        converter: StructureConverter,
        executor: DockingExecutor,
        provider: Arc<dyn StructureProvider>,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        let timeout = executor.default_timeout();
        Self {
            converter: Arc::new(converter),
            executor: Arc::new(executor),
            provider,
            workspace: workspace.into(),
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        job_dir(&self.workspace, job_id)
    }

    /// Run every step for `job`. Errors are returned to the caller, which
    /// owns retry and status handling.
    #[instrument(skip(self, job, cancel), fields(job_id = %job.id, candidate = %job.candidate_id, target = %job.target_id))]
    pub async fn run(&self, job: &Job, cancel: watch::Receiver<bool>) -> Result<PipelineOutcome> {
        if *cancel.borrow() {
            return Ok(PipelineOutcome::Cancelled);
        }

        let dir = self.job_dir(job.id);
        tokio::fs::create_dir_all(&dir).await?;
        let receptor = dir.join(RECEPTOR_FILE);
        let ligand = dir.join(LIGAND_FILE);
        let output = dir.join(OUTPUT_FILE);

        let target = self.provider.target_structure(&job.target_id).await?;
        let smiles = self.provider.candidate_smiles(&job.candidate_id).await?;

        // Conversion and embedding are CPU-bound.
        let converter = self.converter.clone();
        let explicit_box = job.grid_params;
        let (receptor_out, ligand_out) = (receptor.clone(), ligand.clone());
        let grid = tokio::task::spawn_blocking(move || -> Result<GridBoxParams> {
            let protein = converter.convert_protein(&target.pdb, &receptor_out)?;
            let ligand = converter.convert_ligand(&smiles, &ligand_out)?;
            debug!(
                receptor_atoms = protein.atoms_written,
                ligand_atoms = ligand.atoms_written,
                torsions = ligand.torsions,
                "Structures converted"
            );
            let grid = match (explicit_box, &target.binding_site) {
                (Some(grid), _) => {
                    grid.validate()?;
                    grid.clamped()
                }
                (None, Some(site)) => GridBoxCalculator::for_binding_site(&target.pdb, site, None)?,
                (None, None) => GridBoxCalculator::from_structure(&target.pdb, None)?,
            };
            Ok(grid)
        })
        .await
        .map_err(|e| DockingError::Execution(format!("structure preparation task failed: {e}")))??;
        info!(center = ?grid.center(), size = ?grid.size(), "Structures prepared");

        let config = DockingConfig::new(&receptor, &ligand, &output, grid)
            .with_params(job.docking_params.clone())
            .with_job_id(job.id);
        let config_path = ConfigGenerator::generate(&config, &dir.join(CONFIG_FILE))?;

        let outcome = self.executor.execute_cancellable(&config_path, self.timeout, cancel).await;
        let log = format!("{}\n--- stderr ---\n{}", outcome.stdout, outcome.stderr);
        if let Err(e) = tokio::fs::write(dir.join(LOG_FILE), log).await {
            debug!(error = %e, "Could not write engine log");
        }
        if outcome.cancelled {
            info!("Docking run cancelled");
            return Ok(PipelineOutcome::Cancelled);
        }
        let stdout = outcome.into_result()?;

        let poses = parse_combined(&stdout, Some(&output));
        info!(poses = poses.len(), "Docking run finished");
        Ok(PipelineOutcome::Docked {
            poses,
            files: JobFiles {
                protein: Some(receptor.display().to_string()),
                ligand: Some(ligand.display().to_string()),
                output: Some(output.display().to_string()),
            },
        })
    }
}

/// Working directory of `job_id` under `workspace`.
pub fn job_dir(workspace: &Path, job_id: Uuid) -> PathBuf {
    workspace.join(job_id.to_string())
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use crate::provider::{InMemoryStructureProvider, TargetStructure};
    use ferrodock_molecules::EngineCommand;

    pub(crate) const PROTEIN: &str = "\
ATOM      1  N   ALA A   1      11.104   6.134  -6.504  1.00  0.00           N
ATOM      2  CA  ALA A   1      11.639   6.071  -5.147  1.00  0.00           C
ATOM      3  C   ALA A   1      13.149   6.268  -5.167  1.00  0.00           C
ATOM      4  O   ALA A   1      13.678   6.810  -6.140  1.00  0.00           O
ATOM      5  CB  ALA A   1      11.005   7.140  -4.254  1.00  0.00           C
END
";

    /// Engine script printing a two-pose table and writing the output file
    /// named in the config.
    pub(crate) const ENGINE_OK: &str = r#"
out=$(grep '^out' "$2" | sed 's/^out = //')
cat > "$out" <<EOF
MODEL 1
REMARK VINA RESULT:    -8.500      0.000      0.000
ENDMDL
MODEL 2
REMARK VINA RESULT:    -7.900      1.234      2.456
ENDMDL
EOF
echo "mode |   affinity | dist from best mode"
echo "-----+------------+----------+----------"
echo "   1       -8.5      0.000      0.000"
echo "   2       -7.9      1.234      2.456"
"#;

    pub(crate) async fn provider() -> Arc<InMemoryStructureProvider> {
        let provider = InMemoryStructureProvider::new();
        provider
            .add_target("EGFR", TargetStructure { pdb: PROTEIN.to_string(), binding_site: None })
            .await;
        provider.add_candidate("ethanol", "CCO").await;
        Arc::new(provider)
    }

    pub(crate) fn executor(dir: &Path, script: &str) -> DockingExecutor {
        let path = dir.join("engine.sh");
        std::fs::write(&path, script).unwrap();
        DockingExecutor::new(EngineCommand {
            program: PathBuf::from("/bin/sh"),
            prefix_args: vec![path.display().to_string()],
        })
    }

    #[tokio::test]
    async fn test_pipeline_writes_inputs_and_parses_poses() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = DockingPipeline::new(
            StructureConverter::default(),
            executor(dir.path(), ENGINE_OK),
            provider().await,
            dir.path().join("jobs"),
        );
        let job = Job::new("ethanol".into(), "EGFR".into());
        let (_tx, rx) = watch::channel(false);

        let PipelineOutcome::Docked { poses, files } = pipeline.run(&job, rx).await.unwrap() else {
            panic!("expected a docked outcome");
        };
        assert_eq!(poses.len(), 2);
        assert_eq!(poses[0].affinity, -8.5);
        assert!(poses[1].structure.is_some());

        let job_dir = pipeline.job_dir(job.id);
        assert!(job_dir.join(RECEPTOR_FILE).exists());
        assert!(job_dir.join(LIGAND_FILE).exists());
        assert!(job_dir.join(LOG_FILE).exists());
        assert!(ConfigGenerator::validate(&job_dir.join(CONFIG_FILE)));
        assert_eq!(files.output, Some(job_dir.join(OUTPUT_FILE).display().to_string()));
    }

    #[tokio::test]
    async fn test_explicit_box_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = DockingPipeline::new(
            StructureConverter::default(),
            executor(dir.path(), ENGINE_OK),
            provider().await,
            dir.path().join("jobs"),
        );
        let mut job = Job::new("ethanol".into(), "EGFR".into());
        job.grid_params = Some(GridBoxParams::new([1.0, 2.0, 3.0], [18.0, 18.0, 18.0]));
        let (_tx, rx) = watch::channel(false);
        pipeline.run(&job, rx).await.unwrap();

        let entries = ConfigGenerator::read_entries(&pipeline.job_dir(job.id).join(CONFIG_FILE)).unwrap();
        assert_eq!(entries["center_y"], "2.00");
        assert_eq!(entries["size_x"], "18.00");
    }

    #[tokio::test]
    async fn test_missing_candidate_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = DockingPipeline::new(
            StructureConverter::default(),
            executor(dir.path(), ENGINE_OK),
            provider().await,
            dir.path().join("jobs"),
        );
        let job = Job::new("unknown".into(), "EGFR".into());
        let (_tx, rx) = watch::channel(false);
        assert!(matches!(pipeline.run(&job, rx).await, Err(DockingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_engine_failure_is_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = DockingPipeline::new(
            StructureConverter::default(),
            executor(dir.path(), "echo 'receptor parse failure' >&2\nexit 1\n"),
            provider().await,
            dir.path().join("jobs"),
        );
        let job = Job::new("ethanol".into(), "EGFR".into());
        let (_tx, rx) = watch::channel(false);
        let err = pipeline.run(&job, rx).await.unwrap_err();
        assert!(matches!(err, DockingError::Execution(msg) if msg.contains("receptor parse failure")));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = DockingPipeline::new(
            StructureConverter::default(),
            executor(dir.path(), ENGINE_OK),
            provider().await,
            dir.path().join("jobs"),
        );
        let job = Job::new("ethanol".into(), "EGFR".into());
        let (_tx, rx) = watch::channel(true);
        assert!(matches!(pipeline.run(&job, rx).await.unwrap(), PipelineOutcome::Cancelled));
        assert!(!pipeline.job_dir(job.id).exists());
    }
}
