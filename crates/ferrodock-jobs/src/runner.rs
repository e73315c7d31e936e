//! Worker pool executing docking jobs.
//!
//! A dispatcher polls the store for QUEUED jobs (oldest first) and feeds a
//! bounded channel. Each worker claims a job (QUEUED → RUNNING) before
//! running it, so exactly one runner owns a job at a time. While a job runs,
//! a watcher re-reads its persisted status and signals the engine to stop
//! once the job is cancelled.

use ferrodock_common::{DockingError, JobStatus, Result};
use ferrodock_db::{Job, Pose};
use ferrodock_molecules::DockedPose;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cleanup;
use crate::pipeline::{DockingPipeline, PipelineOutcome};
use crate::retry::RetryPolicy;
use crate::service::{JobFiles, JobService};
use crate::settings::RunnerSettings;

type SharedQueue = Arc<Mutex<mpsc::Receiver<Uuid>>>;
type InFlight = Arc<Mutex<HashSet<Uuid>>>;

pub struct TaskRunner {
    service: Arc<JobService>,
    pipeline: Arc<DockingPipeline>,
    retry: RetryPolicy,
    settings: RunnerSettings,
}

/// Handle to a started worker pool.
pub struct RunnerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunnerHandle {
    /// Stop dispatching, let running jobs finish, then wait for every task.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Runner task ended abnormally");
            }
        }
        info!("Task runner stopped");
    }
}

/// Resolves once `rx` holds `true`. Never resolves if the sender goes away.
async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Persistable poses numbered contiguously from 1 in engine rank order.
fn to_poses(job_id: Uuid, mut docked: Vec<DockedPose>) -> Vec<Pose> {
    docked.sort_by_key(|p| p.pose_number);
    docked
        .into_iter()
        .enumerate()
        .map(|(index, p)| {
            let mut pose = Pose::new(job_id, index as u32 + 1, p.affinity, p.rmsd_lb, p.rmsd_ub);
            pose.pose_structure = p.structure;
            pose
        })
        .collect()
}

impl TaskRunner {
    pub fn new(
        service: Arc<JobService>,
        pipeline: Arc<DockingPipeline>,
        retry: RetryPolicy,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            service,
            pipeline,
            retry,
            settings,
        }
    }

    pub fn service(&self) -> &Arc<JobService> {
        &self.service
    }

    /// Run one job to a terminal state and return that state.
    ///
    /// A job that is not QUEUED is left alone and its current status returned.
    /// If the run itself errors after the claim (e.g. the store rejects the
    /// results), the job is marked FAILED so it does not stay RUNNING.
    pub async fn run_job(&self, job_id: Uuid) -> Result<JobStatus> {
        let Some(job) = self.service.claim(job_id).await? else {
            return self
                .service
                .status_of(job_id)
                .await?
                .ok_or_else(|| DockingError::not_found(job_id));
        };
        info!(job_id = %job_id, candidate = %job.candidate_id, target = %job.target_id, "Job started");

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let watcher = self.spawn_cancel_watcher(job_id, cancel_tx);
        let status = self.run_attempts(&job, cancel_rx).await;
        watcher.abort();
        match status {
            Ok(status) => Ok(status),
            Err(e) => self.fail_aborted(job_id, e).await,
        }
    }

    async fn fail_aborted(&self, job_id: Uuid, cause: DockingError) -> Result<JobStatus> {
        error!(job_id = %job_id, error = %cause, "Job run aborted, marking failed");
        match self.settle(self.service.fail(job_id, &cause.to_string()).await) {
            Ok(status) => Ok(status),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Could not mark aborted job failed");
                Err(cause)
            }
        }
    }

    async fn run_attempts(&self, job: &Job, cancel: watch::Receiver<bool>) -> Result<JobStatus> {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 1;
        loop {
            match self.pipeline.run(job, cancel.clone()).await {
                Ok(PipelineOutcome::Cancelled) => {
                    info!(job_id = %job.id, "Job run stopped after cancellation");
                    return Ok(JobStatus::Cancelled);
                }
                Ok(PipelineOutcome::Docked { poses, files }) => {
                    return self.finish(job.id, poses, files).await;
                }
                Err(e) if *cancel.borrow() => {
                    debug!(job_id = %job.id, error = %e, "Ignoring error from cancelled run");
                    return Ok(JobStatus::Cancelled);
                }
                Err(e) if !self.retry.should_retry(attempt) => {
                    error!(job_id = %job.id, attempt, max_attempts, error = %e, "Job failed");
                    return self.settle(self.service.fail(job.id, &e.to_string()).await);
                }
                Err(e) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        job_id = %job.id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Docking attempt failed, retrying"
                    );
                    let mut cancelled = cancel.clone();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = wait_for_cancel(&mut cancelled) => return Ok(JobStatus::Cancelled),
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn finish(&self, job_id: Uuid, docked: Vec<DockedPose>, files: JobFiles) -> Result<JobStatus> {
        if let Err(e) = self.service.record_files(job_id, files).await {
            warn!(job_id = %job_id, error = %e, "Could not record job files");
        }
        let poses = to_poses(job_id, docked);
        self.settle(self.service.complete_with_poses(job_id, poses).await)
    }

    /// Final status of a terminal update. A job that left RUNNING in the
    /// meantime (cancelled) keeps its state and the results are dropped.
    fn settle(&self, update: Result<Job>) -> Result<JobStatus> {
        match update {
            Ok(job) => Ok(job.status),
            Err(DockingError::InvalidState { job_id, status, .. }) => {
                info!(job_id = %job_id, %status, "Discarding results of job that is no longer running");
                Ok(status)
            }
            Err(e) => Err(e),
        }
    }

    fn spawn_cancel_watcher(&self, job_id: Uuid, cancel: watch::Sender<bool>) -> JoinHandle<()> {
        let service = self.service.clone();
        let interval = self.settings.cancel_poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match service.status_of(job_id).await {
                    Ok(Some(JobStatus::Cancelled)) | Ok(None) => {
                        info!(job_id = %job_id, "Cancellation observed, stopping engine");
                        let _ = cancel.send(true);
                        return;
                    }
                    Ok(Some(_)) => {}
                    Err(e) => debug!(job_id = %job_id, error = %e, "Status poll failed"),
                }
            }
        })
    }

    // ── Pool ────────────────────────────────────────────────────────────────

    /// Recover interrupted jobs, then start the dispatcher, the workers and
    /// the cleanup loop.
    pub async fn start(self: Arc<Self>) -> Result<RunnerHandle> {
        self.service.recover_interrupted().await?;
        tokio::fs::create_dir_all(&self.settings.workspace).await?;

        let workers = self.settings.workers.max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (queue_tx, queue_rx) = mpsc::channel::<Uuid>(workers * 2);
        let queue: SharedQueue = Arc::new(Mutex::new(queue_rx));
        let in_flight: InFlight = Arc::new(Mutex::new(HashSet::new()));

        let mut tasks = Vec::with_capacity(workers + 2);
        tasks.push(tokio::spawn(self.clone().dispatch_loop(queue_tx, in_flight.clone(), shutdown_rx.clone())));
        for index in 0..workers {
            tasks.push(tokio::spawn(self.clone().worker_loop(
                index,
                queue.clone(),
                in_flight.clone(),
                shutdown_rx.clone(),
            )));
        }
        tasks.push(tokio::spawn(self.clone().cleanup_loop(shutdown_rx)));

        info!(workers, workspace = %self.settings.workspace.display(), "Task runner started");
        Ok(RunnerHandle {
            shutdown: shutdown_tx,
            tasks,
        })
    }

    async fn dispatch_loop(
        self: Arc<Self>,
        queue: mpsc::Sender<Uuid>,
        in_flight: InFlight,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let batch = self.settings.workers.max(1) * 2;
        let mut ticker = tokio::time::interval(self.settings.dispatch_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let queued = match self.service.queued_jobs(batch).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    warn!(error = %e, "Could not poll queued jobs");
                    continue;
                }
            };
            for job in queued {
                if !in_flight.lock().await.insert(job.id) {
                    continue;
                }
                debug!(job_id = %job.id, "Dispatching job");
                tokio::select! {
                    sent = queue.send(job.id) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        }
        debug!("Dispatcher stopped");
    }

    async fn worker_loop(
        self: Arc<Self>,
        index: usize,
        queue: SharedQueue,
        in_flight: InFlight,
        shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let next = { queue.lock().await.recv().await };
            let Some(job_id) = next else { break };
            if *shutdown.borrow() {
                break;
            }
            match self.run_job(job_id).await {
                Ok(status) => info!(worker = index, job_id = %job_id, %status, "Job finished"),
                Err(e) => error!(worker = index, job_id = %job_id, error = %e, "Job run failed"),
            }
            in_flight.lock().await.remove(&job_id);
        }
        debug!(worker = index, "Worker stopped");
    }

    async fn cleanup_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.cleanup_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if let Err(e) = cleanup::sweep(&self.service, &self.settings.workspace).await {
                warn!(error = %e, "Cleanup sweep failed");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::pipeline::tests::{executor, provider, ENGINE_OK};
    use crate::service::tests::{request, service};
    use crate::settings::JobSettings;
    use ferrodock_db::Database;
    use ferrodock_molecules::StructureConverter;
    use std::path::Path;
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        }
    }

    async fn runner(dir: &Path, script: &str, retry: RetryPolicy) -> Arc<TaskRunner> {
        runner_with(dir, script, retry, service().await).await
    }

    async fn runner_with(dir: &Path, script: &str, retry: RetryPolicy, service: JobService) -> Arc<TaskRunner> {
        let service = Arc::new(service);
        let settings = RunnerSettings {
            workers: 2,
            dispatch_interval: Duration::from_millis(50),
            cancel_poll_interval: Duration::from_millis(50),
            cleanup_interval: Duration::from_secs(3600),
            workspace: dir.join("jobs"),
        };
        let pipeline = DockingPipeline::new(
            StructureConverter::default(),
            executor(dir, script),
            provider().await,
            settings.workspace.clone(),
        );
        Arc::new(TaskRunner::new(service, Arc::new(pipeline), retry, settings))
    }

    async fn wait_for(service: &JobService, id: Uuid, wanted: JobStatus) {
        for _ in 0..600 {
            if service.status_of(id).await.unwrap() == Some(wanted) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("job {id} never reached {wanted}");
    }

    #[tokio::test]
    async fn test_job_completes_with_ranked_poses() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), ENGINE_OK, fast_retry()).await;
        let id = runner.service().submit(request("ethanol", None)).await.unwrap().job_id;

        assert_eq!(runner.run_job(id).await.unwrap(), JobStatus::Completed);
        let results = runner.service().get_results(id).await.unwrap();
        assert_eq!(results.poses.len(), 2);
        assert_eq!(results.best_affinity, Some(-8.5));
        assert!(results.poses[0].pose_structure.as_deref().unwrap().contains("MODEL 1"));

        let job = runner.service().get_job(id).await.unwrap();
        assert!(job.output_file.unwrap().ends_with("docked.pdbqt"));
    }

    #[tokio::test]
    async fn test_failing_engine_retried_then_failed() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("attempts");
        let script = format!("echo run >> '{}'\necho 'engine crashed' >&2\nexit 2\n", counter.display());
        let runner = runner(dir.path(), &script, fast_retry()).await;
        let id = runner.service().submit(request("ethanol", None)).await.unwrap().job_id;

        assert_eq!(runner.run_job(id).await.unwrap(), JobStatus::Failed);
        let attempts = std::fs::read_to_string(&counter).unwrap().lines().count();
        assert_eq!(attempts, 3);

        let job = runner.service().get_job(id).await.unwrap();
        assert!(job.error_message.unwrap().contains("engine crashed"));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_no_poses_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), "echo 'nothing to report'\n", fast_retry()).await;
        let id = runner.service().submit(request("ethanol", None)).await.unwrap().job_id;

        assert_eq!(runner.run_job(id).await.unwrap(), JobStatus::Failed);
        let job = runner.service().get_job(id).await.unwrap();
        assert_eq!(job.error_message.as_deref(), Some(crate::service::NO_POSES_MESSAGE));
    }

    #[tokio::test]
    async fn test_store_error_after_claim_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        db.initialize().await.unwrap();
        let service = JobService::new(db.clone(), JobSettings::default());
        let runner = runner_with(dir.path(), ENGINE_OK, fast_retry(), service).await;
        let id = runner.service().submit(request("ethanol", None)).await.unwrap().job_id;

        // Results can no longer be stored.
        sqlx::query("DROP TABLE poses").execute(db.pool()).await.unwrap();

        assert_eq!(runner.run_job(id).await.unwrap(), JobStatus::Failed);
        let job = runner.service().get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.completed_at.is_some());
        assert!(job.error_message.unwrap().contains("poses"));
    }

    #[tokio::test]
    async fn test_cancel_stops_running_engine() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), "exec sleep 30\n", fast_retry()).await;
        let id = runner.service().submit(request("ethanol", None)).await.unwrap().job_id;

        let task = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run_job(id).await }
        });
        wait_for(runner.service(), id, JobStatus::Running).await;
        runner.service().cancel(id, None).await.unwrap();

        let status = tokio::time::timeout(Duration::from_secs(20), task).await.unwrap().unwrap().unwrap();
        assert_eq!(status, JobStatus::Cancelled);
        let job = runner.service().get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.error_message.as_deref(), Some(crate::service::CANCELLED_MESSAGE));
    }

    #[tokio::test]
    async fn test_non_queued_job_is_not_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), ENGINE_OK, fast_retry()).await;
        let id = runner.service().submit(request("ethanol", None)).await.unwrap().job_id;
        runner.service().cancel(id, None).await.unwrap();
        assert_eq!(runner.run_job(id).await.unwrap(), JobStatus::Cancelled);
        assert!(!dir.path().join("jobs").join(id.to_string()).exists());

        assert!(matches!(runner.run_job(Uuid::new_v4()).await, Err(DockingError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_pool_drains_queue() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), ENGINE_OK, fast_retry()).await;
        let ids: Vec<String> = vec!["ethanol".into(), "ethanol".into(), "ethanol".into()];
        let receipts = runner.service().submit_batch(&ids, request("", None)).await.unwrap();

        let handle = runner.clone().start().await.unwrap();
        for receipt in &receipts {
            wait_for(runner.service(), receipt.job_id, JobStatus::Completed).await;
        }
        handle.shutdown().await;

        let stats = runner.service().stats().await.unwrap();
        assert_eq!(stats.count(JobStatus::Completed), 3);
        assert_eq!(stats.poses, 6);
    }

    #[test]
    fn test_poses_renumbered_contiguously() {
        let job_id = Uuid::new_v4();
        let docked = vec![
            DockedPose { pose_number: 3, affinity: -6.0, rmsd_lb: 2.0, rmsd_ub: 3.0, structure: None },
            DockedPose { pose_number: 1, affinity: -8.0, rmsd_lb: 0.0, rmsd_ub: 0.0, structure: None },
        ];
        let poses = to_poses(job_id, docked);
        let numbers: Vec<(u32, f64)> = poses.iter().map(|p| (p.pose_number, p.binding_affinity)).collect();
        assert_eq!(numbers, vec![(1, -8.0), (2, -6.0)]);
    }
}
