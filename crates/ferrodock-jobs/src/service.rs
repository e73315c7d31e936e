//! Job lifecycle: submission, status, cancellation, results and history.
//!
//! Every mutation is one read-modify-write transaction through
//! [`JobRepository::update_with`]; the service keeps no job state of its own.

use chrono::{DateTime, Utc};
use ferrodock_common::{DockingError, DockingParams, GridBoxParams, JobStatus, Result};
use ferrodock_db::{
    Database, DatabaseStats, Job, JobFilter, JobRepository, Pose, PoseRepository, QuotaCheck, RankedPose,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::settings::JobSettings;

pub const CANCELLED_MESSAGE: &str = "cancelled by user";
pub const NO_POSES_MESSAGE: &str = "no docking poses found";
pub const INTERRUPTED_MESSAGE: &str = "interrupted: worker stopped before the run finished";

/// Progress reported for a RUNNING job with no measurable elapsed time.
const STARTED_PROGRESS: u8 = 10;
/// RUNNING jobs never report more than this.
const RUNNING_PROGRESS_CAP: u8 = 95;

// =============================================================================
// Requests and views
// =============================================================================

/// Parameters for a new docking job.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub candidate_id: String,
    pub target_id: String,
    pub disease_name: Option<String>,
    pub user_id: Option<String>,
    /// Explicit search box; computed from the target when absent.
    pub grid_params: Option<GridBoxParams>,
    pub docking_params: DockingParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// 1-based FIFO position among QUEUED jobs.
    pub queue_position: u64,
    pub estimated_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub candidate_id: String,
    pub target_id: String,
    pub status: JobStatus,
    /// 0-100.
    pub progress: u8,
    pub queue_position: Option<u64>,
    pub estimated_wait_secs: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub best_affinity: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResults {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub best_affinity: Option<f64>,
    pub error_message: Option<String>,
    /// Ordered by pose number; empty for failed jobs.
    pub poses: Vec<Pose>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub jobs: Vec<Job>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

/// Paths written for a job, recorded for traceability and cleanup.
#[derive(Debug, Clone, Default)]
pub struct JobFiles {
    pub protein: Option<String>,
    pub ligand: Option<String>,
    pub output: Option<String>,
}

/// Completion percentage for a job at `now`.
///
/// QUEUED is 0, terminal states 100. RUNNING grows with elapsed time against
/// `estimate`, capped at 95.
pub fn progress(job: &Job, now: DateTime<Utc>, estimate: Duration) -> u8 {
    match job.status {
        JobStatus::Queued => 0,
        JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 100,
        JobStatus::Running => {
            let Some(started) = job.started_at else { return STARTED_PROGRESS };
            let elapsed = (now - started).num_milliseconds();
            let estimate = estimate.as_millis() as i64;
            if elapsed <= 0 || estimate <= 0 {
                return STARTED_PROGRESS;
            }
            let percent = (elapsed as f64 / estimate as f64 * 100.0).floor();
            percent.min(f64::from(RUNNING_PROGRESS_CAP)) as u8
        }
    }
}

fn invalid_state(job: &Job, action: &str) -> DockingError {
    DockingError::InvalidState {
        job_id: job.id,
        status: job.status,
        action: action.to_string(),
    }
}

// =============================================================================
// Service
// =============================================================================

pub struct JobService {
    db: Arc<Database>,
    jobs: JobRepository,
    poses: PoseRepository,
    settings: JobSettings,
}

impl JobService {
    pub fn new(db: Arc<Database>, settings: JobSettings) -> Self {
        Self {
            jobs: JobRepository::new(db.clone()),
            poses: PoseRepository::new(db.clone()),
            db,
            settings,
        }
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    fn estimated_wait(&self, position: u64) -> u64 {
        self.settings.job_estimate.as_secs().saturating_mul(position)
    }

    fn quota(&self, user_id: Option<&str>) -> Option<QuotaCheck> {
        user_id.map(|user_id| QuotaCheck {
            user_id: user_id.to_string(),
            limit: self.settings.max_active_per_user,
        })
    }

    fn build_job(&self, request: &SubmitRequest) -> Result<Job> {
        if request.candidate_id.trim().is_empty() {
            return Err(DockingError::Validation("candidate id must not be empty".to_string()));
        }
        if request.target_id.trim().is_empty() {
            return Err(DockingError::Validation("target id must not be empty".to_string()));
        }
        request.docking_params.validate()?;
        if let Some(grid) = &request.grid_params {
            grid.validate()?;
        }

        let mut job = Job::new(request.candidate_id.trim().to_string(), request.target_id.trim().to_string());
        job.disease_name = request.disease_name.clone();
        job.user_id = request.user_id.clone();
        job.grid_params = request.grid_params.map(GridBoxParams::clamped);
        job.docking_params = request.docking_params.clone();
        Ok(job)
    }

    async fn receipt(&self, job: &Job) -> Result<SubmitReceipt> {
        let queue_position = self.jobs.queue_position(job.created_at).await?;
        Ok(SubmitReceipt {
            job_id: job.id,
            status: job.status,
            queue_position,
            estimated_wait_secs: self.estimated_wait(queue_position),
        })
    }

    /// Persist a QUEUED job. Rejected when `user_id` already has the maximum
    /// number of active jobs.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt> {
        let job = self.build_job(&request)?;
        self.jobs.insert(&job, self.quota(request.user_id.as_deref()).as_ref()).await?;
        info!(job_id = %job.id, candidate = %job.candidate_id, target = %job.target_id, "Job queued");
        self.receipt(&job).await
    }

    /// Queue one job per candidate with shared settings. The quota covers the
    /// whole batch; on rejection nothing is created.
    pub async fn submit_batch(&self, candidate_ids: &[String], template: SubmitRequest) -> Result<Vec<SubmitReceipt>> {
        if candidate_ids.is_empty() {
            return Err(DockingError::Validation("batch contains no candidates".to_string()));
        }
        let base = Utc::now();
        let mut jobs = Vec::with_capacity(candidate_ids.len());
        for (index, candidate_id) in candidate_ids.iter().enumerate() {
            let request = SubmitRequest {
                candidate_id: candidate_id.clone(),
                ..template.clone()
            };
            let mut job = self.build_job(&request)?;
            // Distinct timestamps keep the batch in submission order.
            job.created_at = base + chrono::Duration::microseconds(index as i64);
            jobs.push(job);
        }

        self.jobs.insert_batch(&jobs, self.quota(template.user_id.as_deref()).as_ref()).await?;
        info!(count = jobs.len(), target = %template.target_id, "Batch queued");

        let mut receipts = Vec::with_capacity(jobs.len());
        for job in &jobs {
            receipts.push(self.receipt(job).await?);
        }
        Ok(receipts)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        self.jobs.find_by_id(job_id).await?.ok_or_else(|| DockingError::not_found(job_id))
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatusView> {
        let job = self.get_job(job_id).await?;
        let (queue_position, estimated_wait_secs) = if job.status == JobStatus::Queued {
            let position = self.jobs.queue_position(job.created_at).await?;
            (Some(position), Some(self.estimated_wait(position)))
        } else {
            (None, None)
        };

        Ok(JobStatusView {
            progress: progress(&job, Utc::now(), self.settings.job_estimate),
            job_id: job.id,
            candidate_id: job.candidate_id,
            target_id: job.target_id,
            status: job.status,
            queue_position,
            estimated_wait_secs,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_message: job.error_message,
            best_affinity: job.best_affinity,
        })
    }

    /// Poses of a finished job. Only COMPLETED and FAILED jobs have results.
    pub async fn get_results(&self, job_id: Uuid) -> Result<JobResults> {
        let job = self.get_job(job_id).await?;
        if !job.status.has_results() {
            return Err(invalid_state(&job, "read results of"));
        }
        let poses = if job.status == JobStatus::Completed {
            self.poses.list_for_job(job_id).await?
        } else {
            Vec::new()
        };
        Ok(JobResults {
            job_id,
            status: job.status,
            best_affinity: job.best_affinity,
            error_message: job.error_message,
            poses,
        })
    }

    /// Cancel a QUEUED or RUNNING job. A job owned by someone other than
    /// `user_id` is reported as not found.
    pub async fn cancel(&self, job_id: Uuid, user_id: Option<&str>) -> Result<Job> {
        let job = self
            .jobs
            .update_with(job_id, |job: &mut Job| {
                if let (Some(caller), Some(owner)) = (user_id, job.user_id.as_deref()) {
                    if caller != owner {
                        return Err(DockingError::not_found(job_id));
                    }
                }
                if !job.status.is_cancellable() {
                    return Err(invalid_state(job, "cancel"));
                }
                job.transition(JobStatus::Cancelled, Utc::now());
                job.error_message = Some(CANCELLED_MESSAGE.to_string());
                Ok(())
            })
            .await?
            .ok_or_else(|| DockingError::not_found(job_id))?;
        info!(job_id = %job_id, "Job cancelled");
        Ok(job)
    }

    /// Set `status`, stamping start/completion times once. Terminal jobs are
    /// never moved again. COMPLETED needs stored poses; without an explicit
    /// `best_affinity` the best stored score is used.
    pub async fn update_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error_message: Option<String>,
        best_affinity: Option<f64>,
    ) -> Result<Job> {
        let best_affinity = if status == JobStatus::Completed {
            let poses = self.poses.list_for_job(job_id).await?;
            if poses.is_empty() {
                return Err(DockingError::Validation(format!(
                    "job {job_id} has no poses and cannot be marked completed"
                )));
            }
            best_affinity.or_else(|| {
                poses.iter().map(|p| p.binding_affinity).reduce(f64::min)
            })
        } else {
            None
        };

        let job = self
            .jobs
            .update_with(job_id, |job: &mut Job| -> Result<()> {
                if job.status.is_terminal() {
                    return Err(invalid_state(job, "update"));
                }
                job.transition(status, Utc::now());
                if error_message.is_some() {
                    job.error_message = error_message;
                }
                if status == JobStatus::Completed {
                    job.best_affinity = best_affinity;
                }
                Ok(())
            })
            .await?
            .ok_or_else(|| DockingError::not_found(job_id))?;
        debug!(job_id = %job_id, status = %status, "Job status updated");
        Ok(job)
    }

    /// Atomically move a QUEUED job to RUNNING. `None` if another worker got
    /// there first or the job is no longer queued.
    pub async fn claim(&self, job_id: Uuid) -> Result<Option<Job>> {
        let claimed = self
            .jobs
            .update_with(job_id, |job: &mut Job| {
                if job.status != JobStatus::Queued {
                    return Err(invalid_state(job, "claim"));
                }
                job.transition(JobStatus::Running, Utc::now());
                Ok(())
            })
            .await;
        match claimed {
            Ok(job) => Ok(job),
            Err(DockingError::InvalidState { status, .. }) => {
                debug!(job_id = %job_id, %status, "Job not claimable");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Store poses and mark COMPLETED in one transaction. With no poses the
    /// job fails instead. Jobs that left RUNNING (e.g. cancelled) are not
    /// touched and an invalid-state error is returned.
    pub async fn complete_with_poses(&self, job_id: Uuid, poses: Vec<Pose>) -> Result<Job> {
        if poses.is_empty() {
            return self.fail(job_id, NO_POSES_MESSAGE).await;
        }
        let best = poses.iter().map(|p| p.binding_affinity).fold(f64::INFINITY, f64::min);
        let count = poses.len();

        let job = self
            .jobs
            .update_with_poses(job_id, Some(poses.as_slice()), |job: &mut Job| {
                if job.status != JobStatus::Running {
                    return Err(invalid_state(job, "complete"));
                }
                job.transition(JobStatus::Completed, Utc::now());
                job.best_affinity = Some(best);
                job.error_message = None;
                Ok(())
            })
            .await?
            .ok_or_else(|| DockingError::not_found(job_id))?;
        info!(job_id = %job_id, poses = count, best_affinity = best, "Job completed");
        Ok(job)
    }

    /// Mark a job FAILED unless it already reached a terminal state.
    pub async fn fail(&self, job_id: Uuid, message: &str) -> Result<Job> {
        let job = self
            .jobs
            .update_with(job_id, |job: &mut Job| {
                if job.status.is_terminal() {
                    return Err(invalid_state(job, "fail"));
                }
                job.transition(JobStatus::Failed, Utc::now());
                job.error_message = Some(message.to_string());
                Ok(())
            })
            .await?
            .ok_or_else(|| DockingError::not_found(job_id))?;
        warn!(job_id = %job_id, error = message, "Job failed");
        Ok(job)
    }

    pub async fn record_files(&self, job_id: Uuid, files: JobFiles) -> Result<()> {
        self.jobs
            .update_with(job_id, |job: &mut Job| -> Result<()> {
                job.protein_file = files.protein;
                job.ligand_file = files.ligand;
                job.output_file = files.output;
                Ok(())
            })
            .await?
            .ok_or_else(|| DockingError::not_found(job_id))?;
        Ok(())
    }

    pub async fn status_of(&self, job_id: Uuid) -> Result<Option<JobStatus>> {
        Ok(self.jobs.find_by_id(job_id).await?.map(|job| job.status))
    }

    /// QUEUED jobs, oldest first.
    pub async fn queued_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        Ok(self.jobs.find_by_status(JobStatus::Queued, limit).await?)
    }

    /// Fail RUNNING jobs left behind by a worker that stopped mid-run.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let running = self.jobs.find_by_status(JobStatus::Running, 10_000).await?;
        let mut recovered = 0;
        for job in running {
            match self.fail(job.id, INTERRUPTED_MESSAGE).await {
                Ok(_) => recovered += 1,
                Err(e) => warn!(job_id = %job.id, error = %e, "Could not recover interrupted job"),
            }
        }
        if recovered > 0 {
            info!(recovered, "Recovered interrupted jobs");
        }
        Ok(recovered)
    }

    /// Filtered, newest-first page of jobs. `limit` is clamped to
    /// `1..=history_max_limit`.
    pub async fn list_history(&self, filter: &JobFilter, limit: usize, offset: usize) -> Result<HistoryPage> {
        let limit = limit.clamp(1, self.settings.history_max_limit.max(1));
        let (jobs, total) = self.jobs.list(filter, limit, offset).await?;
        Ok(HistoryPage { jobs, total, limit, offset })
    }

    /// Strongest completed results against a target.
    pub async fn best_results(&self, target_id: &str, limit: usize) -> Result<Vec<RankedPose>> {
        Ok(self.poses.best_for_target(target_id, limit).await?)
    }

    pub async fn stats(&self) -> Result<DatabaseStats> {
        Ok(self.db.stats().await?)
    }

    /// Terminal jobs created before `cutoff`.
    pub async fn expired_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        Ok(self.jobs.find_terminal_before(cutoff).await?)
    }

    pub async fn delete_job(&self, job_id: Uuid) -> Result<bool> {
        Ok(self.jobs.delete(job_id).await?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn service() -> JobService {
        let db = Database::open_in_memory().await.unwrap();
        db.initialize().await.unwrap();
        JobService::new(Arc::new(db), JobSettings::default())
    }

    pub(crate) fn request(candidate: &str, user: Option<&str>) -> SubmitRequest {
        SubmitRequest {
            candidate_id: candidate.to_string(),
            target_id: "EGFR".to_string(),
            user_id: user.map(str::to_string),
            ..Default::default()
        }
    }

    fn pose(job_id: Uuid, number: u32, affinity: f64) -> Pose {
        Pose::new(job_id, number, affinity, 0.0, 0.0)
    }

    #[tokio::test]
    async fn test_submit_reports_fifo_position() {
        let service = service().await;
        let first = service.submit(request("CHEMBL1", None)).await.unwrap();
        let second = service.submit(request("CHEMBL2", None)).await.unwrap();
        assert_eq!(first.queue_position, 1);
        assert_eq!(second.queue_position, 2);
        assert_eq!(second.estimated_wait_secs, 600);
        assert_eq!(second.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_submit_validates_inputs() {
        let service = service().await;
        let err = service.submit(request("  ", None)).await.unwrap_err();
        assert!(matches!(err, DockingError::Validation(_)));

        let mut bad = request("CHEMBL1", None);
        bad.docking_params.exhaustiveness = 0;
        assert!(matches!(service.submit(bad).await, Err(DockingError::Validation(_))));
        assert_eq!(service.stats().await.unwrap().jobs, 0);
    }

    #[tokio::test]
    async fn test_submit_clamps_explicit_box() {
        let service = service().await;
        let mut req = request("CHEMBL1", None);
        req.grid_params = Some(GridBoxParams {
            center_x: 0.0,
            center_y: 0.0,
            center_z: 0.0,
            size_x: 5.0,
            size_y: 5.0,
            size_z: 80.0,
        });
        let receipt = service.submit(req).await.unwrap();
        let job = service.get_job(receipt.job_id).await.unwrap();
        assert_eq!(job.grid_params.unwrap().size(), [10.0, 10.0, 50.0]);
    }

    #[tokio::test]
    async fn test_non_finite_box_rejected_and_queue_still_readable() {
        let service = service().await;
        service.submit(request("CHEMBL1", None)).await.unwrap();

        let mut req = request("CHEMBL2", None);
        req.grid_params = Some(GridBoxParams {
            center_x: f64::NAN,
            center_y: 0.0,
            center_z: 0.0,
            size_x: 20.0,
            size_y: 20.0,
            size_z: 20.0,
        });
        assert!(matches!(service.submit(req).await, Err(DockingError::Validation(_))));

        let mut batch = request("unused", None);
        batch.grid_params = Some(GridBoxParams::cube([0.0, f64::NEG_INFINITY, 0.0], 20.0));
        let candidates = vec!["CHEMBL3".to_string()];
        assert!(service.submit_batch(&candidates, batch).await.is_err());

        let queued = service.queued_jobs(10).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].candidate_id, "CHEMBL1");
    }

    #[tokio::test]
    async fn test_user_cap_rejects_without_persisting() {
        let db = Database::open_in_memory().await.unwrap();
        db.initialize().await.unwrap();
        let settings = JobSettings { max_active_per_user: 3, ..Default::default() };
        let service = JobService::new(Arc::new(db), settings);

        for i in 0..3 {
            service.submit(request(&format!("C{i}"), Some("alice"))).await.unwrap();
        }
        let err = service.submit(request("C3", Some("alice"))).await.unwrap_err();
        assert!(err.is_retryable_later());
        assert!(matches!(err, DockingError::LimitExceeded { active: 3, requested: 1, limit: 3, .. }));
        assert_eq!(service.stats().await.unwrap().jobs, 3);

        // No user id: unbounded.
        service.submit(request("C4", None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_cap_applies_to_sum() {
        let db = Database::open_in_memory().await.unwrap();
        db.initialize().await.unwrap();
        let settings = JobSettings { max_active_per_user: 4, ..Default::default() };
        let service = JobService::new(Arc::new(db), settings);
        service.submit(request("C0", Some("bob"))).await.unwrap();

        let ids: Vec<String> = (1..=4).map(|i| format!("C{i}")).collect();
        let err = service.submit_batch(&ids, request("", Some("bob"))).await.unwrap_err();
        assert!(matches!(err, DockingError::LimitExceeded { active: 1, requested: 4, .. }));
        assert_eq!(service.stats().await.unwrap().jobs, 1);

        let receipts = service.submit_batch(&ids[..3], request("", Some("bob"))).await.unwrap();
        let positions: Vec<u64> = receipts.iter().map(|r| r.queue_position).collect();
        assert_eq!(positions, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_status_progress_by_state() {
        let service = service().await;
        let id = service.submit(request("CHEMBL1", None)).await.unwrap().job_id;

        let view = service.get_status(id).await.unwrap();
        assert_eq!(view.progress, 0);
        assert_eq!(view.queue_position, Some(1));

        service.claim(id).await.unwrap().unwrap();
        let view = service.get_status(id).await.unwrap();
        assert!(view.progress <= 95);
        assert_eq!(view.queue_position, None);
        assert!(view.started_at.is_some());

        service.fail(id, "boom").await.unwrap();
        let view = service.get_status(id).await.unwrap();
        assert_eq!(view.progress, 100);
        assert_eq!(view.error_message.as_deref(), Some("boom"));

        let missing = service.get_status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(missing, DockingError::NotFound(_)));
    }

    #[test]
    fn test_running_progress_formula() {
        let mut job = Job::new("c".into(), "t".into());
        job.status = JobStatus::Running;
        let estimate = Duration::from_secs(300);
        assert_eq!(progress(&job, Utc::now(), estimate), 10);

        let started = Utc::now();
        job.started_at = Some(started);
        assert_eq!(progress(&job, started, estimate), 10);
        assert_eq!(progress(&job, started + chrono::Duration::seconds(150), estimate), 50);
        assert_eq!(progress(&job, started + chrono::Duration::seconds(3000), estimate), 95);
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let service = service().await;
        let id = service.submit(request("CHEMBL1", Some("alice"))).await.unwrap().job_id;

        let err = service.cancel(id, Some("mallory")).await.unwrap_err();
        assert!(matches!(err, DockingError::NotFound(_)));

        let job = service.cancel(id, Some("alice")).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.error_message.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(job.completed_at.is_some());

        let err = service.cancel(id, Some("alice")).await.unwrap_err();
        assert!(matches!(err, DockingError::InvalidState { status: JobStatus::Cancelled, .. }));
    }

    #[tokio::test]
    async fn test_cancel_completed_is_invalid_state() {
        let service = service().await;
        let id = service.submit(request("CHEMBL1", None)).await.unwrap().job_id;
        service.claim(id).await.unwrap();
        service.complete_with_poses(id, vec![pose(id, 1, -8.5)]).await.unwrap();

        let err = service.cancel(id, None).await.unwrap_err();
        assert!(err.is_permanent());
        assert!(matches!(err, DockingError::InvalidState { status: JobStatus::Completed, .. }));
    }

    #[tokio::test]
    async fn test_results_require_finished_job() {
        let service = service().await;
        let id = service.submit(request("CHEMBL1", None)).await.unwrap().job_id;
        assert!(matches!(service.get_results(id).await, Err(DockingError::InvalidState { .. })));

        service.claim(id).await.unwrap();
        let poses = vec![pose(id, 2, -7.9), pose(id, 1, -8.5)];
        let job = service.complete_with_poses(id, poses).await.unwrap();
        assert_eq!(job.best_affinity, Some(-8.5));

        let results = service.get_results(id).await.unwrap();
        let numbers: Vec<u32> = results.poses.iter().map(|p| p.pose_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(results.best_affinity, Some(-8.5));
    }

    #[tokio::test]
    async fn test_empty_poses_fail_job() {
        let service = service().await;
        let id = service.submit(request("CHEMBL1", None)).await.unwrap().job_id;
        service.claim(id).await.unwrap();
        let job = service.complete_with_poses(id, Vec::new()).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(NO_POSES_MESSAGE));
        assert!(job.best_affinity.is_none());

        let results = service.get_results(id).await.unwrap();
        assert!(results.poses.is_empty());
    }

    #[tokio::test]
    async fn test_results_of_cancelled_run_are_discarded() {
        let service = service().await;
        let id = service.submit(request("CHEMBL1", None)).await.unwrap().job_id;
        service.claim(id).await.unwrap();
        service.cancel(id, None).await.unwrap();

        let err = service.complete_with_poses(id, vec![pose(id, 1, -9.0)]).await.unwrap_err();
        assert!(matches!(err, DockingError::InvalidState { .. }));
        let job = service.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.best_affinity.is_none());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let service = service().await;
        let id = service.submit(request("CHEMBL1", None)).await.unwrap().job_id;
        assert!(service.claim(id).await.unwrap().is_some());
        assert!(service.claim(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_status_stamps_once() {
        let service = service().await;
        let id = service.submit(request("CHEMBL1", None)).await.unwrap().job_id;
        let running = service.update_status(id, JobStatus::Running, None, None).await.unwrap();
        let again = service.update_status(id, JobStatus::Running, None, None).await.unwrap();
        assert_eq!(running.started_at, again.started_at);

        let failed = service.update_status(id, JobStatus::Failed, Some("engine crashed".into()), None).await.unwrap();
        assert!(failed.completed_at.is_some());
        assert_eq!(failed.error_message.as_deref(), Some("engine crashed"));
        assert!(failed.best_affinity.is_none());
    }

    #[tokio::test]
    async fn test_update_status_never_leaves_terminal_state() {
        let service = service().await;
        let id = service.submit(request("CHEMBL1", None)).await.unwrap().job_id;
        let cancelled = service.cancel(id, None).await.unwrap();

        let err = service.update_status(id, JobStatus::Running, None, None).await.unwrap_err();
        assert!(matches!(err, DockingError::InvalidState { status: JobStatus::Cancelled, .. }));
        let err = service.update_status(id, JobStatus::Failed, Some("late".into()), None).await.unwrap_err();
        assert!(matches!(err, DockingError::InvalidState { .. }));

        let job = service.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.completed_at, cancelled.completed_at);
        assert_eq!(job.error_message.as_deref(), Some(CANCELLED_MESSAGE));
    }

    #[tokio::test]
    async fn test_update_status_completed_requires_poses() {
        let service = service().await;
        let id = service.submit(request("CHEMBL1", None)).await.unwrap().job_id;
        service.claim(id).await.unwrap();

        let err = service.update_status(id, JobStatus::Completed, None, Some(-9.0)).await.unwrap_err();
        assert!(matches!(err, DockingError::Validation(_)));
        let job = service.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.best_affinity.is_none());

        let poses = vec![Pose::new(id, 1, -7.4, 0.0, 0.0), Pose::new(id, 2, -6.1, 1.0, 1.9)];
        service
            .jobs
            .update_with_poses::<_, DockingError>(id, Some(&poses), |_| Ok(()))
            .await
            .unwrap();
        let done = service.update_status(id, JobStatus::Completed, None, None).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.best_affinity, Some(-7.4));
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let service = service().await;
        let id = service.submit(request("CHEMBL1", None)).await.unwrap().job_id;
        service.claim(id).await.unwrap();
        assert_eq!(service.recover_interrupted().await.unwrap(), 1);
        let job = service.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
    }

    #[tokio::test]
    async fn test_history_filters_and_clamps_limit() {
        let service = service().await;
        for i in 0..5 {
            service.submit(request(&format!("C{i}"), Some("alice"))).await.unwrap();
        }
        service.submit(request("X", Some("bob"))).await.unwrap();

        let filter = JobFilter { user_id: Some("alice".into()), ..Default::default() };
        let page = service.list_history(&filter, 2, 0).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.jobs.len(), 2);
        assert_eq!(page.jobs[0].candidate_id, "C4");

        let page = service.list_history(&JobFilter::default(), 10_000, 0).await.unwrap();
        assert_eq!(page.limit, 100);
        assert_eq!(page.total, 6);
    }

    #[tokio::test]
    async fn test_status_view_serializes_for_clients() {
        let service = service().await;
        let id = service.submit(request("CHEMBL25", None)).await.unwrap().job_id;
        let view = serde_json::to_value(service.get_status(id).await.unwrap()).unwrap();
        assert_eq!(view["status"], "queued");
        assert_eq!(view["progress"], 0);
        assert_eq!(view["queue_position"], 1);
        assert!(view["completed_at"].is_null());
    }
}
