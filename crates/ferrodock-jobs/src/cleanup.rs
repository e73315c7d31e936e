//! Periodic removal of old finished jobs.

use chrono::Utc;
use ferrodock_common::Result;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use crate::pipeline::job_dir;
use crate::service::JobService;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub jobs_deleted: usize,
    /// Working directories that could not be removed.
    pub file_failures: usize,
    /// Rows that could not be deleted.
    pub db_failures: usize,
}

/// Delete terminal jobs created before the retention horizon, with their
/// working directories under `workspace`. QUEUED and RUNNING jobs are never
/// touched. Per-job failures are counted, not raised.
pub async fn sweep(service: &JobService, workspace: &Path) -> Result<CleanupReport> {
    let cutoff = Utc::now() - service.settings().retention;
    let expired = service.expired_jobs(cutoff).await?;
    let mut report = CleanupReport::default();

    for job in expired {
        let dir = job_dir(workspace, job.id);
        if dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!(job_id = %job.id, path = %dir.display(), error = %e, "Could not remove job directory");
                report.file_failures += 1;
            }
        }

        match service.delete_job(job.id).await {
            Ok(true) => report.jobs_deleted += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Could not delete job");
                report.db_failures += 1;
            }
        }
    }

    if report != CleanupReport::default() {
        info!(
            deleted = report.jobs_deleted,
            file_failures = report.file_failures,
            db_failures = report.db_failures,
            "Cleanup sweep finished"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::{request, service};
    use crate::settings::JobSettings;
    use ferrodock_common::JobStatus;
    use ferrodock_db::{Database, Pose};
    use std::sync::Arc;

    async fn aged_service() -> JobService {
        let db = Database::open_in_memory().await.unwrap();
        db.initialize().await.unwrap();
        // Zero retention: everything finished is already expired.
        let settings = JobSettings { retention: chrono::Duration::zero(), ..Default::default() };
        JobService::new(Arc::new(db), settings)
    }

    #[tokio::test]
    async fn test_sweep_removes_only_terminal_jobs() {
        let service = aged_service().await;
        let workspace = tempfile::tempdir().unwrap();

        let done = service.submit(request("done", None)).await.unwrap().job_id;
        service.claim(done).await.unwrap();
        service.complete_with_poses(done, vec![Pose::new(done, 1, -7.0, 0.0, 0.0)]).await.unwrap();
        let cancelled = service.submit(request("cancelled", None)).await.unwrap().job_id;
        service.cancel(cancelled, None).await.unwrap();
        let queued = service.submit(request("queued", None)).await.unwrap().job_id;
        let running = service.submit(request("running", None)).await.unwrap().job_id;
        service.claim(running).await.unwrap();

        std::fs::create_dir_all(job_dir(workspace.path(), done).join("nested")).unwrap();
        std::fs::create_dir_all(job_dir(workspace.path(), running)).unwrap();
        // Let created_at fall strictly before the cutoff.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let report = sweep(&service, workspace.path()).await.unwrap();
        assert_eq!(report, CleanupReport { jobs_deleted: 2, file_failures: 0, db_failures: 0 });

        assert!(!job_dir(workspace.path(), done).exists());
        assert!(job_dir(workspace.path(), running).exists());
        assert_eq!(service.status_of(queued).await.unwrap(), Some(JobStatus::Queued));
        assert_eq!(service.status_of(running).await.unwrap(), Some(JobStatus::Running));
        assert!(service.status_of(done).await.unwrap().is_none());
        assert_eq!(service.stats().await.unwrap().poses, 0);
    }

    #[tokio::test]
    async fn test_recent_jobs_survive_default_horizon() {
        let service = service().await;
        let workspace = tempfile::tempdir().unwrap();
        let id = service.submit(request("recent", None)).await.unwrap().job_id;
        service.cancel(id, None).await.unwrap();

        let report = sweep(&service, workspace.path()).await.unwrap();
        assert_eq!(report.jobs_deleted, 0);
        assert!(service.status_of(id).await.unwrap().is_some());
    }
}
