//! Schema definitions for the SQLite tables.
//!
//! Timestamps are stored as INTEGER microseconds since the Unix epoch so that
//! ordering and range filters compare numerically. Structured parameters are
//! JSON text, converted only through `GridBoxParams`/`DockingParams`
//! `encode`/`decode`.

use chrono::{DateTime, Utc};
use ferrodock_common::{DockingParams, GridBoxParams, JobStatus};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::error::{DbError, Result};

pub const TABLE_JOBS: &str = "jobs";
pub const TABLE_POSES: &str = "poses";

/// DDL executed by `Database::initialize`, one statement per entry.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id              TEXT PRIMARY KEY,
        candidate_id    TEXT NOT NULL,
        target_id       TEXT NOT NULL,
        disease_name    TEXT,
        user_id         TEXT,
        status          TEXT NOT NULL,
        created_at      INTEGER NOT NULL,
        started_at      INTEGER,
        completed_at    INTEGER,
        grid_params     TEXT,
        docking_params  TEXT NOT NULL,
        error_message   TEXT,
        protein_file    TEXT,
        ligand_file     TEXT,
        output_file     TEXT,
        best_affinity   REAL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_user_status ON jobs (user_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs (status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_target ON jobs (target_id)",
    r#"
    CREATE TABLE IF NOT EXISTS poses (
        id                TEXT PRIMARY KEY,
        job_id            TEXT NOT NULL REFERENCES jobs (id) ON DELETE CASCADE,
        pose_number       INTEGER NOT NULL,
        binding_affinity  REAL NOT NULL,
        rmsd_lb           REAL NOT NULL,
        rmsd_ub           REAL NOT NULL,
        pose_structure    TEXT,
        UNIQUE (job_id, pose_number)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_poses_job_number ON poses (job_id, pose_number)",
    "CREATE INDEX IF NOT EXISTS idx_poses_affinity ON poses (binding_affinity)",
];

pub(crate) const JOB_COLUMNS: &str = "id, candidate_id, target_id, disease_name, user_id, status, \
     created_at, started_at, completed_at, grid_params, docking_params, error_message, \
     protein_file, ligand_file, output_file, best_affinity";

pub(crate) const POSE_COLUMNS: &str =
    "id, job_id, pose_number, binding_affinity, rmsd_lb, rmsd_ub, pose_structure";

// =============================================================================
// Job
// =============================================================================

/// One docking run of a candidate ligand against a target structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub candidate_id: String,
    pub target_id: String,
    pub disease_name: Option<String>,
    pub user_id: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub grid_params: Option<GridBoxParams>,
    pub docking_params: DockingParams,
    pub error_message: Option<String>,
    pub protein_file: Option<String>,
    pub ligand_file: Option<String>,
    pub output_file: Option<String>,
    pub best_affinity: Option<f64>,
}

impl Job {
    pub fn new(candidate_id: String, target_id: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            candidate_id,
            target_id,
            disease_name: None,
            user_id: None,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            grid_params: None,
            docking_params: DockingParams::default(),
            error_message: None,
            protein_file: None,
            ligand_file: None,
            output_file: None,
            best_affinity: None,
        }
    }

    /// Move to `status`, stamping `started_at`/`completed_at` the first time
    /// each is reached. Non-COMPLETED states never carry a best affinity.
    pub fn transition(&mut self, status: JobStatus, now: DateTime<Utc>) {
        self.status = status;
        if status == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        if status != JobStatus::Completed {
            self.best_affinity = None;
        }
    }
}

// =============================================================================
// Pose
// =============================================================================

/// A ranked binding pose. Pose 1 is the best (most negative affinity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pose {
    pub id: Uuid,
    pub job_id: Uuid,
    pub pose_number: u32,
    pub binding_affinity: f64,
    pub rmsd_lb: f64,
    pub rmsd_ub: f64,
    pub pose_structure: Option<String>,
}

impl Pose {
    pub fn new(job_id: Uuid, pose_number: u32, binding_affinity: f64, rmsd_lb: f64, rmsd_ub: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            pose_number,
            binding_affinity,
            rmsd_lb,
            rmsd_ub,
            pose_structure: None,
        }
    }
}

// =============================================================================
// History filter
// =============================================================================

/// Filters for job history listings. `None` fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub user_id: Option<String>,
    pub status: Option<JobStatus>,
    pub target_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

// =============================================================================
// Row codecs
// =============================================================================

pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(table: &'static str, micros: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| DbError::InvalidRecord {
        table,
        reason: format!("timestamp out of range: {micros}"),
    })
}

fn parse_uuid(table: &'static str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| DbError::InvalidRecord {
        table,
        reason: format!("bad id {raw}: {e}"),
    })
}

pub(crate) fn row_to_job(row: &SqliteRow) -> Result<Job> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|reason| DbError::InvalidRecord { table: TABLE_JOBS, reason })?;

    let grid_params = match row.try_get::<Option<String>, _>("grid_params")? {
        Some(raw) => Some(GridBoxParams::decode(&raw).map_err(|e| DbError::InvalidRecord {
            table: TABLE_JOBS,
            reason: format!("grid_params: {e}"),
        })?),
        None => None,
    };
    let docking_raw: String = row.try_get("docking_params")?;
    let docking_params = DockingParams::decode(&docking_raw).map_err(|e| DbError::InvalidRecord {
        table: TABLE_JOBS,
        reason: format!("docking_params: {e}"),
    })?;

    let optional_ts = |column: &str| -> Result<Option<DateTime<Utc>>> {
        match row.try_get::<Option<i64>, _>(column)? {
            Some(micros) => Ok(Some(from_micros(TABLE_JOBS, micros)?)),
            None => Ok(None),
        }
    };

    Ok(Job {
        id: parse_uuid(TABLE_JOBS, &id)?,
        candidate_id: row.try_get("candidate_id")?,
        target_id: row.try_get("target_id")?,
        disease_name: row.try_get("disease_name")?,
        user_id: row.try_get("user_id")?,
        status,
        created_at: from_micros(TABLE_JOBS, row.try_get("created_at")?)?,
        started_at: optional_ts("started_at")?,
        completed_at: optional_ts("completed_at")?,
        grid_params,
        docking_params,
        error_message: row.try_get("error_message")?,
        protein_file: row.try_get("protein_file")?,
        ligand_file: row.try_get("ligand_file")?,
        output_file: row.try_get("output_file")?,
        best_affinity: row.try_get("best_affinity")?,
    })
}

pub(crate) fn row_to_pose(row: &SqliteRow) -> Result<Pose> {
    let id: String = row.try_get("id")?;
    let job_id: String = row.try_get("job_id")?;
    let pose_number: i64 = row.try_get("pose_number")?;
    let pose_number = u32::try_from(pose_number).map_err(|_| DbError::InvalidRecord {
        table: TABLE_POSES,
        reason: format!("pose_number out of range: {pose_number}"),
    })?;

    Ok(Pose {
        id: parse_uuid(TABLE_POSES, &id)?,
        job_id: parse_uuid(TABLE_POSES, &job_id)?,
        pose_number,
        binding_affinity: row.try_get("binding_affinity")?,
        rmsd_lb: row.try_get("rmsd_lb")?,
        rmsd_ub: row.try_get("rmsd_ub")?,
        pose_structure: row.try_get("pose_structure")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_stamps_timestamps_once() {
        let mut job = Job::new("CHEMBL25".to_string(), "P00533".to_string());
        let t0 = Utc::now();
        job.transition(JobStatus::Running, t0);
        assert_eq!(job.started_at, Some(t0));

        let t1 = t0 + chrono::Duration::seconds(30);
        job.transition(JobStatus::Running, t1);
        assert_eq!(job.started_at, Some(t0));

        job.transition(JobStatus::Failed, t1);
        assert_eq!(job.completed_at, Some(t1));
        job.transition(JobStatus::Cancelled, t1 + chrono::Duration::seconds(5));
        assert_eq!(job.completed_at, Some(t1));
    }

    #[test]
    fn test_best_affinity_cleared_outside_completed() {
        let mut job = Job::new("c".to_string(), "t".to_string());
        job.best_affinity = Some(-7.2);
        job.transition(JobStatus::Failed, Utc::now());
        assert!(job.best_affinity.is_none());
    }
}
