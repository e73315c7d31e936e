//! Pose repository.

use crate::database::Database;
use crate::error::Result;
use crate::schema::{row_to_pose, Pose, POSE_COLUMNS};
use ferrodock_common::JobStatus;
use serde::Serialize;
use sqlx::{Row, SqliteConnection};
use std::sync::Arc;
use uuid::Uuid;

/// A pose joined with the job that produced it, for cross-job rankings.
#[derive(Debug, Clone, Serialize)]
pub struct RankedPose {
    pub job_id: Uuid,
    pub candidate_id: String,
    pub target_id: String,
    pub pose_number: u32,
    pub binding_affinity: f64,
}

#[derive(Clone)]
pub struct PoseRepository {
    db: Arc<Database>,
}

impl PoseRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Poses of one job ordered by pose number (best first).
    pub async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<Pose>> {
        let sql = format!("SELECT {POSE_COLUMNS} FROM poses WHERE job_id = ? ORDER BY pose_number ASC");
        let rows = sqlx::query(&sql)
            .bind(job_id.to_string())
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(row_to_pose).collect()
    }

    pub async fn count_for_job(&self, job_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM poses WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_one(self.db.pool())
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Top-ranked poses of completed jobs against `target_id`, strongest binder first.
    pub async fn best_for_target(&self, target_id: &str, limit: usize) -> Result<Vec<RankedPose>> {
        let rows = sqlx::query(
            "SELECT p.job_id, j.candidate_id, j.target_id, p.pose_number, p.binding_affinity \
             FROM poses p JOIN jobs j ON j.id = p.job_id \
             WHERE j.target_id = ? AND j.status = ? AND p.pose_number = 1 \
             ORDER BY p.binding_affinity ASC LIMIT ?",
        )
        .bind(target_id)
        .bind(JobStatus::Completed.as_str())
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let pose = RankedPoseRow {
                    job_id: row.try_get("job_id")?,
                    candidate_id: row.try_get("candidate_id")?,
                    target_id: row.try_get("target_id")?,
                    pose_number: row.try_get("pose_number")?,
                    binding_affinity: row.try_get("binding_affinity")?,
                };
                pose.into_ranked()
            })
            .collect()
    }
}

struct RankedPoseRow {
    job_id: String,
    candidate_id: String,
    target_id: String,
    pose_number: i64,
    binding_affinity: f64,
}

impl RankedPoseRow {
    fn into_ranked(self) -> Result<RankedPose> {
        let invalid = |reason: String| crate::DbError::InvalidRecord {
            table: crate::TABLE_POSES,
            reason,
        };
        Ok(RankedPose {
            job_id: Uuid::parse_str(&self.job_id).map_err(|e| invalid(format!("bad job id: {e}")))?,
            candidate_id: self.candidate_id,
            target_id: self.target_id,
            pose_number: u32::try_from(self.pose_number)
                .map_err(|_| invalid(format!("pose_number out of range: {}", self.pose_number)))?,
            binding_affinity: self.binding_affinity,
        })
    }
}

pub(crate) async fn insert_row(conn: &mut SqliteConnection, pose: &Pose) -> Result<()> {
    let sql = format!("INSERT INTO poses ({POSE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)");
    sqlx::query(&sql)
        .bind(pose.id.to_string())
        .bind(pose.job_id.to_string())
        .bind(i64::from(pose.pose_number))
        .bind(pose.binding_affinity)
        .bind(pose.rmsd_lb)
        .bind(pose.rmsd_ub)
        .bind(&pose.pose_structure)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
