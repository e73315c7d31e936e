//! Job repository.
//!
//! Every mutating operation runs inside one transaction: read the row, apply
//! the caller's change, write it back, commit. Errors roll the transaction
//! back by dropping it.

use crate::database::Database;
use crate::error::{DbError, Result};
use crate::schema::{row_to_job, to_micros, Job, JobFilter, Pose, JOB_COLUMNS, TABLE_JOBS};
use chrono::{DateTime, Utc};
use ferrodock_common::JobStatus;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::sync::Arc;
use uuid::Uuid;

/// Per-user cap applied atomically with an insert.
#[derive(Debug, Clone)]
pub struct QuotaCheck {
    pub user_id: String,
    pub limit: u64,
}

/// Repository for job operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Arc<Database>,
}

impl JobRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert jobs in bulk.
    ///
    /// When `quota` is given, the user's QUEUED+RUNNING count plus the batch
    /// size is checked inside the same transaction; on rejection nothing is
    /// written.
    pub async fn insert_batch(&self, jobs: &[Job], quota: Option<&QuotaCheck>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        let mut tx = self.db.begin_write().await?;

        if let Some(quota) = quota {
            let active = count_active_for_user(&mut *tx, &quota.user_id).await?;
            let requested = jobs.len() as u64;
            if active + requested > quota.limit {
                return Err(DbError::QuotaExceeded {
                    user_id: quota.user_id.clone(),
                    active,
                    requested,
                    limit: quota.limit,
                });
            }
        }

        for job in jobs {
            insert_row(&mut *tx, job).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Insert a single job.
    pub async fn insert(&self, job: &Job, quota: Option<&QuotaCheck>) -> Result<()> {
        self.insert_batch(std::slice::from_ref(job), quota).await
    }

    /// Find a job by ID.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// Read-modify-write one job in a single transaction.
    ///
    /// Returns `Ok(None)` when the job does not exist. If `apply` fails the
    /// transaction is rolled back and its error is returned unchanged.
    pub async fn update_with<F, E>(&self, id: Uuid, apply: F) -> std::result::Result<Option<Job>, E>
    where
        F: FnOnce(&mut Job) -> std::result::Result<(), E>,
        E: From<DbError>,
    {
        self.update_with_poses(id, None, apply).await
    }

    /// Like [`update_with`](Self::update_with), additionally replacing the
    /// job's poses in the same transaction when `poses` is given.
    pub async fn update_with_poses<F, E>(
        &self,
        id: Uuid,
        poses: Option<&[Pose]>,
        apply: F,
    ) -> std::result::Result<Option<Job>, E>
    where
        F: FnOnce(&mut Job) -> std::result::Result<(), E>,
        E: From<DbError>,
    {
        let mut tx = self.db.begin_write().await?;

        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(DbError::from)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut job = row_to_job(&row)?;
        apply(&mut job)?;
        update_row(&mut *tx, &job).await?;

        if let Some(poses) = poses {
            sqlx::query("DELETE FROM poses WHERE job_id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(DbError::from)?;
            for pose in poses {
                crate::poses::insert_row(&mut *tx, pose).await?;
            }
        }

        tx.commit().await.map_err(DbError::from)?;
        Ok(Some(job))
    }

    /// 1-based FIFO position among QUEUED jobs created at or before `created_at`.
    pub async fn queue_position(&self, created_at: DateTime<Utc>) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status = ? AND created_at <= ?",
        )
        .bind(JobStatus::Queued.as_str())
        .bind(to_micros(created_at))
        .fetch_one(self.db.pool())
        .await?;
        Ok(count.max(0) as u64)
    }

    /// Count QUEUED+RUNNING jobs owned by `user_id`.
    pub async fn count_active_for_user(&self, user_id: &str) -> Result<u64> {
        let mut conn = self.db.pool().acquire().await?;
        count_active_for_user(&mut *conn, user_id).await
    }

    /// Count total jobs.
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Count jobs by status.
    pub async fn count_by_status(&self, status: JobStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.db.pool())
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Jobs in `status`, oldest first.
    pub async fn find_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? ORDER BY created_at ASC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    /// Filtered page of jobs, newest first, plus the total matching count.
    pub async fn list(&self, filter: &JobFilter, limit: usize, offset: usize) -> Result<(Vec<Job>, u64)> {
        let mut count_query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM jobs");
        push_filter(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(self.db.pool())
            .await?;

        let mut page_query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM jobs"));
        push_filter(&mut page_query, filter);
        page_query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(offset as i64);

        let rows = page_query.build().fetch_all(self.db.pool()).await?;
        let jobs = rows.iter().map(row_to_job).collect::<Result<Vec<_>>>()?;
        Ok((jobs, total.max(0) as u64))
    }

    /// Terminal jobs created strictly before `cutoff`.
    pub async fn find_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status IN (?, ?, ?) AND created_at < ? ORDER BY created_at ASC"
        );
        let [a, b, c] = JobStatus::TERMINAL;
        let rows = sqlx::query(&sql)
            .bind(a.as_str())
            .bind(b.as_str())
            .bind(c.as_str())
            .bind(to_micros(cutoff))
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    /// Delete a job by ID; its poses go with it. Returns whether a row was removed.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &JobFilter) {
    let mut first = true;

    if let Some(user_id) = &filter.user_id {
        push_clause(query, &mut first, "user_id = ");
        query.push_bind(user_id.clone());
    }
    if let Some(status) = filter.status {
        push_clause(query, &mut first, "status = ");
        query.push_bind(status.as_str());
    }
    if let Some(target_id) = &filter.target_id {
        push_clause(query, &mut first, "target_id = ");
        query.push_bind(target_id.clone());
    }
    if let Some(since) = filter.since {
        push_clause(query, &mut first, "created_at >= ");
        query.push_bind(to_micros(since));
    }
}

fn push_clause(query: &mut QueryBuilder<'_, Sqlite>, first: &mut bool, column: &str) {
    query.push(if *first { " WHERE " } else { " AND " });
    query.push(column);
    *first = false;
}

async fn count_active_for_user(conn: &mut SqliteConnection, user_id: &str) -> Result<u64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE user_id = ? AND status IN (?, ?)",
    )
    .bind(user_id)
    .bind(JobStatus::Queued.as_str())
    .bind(JobStatus::Running.as_str())
    .fetch_one(&mut *conn)
    .await?;
    Ok(count.max(0) as u64)
}

fn encode_params(job: &Job) -> Result<(Option<String>, String)> {
    let invalid = |column: &str, e: ferrodock_common::DockingError| DbError::InvalidRecord {
        table: TABLE_JOBS,
        reason: format!("{column}: {e}"),
    };
    let grid = match &job.grid_params {
        Some(grid) => Some(grid.encode().map_err(|e| invalid("grid_params", e))?),
        None => None,
    };
    let docking = job
        .docking_params
        .encode()
        .map_err(|e| invalid("docking_params", e))?;
    Ok((grid, docking))
}

async fn insert_row(conn: &mut SqliteConnection, job: &Job) -> Result<()> {
    let (grid, docking) = encode_params(job)?;
    let sql = format!(
        "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    );
    sqlx::query(&sql)
        .bind(job.id.to_string())
        .bind(&job.candidate_id)
        .bind(&job.target_id)
        .bind(&job.disease_name)
        .bind(&job.user_id)
        .bind(job.status.as_str())
        .bind(to_micros(job.created_at))
        .bind(job.started_at.map(to_micros))
        .bind(job.completed_at.map(to_micros))
        .bind(grid)
        .bind(docking)
        .bind(&job.error_message)
        .bind(&job.protein_file)
        .bind(&job.ligand_file)
        .bind(&job.output_file)
        .bind(job.best_affinity)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn update_row(conn: &mut SqliteConnection, job: &Job) -> Result<()> {
    let (grid, docking) = encode_params(job)?;
    sqlx::query(
        "UPDATE jobs SET candidate_id = ?, target_id = ?, disease_name = ?, user_id = ?, \
         status = ?, started_at = ?, completed_at = ?, grid_params = ?, docking_params = ?, \
         error_message = ?, protein_file = ?, ligand_file = ?, output_file = ?, best_affinity = ? \
         WHERE id = ?",
    )
    .bind(&job.candidate_id)
    .bind(&job.target_id)
    .bind(&job.disease_name)
    .bind(&job.user_id)
    .bind(job.status.as_str())
    .bind(job.started_at.map(to_micros))
    .bind(job.completed_at.map(to_micros))
    .bind(grid)
    .bind(docking)
    .bind(&job.error_message)
    .bind(&job.protein_file)
    .bind(&job.ligand_file)
    .bind(&job.output_file)
    .bind(job.best_affinity)
    .bind(job.id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}
