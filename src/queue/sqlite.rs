use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

use super::policy::{job_id, priority_for, QueueConfig};
use super::{
    duration_millis, now_millis, FailureOutcome, JobQueue, QueueError, QueueStats, ReservedJob,
    RiskAnalysisJobData,
};

const WAITING: &str = "waiting";
const ACTIVE: &str = "active";
const COMPLETED: &str = "completed";
const FAILED: &str = "failed";

/// Job queue persisted in the `analysis_jobs` table; jobs survive restarts.
pub struct SqliteJobQueue {
    pool: SqlitePool,
    config: QueueConfig,
    closed: AtomicBool,
}

#[derive(Debug, FromRow)]
struct LeasedRow {
    id: String,
    payload: String,
    attempts_made: i64,
    max_attempts: i64,
    priority: i64,
}

#[derive(Debug, FromRow)]
struct StatsRow {
    waiting: i64,
    delayed: i64,
    active: i64,
    completed: i64,
    failed: i64,
}

impl SqliteJobQueue {
    /// Open the queue, returning abandoned leases to the waiting set.
    pub async fn open(pool: SqlitePool, config: QueueConfig) -> Result<Self, QueueError> {
        let queue = Self {
            pool,
            config,
            closed: AtomicBool::new(false),
        };

        let reclaimed = queue.reclaim_stale().await?;
        if reclaimed > 0 {
            tracing::warn!(reclaimed, "returned abandoned analysis jobs to the queue");
        }
        tracing::info!(
            max_attempts = config.retry.max_attempts,
            lease_timeout_secs = config.lease_timeout.as_secs(),
            "analysis queue opened"
        );
        Ok(queue)
    }

    fn lease_cutoff(&self, now: i64) -> i64 {
        now - duration_millis(self.config.lease_timeout)
    }

    async fn reclaim_stale(&self) -> Result<u64, QueueError> {
        let now = now_millis();
        let result = sqlx::query(
            "UPDATE analysis_jobs SET state = ?, leased_at = NULL, available_at = ? \
             WHERE state = ? AND leased_at <= ?",
        )
        .bind(WAITING)
        .bind(now)
        .bind(ACTIVE)
        .bind(self.lease_cutoff(now))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, data: RiskAnalysisJobData) -> Result<String, QueueError> {
        self.ensure_open()?;

        let now = now_millis();
        let id = job_id(data.supplier_id, now);
        let priority = priority_for(data.category);
        let payload = serde_json::to_string(&data)?;

        let result = sqlx::query(
            "INSERT INTO analysis_jobs (id, supplier_id, organization_id, payload, priority, state, \
             attempts_made, max_attempts, available_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&id)
        .bind(data.supplier_id.to_string())
        .bind(data.organization_id.to_string())
        .bind(&payload)
        .bind(priority)
        .bind(WAITING)
        .bind(i64::from(self.config.retry.max_attempts))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(job_id = %id, "analysis job already queued");
        } else {
            tracing::info!(job_id = %id, supplier_id = %data.supplier_id, priority, "analysis job queued");
        }
        Ok(id)
    }

    async fn reserve(&self) -> Result<Option<ReservedJob>, QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let now = now_millis();
        let row = sqlx::query_as::<_, LeasedRow>(
            "UPDATE analysis_jobs SET state = ?, leased_at = ?, attempts_made = attempts_made + 1 \
             WHERE id = ( \
                 SELECT id FROM analysis_jobs \
                 WHERE (state = ? AND available_at <= ?) OR (state = ? AND leased_at <= ?) \
                 ORDER BY priority ASC, available_at ASC, created_at ASC, rowid ASC \
                 LIMIT 1 \
             ) \
             RETURNING id, payload, attempts_made, max_attempts, priority",
        )
        .bind(ACTIVE)
        .bind(now)
        .bind(WAITING)
        .bind(now)
        .bind(ACTIVE)
        .bind(self.lease_cutoff(now))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ReservedJob {
            data: serde_json::from_str(&row.payload)?,
            id: row.id,
            attempts_made: u32::try_from(row.attempts_made).unwrap_or(u32::MAX),
            max_attempts: u32::try_from(row.max_attempts).unwrap_or(u32::MAX),
            priority: row.priority,
        }))
    }

    async fn complete(&self, job: &ReservedJob) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE analysis_jobs SET state = ?, finished_at = ?, leased_at = NULL, last_error = NULL \
             WHERE id = ? AND state = ? AND attempts_made = ?",
        )
        .bind(COMPLETED)
        .bind(now_millis())
        .bind(&job.id)
        .bind(ACTIVE)
        .bind(i64::from(job.attempts_made))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotActive(job.id.clone()));
        }
        Ok(())
    }

    async fn fail(&self, job: &ReservedJob, error: &str) -> Result<FailureOutcome, QueueError> {
        let job_id = job.id.as_str();
        let mut tx = self.pool.begin().await?;

        let attempts: Option<(i64, i64)> = sqlx::query_as(
            "SELECT attempts_made, max_attempts FROM analysis_jobs WHERE id = ? AND state = ? AND attempts_made = ?",
        )
        .bind(job_id)
        .bind(ACTIVE)
        .bind(i64::from(job.attempts_made))
        .fetch_optional(&mut *tx)
        .await?;

        let Some((attempts_made, max_attempts)) = attempts else {
            return Err(QueueError::NotActive(job_id.to_string()));
        };
        let attempt = u32::try_from(attempts_made).unwrap_or(u32::MAX);
        let now = now_millis();

        let outcome = if attempts_made >= max_attempts {
            sqlx::query(
                "UPDATE analysis_jobs SET state = ?, finished_at = ?, leased_at = NULL, last_error = ? WHERE id = ?",
            )
            .bind(FAILED)
            .bind(now)
            .bind(error)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

            FailureOutcome::Exhausted { attempts: attempt }
        } else {
            let delay = self.config.retry.delay_for(attempt);
            sqlx::query(
                "UPDATE analysis_jobs SET state = ?, available_at = ?, leased_at = NULL, last_error = ? WHERE id = ?",
            )
            .bind(WAITING)
            .bind(now + duration_millis(delay))
            .bind(error)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

            FailureOutcome::Retry { attempt, delay }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn purge_expired(&self) -> Result<u64, QueueError> {
        let now = now_millis();
        let retention = self.config.retention;

        let expired_completed = sqlx::query("DELETE FROM analysis_jobs WHERE state = ? AND finished_at <= ?")
            .bind(COMPLETED)
            .bind(now - duration_millis(retention.completed_max_age))
            .execute(&self.pool)
            .await?
            .rows_affected();

        let overflow_completed = sqlx::query(
            "DELETE FROM analysis_jobs WHERE state = ? AND id NOT IN ( \
                 SELECT id FROM analysis_jobs WHERE state = ? ORDER BY finished_at DESC, rowid DESC LIMIT ? \
             )",
        )
        .bind(COMPLETED)
        .bind(COMPLETED)
        .bind(i64::from(retention.completed_max_count))
        .execute(&self.pool)
        .await?
        .rows_affected();

        let expired_failed = sqlx::query("DELETE FROM analysis_jobs WHERE state = ? AND finished_at <= ?")
            .bind(FAILED)
            .bind(now - duration_millis(retention.failed_max_age))
            .execute(&self.pool)
            .await?
            .rows_affected();

        let purged = expired_completed + overflow_completed + expired_failed;
        if purged > 0 {
            tracing::info!(purged, "purged finished analysis jobs");
        }
        Ok(purged)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let now = now_millis();
        let row = sqlx::query_as::<_, StatsRow>(
            "SELECT \
                 COALESCE(SUM(CASE WHEN state = 'waiting' AND available_at <= ? THEN 1 ELSE 0 END), 0) AS waiting, \
                 COALESCE(SUM(CASE WHEN state = 'waiting' AND available_at > ? THEN 1 ELSE 0 END), 0) AS delayed, \
                 COALESCE(SUM(CASE WHEN state = 'active' THEN 1 ELSE 0 END), 0) AS active, \
                 COALESCE(SUM(CASE WHEN state = 'completed' THEN 1 ELSE 0 END), 0) AS completed, \
                 COALESCE(SUM(CASE WHEN state = 'failed' THEN 1 ELSE 0 END), 0) AS failed \
             FROM analysis_jobs",
        )
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            waiting: row.waiting,
            delayed: row.delayed,
            active: row.active,
            completed: row.completed,
            failed: row.failed,
        })
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("analysis queue closed");
        }
    }
}
