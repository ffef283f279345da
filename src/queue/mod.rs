//! Durable job queue for asynchronous supplier risk analysis.
//!
//! The queue is an explicitly constructed [`JobQueue`] handed to whoever needs
//! it: [`SqliteJobQueue`] in the service and [`MemoryJobQueue`] in tests. A job
//! is delivered to one attempt at a time; failed attempts come back after the
//! backoff delay until the attempt budget is spent.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::supplier::{Supplier, SupplierCategory, SupplierStatus};

mod memory;
pub mod policy;
mod sqlite;

pub use memory::MemoryJobQueue;
pub use policy::{job_id, priority_for, QueueConfig, RetentionPolicy, RetryPolicy};
pub use sqlite::SqliteJobQueue;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
    #[error("job {0} is not active")]
    NotActive(String),
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("queue storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// What the worker needs to score one supplier. Serialized as the job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAnalysisJobData {
    pub supplier_id: Uuid,
    pub supplier_name: String,
    pub domain: String,
    pub category: SupplierCategory,
    pub status: SupplierStatus,
    /// `YYYY-MM-DD` or null.
    pub contract_end_date: Option<String>,
    pub notes: Option<String>,
    pub organization_id: Uuid,
}

impl From<&Supplier> for RiskAnalysisJobData {
    fn from(supplier: &Supplier) -> Self {
        Self {
            supplier_id: supplier.id,
            supplier_name: supplier.name.clone(),
            domain: supplier.domain.clone(),
            category: supplier.category,
            status: supplier.status,
            contract_end_date: supplier
                .contract_end_date
                .map(|date| date.format("%Y-%m-%d").to_string()),
            notes: supplier.notes.clone(),
            organization_id: supplier.organization_id,
        }
    }
}

/// A job leased to one worker attempt.
#[derive(Debug, Clone)]
pub struct ReservedJob {
    pub id: String,
    pub data: RiskAnalysisJobData,
    /// Attempts including the current one. Also identifies this lease.
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub priority: i64,
}

impl ReservedJob {
    pub fn is_last_attempt(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The job will be offered again after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// The budget is spent; the job is kept as failed.
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub waiting: i64,
    /// Waiting jobs still inside their backoff delay.
    pub delayed: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job for the supplier and return its id. Enqueueing the same
    /// supplier twice in the same millisecond yields the existing job.
    async fn enqueue(&self, data: RiskAnalysisJobData) -> Result<String, QueueError>;

    /// Lease the most urgent available job, if any. Lower priority values go first.
    async fn reserve(&self) -> Result<Option<ReservedJob>, QueueError>;

    /// Settle `job` as done. Only the lease that `reserve` handed out last can
    /// settle a job; a lease that was taken over gets [`QueueError::NotActive`].
    async fn complete(&self, job: &ReservedJob) -> Result<(), QueueError>;

    /// Record a failed attempt and either schedule a retry or retire the job.
    /// Fenced to the current lease like [`JobQueue::complete`].
    async fn fail(&self, job: &ReservedJob, error: &str) -> Result<FailureOutcome, QueueError>;

    /// Drop finished jobs past their retention window. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Stop accepting and handing out jobs. In-flight jobs can still be settled.
    async fn close(&self);
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
