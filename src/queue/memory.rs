use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::policy::{job_id, priority_for, QueueConfig};
use super::{
    duration_millis, now_millis, FailureOutcome, JobQueue, QueueError, QueueStats, ReservedJob,
    RiskAnalysisJobData,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Waiting,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
struct Job {
    seq: u64,
    data: RiskAnalysisJobData,
    priority: i64,
    state: State,
    attempts_made: u32,
    available_at: i64,
    finished_at: Option<i64>,
    last_error: Option<String>,
}

impl Job {
    fn holds(&self, leased: &ReservedJob) -> bool {
        self.state == State::Active && self.attempts_made == leased.attempts_made
    }
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    jobs: HashMap<String, Job>,
}

/// In-process queue with the same dispatch and retry semantics as
/// [`super::SqliteJobQueue`]. Nothing survives the process.
pub struct MemoryJobQueue {
    config: QueueConfig,
    inner: Mutex<Inner>,
    closed: AtomicBool,
}

impl MemoryJobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Ids of every job ever accepted for `supplier_id`.
    pub async fn jobs_for(&self, supplier_id: uuid::Uuid) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<(u64, String)> = inner
            .jobs
            .iter()
            .filter(|(_, job)| job.data.supplier_id == supplier_id)
            .map(|(id, job)| (job.seq, id.clone()))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    pub async fn last_error(&self, job_id: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.jobs.get(job_id).and_then(|job| job.last_error.clone())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, data: RiskAnalysisJobData) -> Result<String, QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let now = now_millis();
        let id = job_id(data.supplier_id, now);
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&id) {
            return Ok(id);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            id.clone(),
            Job {
                seq,
                priority: priority_for(data.category),
                data,
                state: State::Waiting,
                attempts_made: 0,
                available_at: now,
                finished_at: None,
                last_error: None,
            },
        );
        Ok(id)
    }

    async fn reserve(&self) -> Result<Option<ReservedJob>, QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let now = now_millis();
        let mut inner = self.inner.lock().await;
        let next = inner
            .jobs
            .iter()
            .filter(|(_, job)| job.state == State::Waiting && job.available_at <= now)
            .min_by_key(|(_, job)| (job.priority, job.available_at, job.seq))
            .map(|(id, _)| id.clone());

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Ok(None);
        };

        job.state = State::Active;
        job.attempts_made += 1;

        Ok(Some(ReservedJob {
            id,
            data: job.data.clone(),
            attempts_made: job.attempts_made,
            max_attempts: self.config.retry.max_attempts,
            priority: job.priority,
        }))
    }

    async fn complete(&self, leased: &ReservedJob) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&leased.id) {
            Some(job) if job.holds(leased) => {
                job.state = State::Completed;
                job.finished_at = Some(now_millis());
                job.last_error = None;
                Ok(())
            }
            _ => Err(QueueError::NotActive(leased.id.clone())),
        }
    }

    async fn fail(&self, leased: &ReservedJob, error: &str) -> Result<FailureOutcome, QueueError> {
        let mut inner = self.inner.lock().await;
        let job = match inner.jobs.get_mut(&leased.id) {
            Some(job) if job.holds(leased) => job,
            _ => return Err(QueueError::NotActive(leased.id.clone())),
        };

        let now = now_millis();
        job.last_error = Some(error.to_string());

        if job.attempts_made >= self.config.retry.max_attempts {
            job.state = State::Failed;
            job.finished_at = Some(now);
            return Ok(FailureOutcome::Exhausted {
                attempts: job.attempts_made,
            });
        }

        let delay = self.config.retry.delay_for(job.attempts_made);
        job.state = State::Waiting;
        job.available_at = now + duration_millis(delay);
        Ok(FailureOutcome::Retry {
            attempt: job.attempts_made,
            delay,
        })
    }

    async fn purge_expired(&self) -> Result<u64, QueueError> {
        let now = now_millis();
        let retention = self.config.retention;
        let completed_cutoff = now - duration_millis(retention.completed_max_age);
        let failed_cutoff = now - duration_millis(retention.failed_max_age);

        let mut inner = self.inner.lock().await;
        let before = inner.jobs.len();

        inner.jobs.retain(|_, job| match (job.state, job.finished_at) {
            (State::Completed, Some(at)) => at > completed_cutoff,
            (State::Failed, Some(at)) => at > failed_cutoff,
            _ => true,
        });

        let mut completed: Vec<(i64, u64, String)> = inner
            .jobs
            .iter()
            .filter(|(_, job)| job.state == State::Completed)
            .map(|(id, job)| (job.finished_at.unwrap_or_default(), job.seq, id.clone()))
            .collect();
        completed.sort_by(|a, b| b.cmp(a));
        for (_, _, id) in completed.into_iter().skip(retention.completed_max_count as usize) {
            inner.jobs.remove(&id);
        }

        Ok((before - inner.jobs.len()) as u64)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let now = now_millis();
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();
        for job in inner.jobs.values() {
            match job.state {
                State::Waiting if job.available_at > now => stats.delayed += 1,
                State::Waiting => stats.waiting += 1,
                State::Active => stats.active += 1,
                State::Completed => stats.completed += 1,
                State::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
