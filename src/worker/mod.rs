//! Consumes risk-analysis jobs and writes scores back to suppliers.
//!
//! Per supplier, `ai_analysis_status` moves Pending -> Complete when a score is
//! stored, or Pending -> Error once the job's last attempt fails. Earlier
//! failures go back to the queue's backoff and the supplier stays Pending.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use sqlx::SqlitePool;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::env_or;
use crate::db;
use crate::errors::{AppError, AppResult};
use crate::queue::{FailureOutcome, JobQueue, ReservedJob};
use crate::sanitize::{build_risk_analysis_prompt, PromptVariables};

mod engine;

pub use engine::{MockScoringEngine, RiskAnalysis, ScoringEngine, ScoringError, ScoringRequest};

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// At most `rate_max` scoring calls per `rate_window`.
    pub rate_max: u32,
    pub rate_window: Duration,
    pub poll_interval: Duration,
    pub purge_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_max: 10,
            rate_window: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            purge_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = WorkerConfig::default();
        Ok(Self {
            concurrency: env_or("WORKER_CONCURRENCY", defaults.concurrency)?,
            rate_max: env_or("WORKER_RATE_MAX", defaults.rate_max)?,
            rate_window: Duration::from_secs(env_or("WORKER_RATE_WINDOW_SECS", defaults.rate_window.as_secs())?),
            poll_interval: Duration::from_millis(env_or("WORKER_POLL_MS", 1_000u64)?),
            purge_interval: Duration::from_secs(env_or(
                "WORKER_PURGE_INTERVAL_SECS",
                defaults.purge_interval.as_secs(),
            )?),
        })
    }

    fn quota(&self) -> Result<Quota, AppError> {
        let burst = NonZeroU32::new(self.rate_max)
            .ok_or_else(|| AppError::configuration("WORKER_RATE_MAX must be at least 1"))?;
        Quota::with_period(self.rate_window / self.rate_max)
            .map(|quota| quota.allow_burst(burst))
            .ok_or_else(|| AppError::configuration("WORKER_RATE_WINDOW_SECS must be positive"))
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JobOutcome {
    Completed { risk_score: f64 },
    /// The supplier was deleted; nothing to score.
    SupplierGone,
    Retrying { attempt: u32, delay: Duration },
    Failed { attempts: u32 },
}

#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Storage(#[from] AppError),
    #[error("could not encode analysis: {0}")]
    Encode(#[from] serde_json::Error),
}

enum Attempt {
    Scored(f64),
    SupplierGone,
}

pub struct RiskWorker {
    pool: SqlitePool,
    queue: Arc<dyn JobQueue>,
    engine: Arc<dyn ScoringEngine>,
    config: WorkerConfig,
    limiter: DefaultDirectRateLimiter,
    permits: Arc<Semaphore>,
}

impl RiskWorker {
    pub fn new(
        pool: SqlitePool,
        queue: Arc<dyn JobQueue>,
        engine: Arc<dyn ScoringEngine>,
        config: WorkerConfig,
    ) -> Result<Self, AppError> {
        if config.concurrency == 0 {
            return Err(AppError::configuration("WORKER_CONCURRENCY must be at least 1"));
        }

        Ok(Self {
            limiter: RateLimiter::direct(config.quota()?),
            permits: Arc::new(Semaphore::new(config.concurrency)),
            pool,
            queue,
            engine,
            config,
        })
    }

    /// Run one leased job to a settled state in the queue.
    pub async fn process(&self, job: ReservedJob) -> AppResult<JobOutcome> {
        let span = tracing::info_span!(
            "risk_job",
            job_id = %job.id,
            supplier_id = %job.data.supplier_id,
            attempt = job.attempts_made,
            max_attempts = job.max_attempts,
        );

        async move {
            match self.attempt(&job).await {
                Ok(Attempt::Scored(risk_score)) => {
                    self.queue.complete(&job).await?;
                    tracing::info!(risk_score, "risk analysis complete");
                    Ok(JobOutcome::Completed { risk_score })
                }
                Ok(Attempt::SupplierGone) => {
                    self.queue.complete(&job).await?;
                    tracing::info!("supplier no longer exists; job completed without analysis");
                    Ok(JobOutcome::SupplierGone)
                }
                Err(err) => self.handle_failure(&job, err).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, job: &ReservedJob) -> Result<Attempt, AttemptError> {
        let data = &job.data;

        if !db::suppliers::mark_analysis_pending(&self.pool, data.organization_id, data.supplier_id).await? {
            return Ok(Attempt::SupplierGone);
        }

        self.limiter.until_ready().await;

        let prompt = build_risk_analysis_prompt(&PromptVariables {
            name: data.supplier_name.clone(),
            domain: data.domain.clone(),
            category: data.category,
            status: data.status,
            contract_end_date: data.contract_end_date.clone(),
            notes: data.notes.clone(),
        });
        let request = ScoringRequest {
            supplier_id: data.supplier_id,
            prompt,
            data: data.clone(),
        };

        let analysis = self.engine.analyze(&request).await?;
        analysis.validate()?;
        let payload = serde_json::to_string(&analysis)?;

        let stored = db::suppliers::record_analysis(
            &self.pool,
            data.organization_id,
            data.supplier_id,
            analysis.risk_score,
            &payload,
        )
        .await?;

        Ok(if stored {
            Attempt::Scored(analysis.risk_score)
        } else {
            Attempt::SupplierGone
        })
    }

    async fn handle_failure(&self, job: &ReservedJob, err: AttemptError) -> AppResult<JobOutcome> {
        tracing::warn!(error = %err, "risk analysis attempt failed");

        if job.is_last_attempt() {
            let data = &job.data;
            match db::suppliers::mark_analysis_failed(&self.pool, data.organization_id, data.supplier_id).await {
                Ok(true) => tracing::error!("retry budget exhausted; supplier analysis marked as error"),
                Ok(false) => tracing::info!("supplier no longer exists; nothing to mark"),
                Err(mark_err) => tracing::error!(error = %mark_err, "could not mark supplier analysis as error"),
            }
        }

        Ok(match self.queue.fail(job, &err.to_string()).await? {
            FailureOutcome::Retry { attempt, delay } => {
                tracing::info!(delay_ms = delay.as_millis() as u64, "analysis retry scheduled");
                JobOutcome::Retrying { attempt, delay }
            }
            FailureOutcome::Exhausted { attempts } => JobOutcome::Failed { attempts },
        })
    }

    async fn settle(&self, job: ReservedJob) {
        let job_id = job.id.clone();
        if let Err(err) = self.process(job).await {
            tracing::error!(job_id = %job_id, error = %err, "could not settle analysis job");
        }
    }

    /// Process every job that is available now (including immediate retries),
    /// up to `concurrency` at a time. Returns the number of attempts made.
    pub async fn drain(self: &Arc<Self>) -> AppResult<usize> {
        let mut attempts = 0;
        let mut tasks = JoinSet::new();

        loop {
            while tasks.len() < self.config.concurrency {
                let Some(job) = self.queue.reserve().await? else {
                    break;
                };
                let worker = Arc::clone(self);
                tasks.spawn(async move { worker.settle(job).await });
            }

            match tasks.join_next().await {
                Some(joined) => {
                    attempts += 1;
                    if let Err(err) = joined {
                        tracing::error!(error = %err, "analysis task panicked");
                    }
                }
                None => break,
            }
        }

        Ok(attempts)
    }

    /// Poll the queue until `shutdown` flips, then wait for in-flight jobs.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            concurrency = self.config.concurrency,
            rate_max = self.config.rate_max,
            rate_window_secs = self.config.rate_window.as_secs(),
            "risk worker started"
        );
        let mut last_purge: Option<Instant> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            if last_purge.map_or(true, |at| at.elapsed() >= self.config.purge_interval) {
                if let Err(err) = self.queue.purge_expired().await {
                    tracing::error!(error = %err, "job retention purge failed");
                }
                last_purge = Some(Instant::now());
            }

            let permit = tokio::select! {
                _ = shutdown.changed() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.queue.reserve().await {
                Ok(Some(job)) => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        worker.settle(job).await;
                        drop(permit);
                    });
                    continue;
                }
                Ok(None) => drop(permit),
                Err(err) => {
                    drop(permit);
                    tracing::error!(error = %err, "could not reserve analysis job");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!("risk worker stopping; waiting for in-flight jobs");
        let all = u32::try_from(self.config.concurrency).unwrap_or(u32::MAX);
        if self.permits.acquire_many(all).await.is_ok() {
            tracing::info!("risk worker stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_quota_allows_ten_per_minute() {
        let quota = WorkerConfig::default().quota().unwrap();
        assert_eq!(quota.burst_size().get(), 10);
        assert_eq!(quota.replenish_interval(), Duration::from_secs(6));
    }

    #[test]
    fn zero_rate_is_a_configuration_error() {
        let config = WorkerConfig {
            rate_max: 0,
            ..WorkerConfig::default()
        };
        assert!(matches!(config.quota(), Err(AppError::Configuration(_))));
    }
}
