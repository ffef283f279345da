mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::StatusCode;

use common::{spawn_app, TestApp};
use supplier_risk::models::supplier::Supplier;
use supplier_risk::queue::{JobQueue, MemoryJobQueue, QueueConfig, RetryPolicy, RiskAnalysisJobData};
use supplier_risk::worker::{
    JobOutcome, MockScoringEngine, RiskAnalysis, RiskWorker, ScoringEngine, ScoringError, ScoringRequest,
    WorkerConfig,
};

struct FailingEngine {
    calls: AtomicU32,
}

#[async_trait]
impl ScoringEngine for FailingEngine {
    async fn analyze(&self, _request: &ScoringRequest) -> Result<RiskAnalysis, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ScoringError::Unavailable("upstream timeout".into()))
    }
}

/// Scores like the mock engine but holds each call open and records the
/// highest number of calls seen in flight at once.
struct GaugedEngine {
    inner: MockScoringEngine,
    hold: Duration,
    in_flight: AtomicU32,
    peak: AtomicU32,
}

impl GaugedEngine {
    fn new(hold: Duration) -> Self {
        Self {
            inner: MockScoringEngine::new(Duration::ZERO),
            hold,
            in_flight: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ScoringEngine for GaugedEngine {
    async fn analyze(&self, request: &ScoringRequest) -> Result<RiskAnalysis, ScoringError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.analyze(request).await
    }
}

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 2,
        poll_interval: Duration::ZERO,
        ..WorkerConfig::default()
    }
}

fn worker(t: &TestApp, queue: Arc<dyn JobQueue>, engine: Arc<dyn ScoringEngine>) -> Result<Arc<RiskWorker>> {
    Ok(Arc::new(RiskWorker::new(t.pool.clone(), queue, engine, fast_config())?))
}

async fn supplier(t: &TestApp, token: &str, name: &str) -> Result<Supplier> {
    let body = t.create_supplier(token, name, "infrastructure").await?;
    Ok(serde_json::from_value(body)?)
}

#[tokio::test]
async fn created_supplier_is_scored_by_the_worker() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, _) = t.register("Acme", "owner@acme.test").await?;
    let created = supplier(&t, &owner, "Edge Network").await?;

    let jobs = t.queue.jobs_for(created.id).await;
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].starts_with(&format!("risk-analysis-{}-", created.id)));

    let worker = worker(&t, t.queue.clone(), Arc::new(MockScoringEngine::new(Duration::ZERO)))?;
    assert_eq!(worker.drain().await?, 1);

    let (status, body) = t
        .send("GET", &format!("/suppliers/{}", created.id), Some(&owner), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["aiAnalysisStatus"], "complete");
    assert_eq!(body["aiRiskScore"], 58.0);
    assert_eq!(body["aiAnalysis"]["model"], MockScoringEngine::MODEL);
    assert_eq!(body["aiAnalysis"]["keyRisks"].as_array().map(Vec::len), Some(5));

    let stats = t.queue.stats().await?;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.waiting, 0);

    // Scoring is not a user action and leaves the audit trail alone.
    assert_eq!(t.audit_row_count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_mark_the_supplier_as_error() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, _) = t.register("Acme", "owner@acme.test").await?;
    let created = supplier(&t, &owner, "Flaky Host").await?;

    let queue = Arc::new(MemoryJobQueue::new(QueueConfig::default().with_retry(RetryPolicy::immediate(3))));
    let job_id = queue.enqueue(RiskAnalysisJobData::from(&created)).await?;

    let engine = Arc::new(FailingEngine { calls: AtomicU32::new(0) });
    let worker = worker(&t, queue.clone(), engine.clone())?;
    assert_eq!(worker.drain().await?, 3);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 3);

    let stats = queue.stats().await?;
    assert_eq!(stats.failed, 1);
    assert!(queue
        .last_error(&job_id)
        .await
        .context("error recorded")?
        .contains("upstream timeout"));

    let (_, body) = t
        .send("GET", &format!("/suppliers/{}", created.id), Some(&owner), None)
        .await?;
    assert_eq!(body["aiAnalysisStatus"], "error");
    assert!(body["aiRiskScore"].is_null());
    Ok(())
}

#[tokio::test]
async fn intermediate_failures_keep_the_supplier_pending() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, _) = t.register("Acme", "owner@acme.test").await?;
    let created = supplier(&t, &owner, "Slow Host").await?;

    let queue = Arc::new(MemoryJobQueue::new(QueueConfig::default()));
    queue.enqueue(RiskAnalysisJobData::from(&created)).await?;
    let worker = worker(&t, queue.clone(), Arc::new(FailingEngine { calls: AtomicU32::new(0) }))?;

    let job = queue.reserve().await?.context("job available")?;
    let outcome = worker.process(job).await?;
    assert_eq!(
        outcome,
        JobOutcome::Retrying {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );
    // Backoff hides the job.
    assert!(queue.reserve().await?.is_none());

    let (_, body) = t
        .send("GET", &format!("/suppliers/{}", created.id), Some(&owner), None)
        .await?;
    assert_eq!(body["aiAnalysisStatus"], "pending");
    Ok(())
}

#[tokio::test]
async fn deleted_supplier_completes_without_analysis() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, _) = t.register("Acme", "owner@acme.test").await?;
    let created = supplier(&t, &owner, "Gone Soon").await?;

    let (status, _) = t
        .send("DELETE", &format!("/suppliers/{}", created.id), Some(&owner), None)
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let engine = Arc::new(FailingEngine { calls: AtomicU32::new(0) });
    let worker = worker(&t, t.queue.clone(), engine.clone())?;

    let job = t.queue.reserve().await?.context("job available")?;
    assert_eq!(worker.process(job).await?, JobOutcome::SupplierGone);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    assert_eq!(t.queue.stats().await?.completed, 1);
    Ok(())
}

#[tokio::test]
async fn infrastructure_is_scored_before_consulting() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, _) = t.register("Acme", "owner@acme.test").await?;

    let consulting: Supplier = serde_json::from_value(t.create_supplier(&owner, "Advisors", "consulting").await?)?;
    let infra: Supplier = serde_json::from_value(t.create_supplier(&owner, "Datacenter", "infrastructure").await?)?;

    let first = t.queue.reserve().await?.context("first job")?;
    let second = t.queue.reserve().await?.context("second job")?;
    assert_eq!(first.data.supplier_id, infra.id);
    assert_eq!(second.data.supplier_id, consulting.id);
    Ok(())
}

#[tokio::test]
async fn worker_stops_on_shutdown_signal() -> Result<()> {
    let t = spawn_app().await?;
    let worker = worker(&t, t.queue.clone(), Arc::new(MockScoringEngine::new(Duration::ZERO)))?;

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(worker.run(rx));
    tx.send(true)?;

    tokio::time::timeout(Duration::from_secs(5), handle).await??;
    Ok(())
}

#[tokio::test]
async fn supplier_is_marked_error_when_scoring_cannot_be_queued() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, _) = t.register("Acme", "owner@acme.test").await?;
    t.queue.close().await;

    let created = t.create_supplier(&owner, "Orphan Host", "saas").await?;
    assert_eq!(created["aiAnalysisStatus"], "error");

    let id = created["id"].as_str().context("supplier id")?;
    let (status, body) = t.send("GET", &format!("/suppliers/{id}"), Some(&owner), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["aiAnalysisStatus"], "error");

    // The creation itself stands and is audited.
    assert_eq!(t.audit_row_count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn drain_never_exceeds_the_concurrency_limit() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, _) = t.register("Acme", "owner@acme.test").await?;
    for n in 0..6 {
        supplier(&t, &owner, &format!("Host {n}")).await?;
    }

    let engine = Arc::new(GaugedEngine::new(Duration::from_millis(50)));
    let worker = worker(&t, t.queue.clone(), engine.clone())?;
    assert_eq!(worker.drain().await?, 6);

    assert_eq!(engine.peak.load(Ordering::SeqCst), 2);
    assert_eq!(t.queue.stats().await?.completed, 6);
    Ok(())
}

#[tokio::test]
async fn scoring_calls_respect_the_rate_ceiling() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, _) = t.register("Acme", "owner@acme.test").await?;
    for n in 0..4 {
        supplier(&t, &owner, &format!("Rated {n}")).await?;
    }

    // Two calls up front, then one every 500ms.
    let config = WorkerConfig {
        concurrency: 4,
        rate_max: 2,
        rate_window: Duration::from_secs(1),
        poll_interval: Duration::ZERO,
        ..WorkerConfig::default()
    };
    let engine = Arc::new(GaugedEngine::new(Duration::ZERO));
    let worker = Arc::new(RiskWorker::new(t.pool.clone(), t.queue.clone(), engine, config)?);

    let started = Instant::now();
    assert_eq!(worker.drain().await?, 4);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "four calls finished in {elapsed:?}");
    assert_eq!(t.queue.stats().await?.completed, 4);
    Ok(())
}
