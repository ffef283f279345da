use std::net::SocketAddr;
use std::sync::Arc;

use supplier_risk::app::create_app_with_queue;
use supplier_risk::config::{app_port, load_env};
use supplier_risk::db;
use supplier_risk::queue::{JobQueue, QueueConfig, SqliteJobQueue};
use supplier_risk::worker::{MockScoringEngine, RiskWorker, WorkerConfig};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let pool = db::init().await?;
    let queue: Arc<dyn JobQueue> = Arc::new(SqliteJobQueue::open(pool.clone(), QueueConfig::from_env()?).await?);

    let worker = Arc::new(RiskWorker::new(
        pool.clone(),
        Arc::clone(&queue),
        Arc::new(MockScoringEngine::from_env()?),
        WorkerConfig::from_env()?,
    )?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_task = tokio::spawn(worker.run(shutdown_rx));

    let app = create_app_with_queue(pool.clone(), Arc::clone(&queue)).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], app_port()?));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop leasing, let the worker finish what it holds, then close the pool.
    queue.close().await;
    let _ = shutdown_tx.send(true);
    if let Err(err) = worker_task.await {
        tracing::error!(error = %err, "risk worker task failed");
    }
    pool.close().await;
    tracing::info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
