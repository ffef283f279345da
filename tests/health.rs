mod common;

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::util::ServiceExt; // for `oneshot`

use common::test_pool;
use supplier_risk::create_app;

async fn get_json(app: &Router, uri: &str) -> Result<(StatusCode, Value)> {
    let req = Request::builder().method("GET").uri(uri).body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

#[tokio::test]
async fn service_from_environment_reports_healthy() -> Result<()> {
    let (pool, _dir) = test_pool().await?;

    // The full service reads its secret from the environment.
    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    let (status, health) = get_json(&app, "/api/health").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok", "unexpected health: {health}");
    assert_eq!(health["db_ok"], true);
    assert_eq!(health["queue"]["waiting"], 0);

    let (status, doc) = get_json(&app, "/api-docs/openapi.json").await?;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"].get("/suppliers/{id}/risk-level").is_some());

    // A closed pool fails both checks but the endpoint still answers.
    pool.close().await;
    let (status, health) = get_json(&app, "/api/health").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["db_ok"], false);
    assert!(health["queue_error"].is_string());

    Ok(())
}
