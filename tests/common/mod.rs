#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Duration;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`

use supplier_risk::app::{router, AppState};
use supplier_risk::audit::{AuditConfig, OrgAuditPolicy};
use supplier_risk::jwt::JwtConfig;
use supplier_risk::queue::{MemoryJobQueue, QueueConfig};
use supplier_risk::throttle::{AuthRateLimits, AuthThrottle, RateRule};

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    pub queue: Arc<MemoryJobQueue>,
    _dir: TempDir,
}

/// Temp-file database with migrations applied; the directory lives as long as the pool is used.
pub async fn test_pool() -> Result<(SqlitePool, TempDir)> {
    let dir = tempfile::tempdir()?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    Ok((pool, dir))
}

pub fn jwt() -> JwtConfig {
    JwtConfig {
        secret: Arc::new(b"test-secret".to_vec()),
        access_ttl: Duration::minutes(15),
        refresh_ttl: Duration::hours(1),
    }
}

pub async fn spawn_app() -> Result<TestApp> {
    spawn_app_with_policy(OrgAuditPolicy::Retain).await
}

/// Generous enough that no flow under test trips the credential throttle.
pub fn relaxed_limits() -> AuthRateLimits {
    let rule = RateRule::new(1_000, std::time::Duration::from_secs(1));
    AuthRateLimits {
        login: rule,
        register: rule,
    }
}

pub async fn spawn_app_with_policy(policy: OrgAuditPolicy) -> Result<TestApp> {
    spawn_app_configured(policy, relaxed_limits()).await
}

pub async fn spawn_app_with_limits(limits: AuthRateLimits) -> Result<TestApp> {
    spawn_app_configured(OrgAuditPolicy::Retain, limits).await
}

async fn spawn_app_configured(policy: OrgAuditPolicy, limits: AuthRateLimits) -> Result<TestApp> {
    let (pool, dir) = test_pool().await?;
    let queue = Arc::new(MemoryJobQueue::new(QueueConfig::default()));
    let state = AppState::new(
        pool.clone(),
        jwt(),
        queue.clone(),
        AuditConfig { on_org_delete: policy },
        AuthThrottle::new(limits)?,
    );

    Ok(TestApp {
        app: router(state),
        pool,
        queue,
        _dir: dir,
    })
}

impl TestApp {
    pub async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.9");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let resp = self.app.clone().oneshot(req).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .with_context(|| format!("non-JSON body: {}", String::from_utf8_lossy(&bytes)))?
        };
        Ok((status, value))
    }

    /// Register a fresh organization; returns (owner access token, auth response).
    pub async fn register(&self, organization: &str, email: &str) -> Result<(String, Value)> {
        let (status, body) = self
            .send(
                "POST",
                "/auth/register",
                None,
                Some(json!({
                    "organizationName": organization,
                    "fullName": "Owner Person",
                    "email": email,
                    "password": "password123"
                })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        let token = body["accessToken"].as_str().context("missing accessToken")?.to_string();
        Ok((token, body))
    }

    /// Create a member with `role` in the owner's organization and log them in.
    pub async fn member(&self, owner_token: &str, email: &str, role: &str) -> Result<String> {
        let (status, body) = self
            .send(
                "POST",
                "/users",
                Some(owner_token),
                Some(json!({
                    "email": email,
                    "password": "password123",
                    "fullName": format!("{role} person"),
                    "role": role
                })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "create user failed: {body}");

        let (status, body) = self
            .send(
                "POST",
                "/auth/login",
                None,
                Some(json!({ "email": email, "password": "password123" })),
            )
            .await?;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        Ok(body["accessToken"].as_str().context("missing accessToken")?.to_string())
    }

    pub async fn create_supplier(&self, token: &str, name: &str, category: &str) -> Result<Value> {
        let (status, body) = self
            .send(
                "POST",
                "/suppliers",
                Some(token),
                Some(json!({
                    "name": name,
                    "domain": format!("{}.example.com", name.to_lowercase().replace(' ', "-")),
                    "category": category,
                    "riskLevel": "medium"
                })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "create supplier failed: {body}");
        Ok(body)
    }

    pub async fn audit_logs(&self, token: &str, supplier_id: &str) -> Result<(StatusCode, Value)> {
        self.send("GET", &format!("/suppliers/{supplier_id}/audit-logs"), Some(token), None)
            .await
    }

    pub async fn audit_row_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(1) FROM audit_logs")
            .fetch_one(&self.pool)
            .await?)
    }
}
