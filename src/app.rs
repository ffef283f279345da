use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::audit::{AuditConfig, AuditLogger, AuditScope, ClientContext};
use crate::authz::Principal;
use crate::docs;
use crate::errors::AppError;
use crate::jwt::JwtConfig;
use crate::queue::{JobQueue, QueueConfig, SqliteJobQueue};
use crate::routes::{auth, health, organizations, suppliers, users};
use crate::throttle::{self, AuthRateLimits, AuthThrottle};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub queue: Arc<dyn JobQueue>,
    pub audit: AuditLogger,
    pub audit_config: AuditConfig,
    pub throttle: AuthThrottle,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        jwt: JwtConfig,
        queue: Arc<dyn JobQueue>,
        audit_config: AuditConfig,
        throttle: AuthThrottle,
    ) -> Self {
        Self {
            audit: AuditLogger::new(pool.clone()),
            pool,
            jwt: Arc::new(jwt),
            queue,
            audit_config,
            throttle,
        }
    }

    pub fn audit_scope<'a>(&'a self, principal: &'a Principal, client: &'a ClientContext) -> AuditScope<'a> {
        AuditScope {
            logger: &self.audit,
            principal,
            client,
        }
    }
}

/// Build the service with configuration from the environment and a queue over `pool`.
pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let queue = SqliteJobQueue::open(pool.clone(), QueueConfig::from_env()?).await?;
    create_app_with_queue(pool, Arc::new(queue)).await
}

/// Build the service around an existing queue, so the caller keeps a handle
/// to it (for the worker, or to inspect jobs in tests).
pub async fn create_app_with_queue(pool: SqlitePool, queue: Arc<dyn JobQueue>) -> Result<Router, AppError> {
    let throttle = AuthThrottle::new(AuthRateLimits::from_env()?)?;
    let state = AppState::new(pool, JwtConfig::from_env()?, queue, AuditConfig::from_env()?, throttle);
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/me", get(auth::me));

    let supplier_routes = Router::new()
        .route("/", get(suppliers::list_suppliers).post(suppliers::create_supplier))
        .route(
            "/:id",
            get(suppliers::get_supplier)
                .put(suppliers::update_supplier)
                .delete(suppliers::delete_supplier),
        )
        .route("/:id/risk-level", patch(suppliers::update_risk_level))
        .route("/:id/notes", patch(suppliers::update_notes))
        .route("/:id/audit-logs", get(suppliers::supplier_audit_logs));

    let user_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route(
            "/:id",
            get(users::get_user).patch(users::update_user).delete(users::delete_user),
        );

    let organization_routes =
        Router::new().route("/current", delete(organizations::delete_current_organization));

    let api = Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/suppliers", supplier_routes)
        .nest("/users", user_routes)
        .nest("/organizations", organization_routes)
        .with_state(state)
        .merge(docs::swagger_routes());

    throttle::security_headers(api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
