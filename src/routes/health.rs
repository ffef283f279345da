use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::query_scalar;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::errors::AppResult;
use crate::queue::QueueStats;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db_ok: bool,
    pub db_error: Option<String>,
    pub queue: Option<QueueStats>,
    pub queue_error: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let db_error = query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .err()
        .map(|err| err.to_string());

    let (queue, queue_error) = match state.queue.stats().await {
        Ok(stats) => (Some(stats), None),
        Err(err) => (None, Some(err.to_string())),
    };

    Ok(Json(HealthResponse {
        status: if db_error.is_none() && queue_error.is_none() { "ok" } else { "degraded" },
        db_ok: db_error.is_none(),
        db_error,
        queue,
        queue_error,
    }))
}
