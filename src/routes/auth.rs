use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::app::AppState;
use crate::audit::ClientContext;
use crate::authz::{Principal, Role};
use crate::db;
use crate::db::users::NewUser;
use crate::errors::{AppError, AppResult};
use crate::jwt::TokenKind;
use crate::models::user::{
    normalize_email, normalize_full_name, AuthResponse, LoginRequest, RefreshRequest, RegisterRequest, User,
};
use crate::utils::{hash_password, required_text, verify_password};

const ORGANIZATION_NAME_MAX_CHARS: usize = 255;

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Organization and owner created", body = AuthResponse),
        (status = 409, description = "Email already in use"),
        (status = 429, description = "Too many registrations from this client")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    client: ClientContext,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    state.throttle.check_register(&client)?;
    let organization_name = required_text(&payload.organization_name, "organizationName", ORGANIZATION_NAME_MAX_CHARS)?;
    let full_name = normalize_full_name(&payload.full_name)?;
    let email = normalize_email(&payload.email)?;
    db::users::ensure_email_available(&state.pool, &email).await?;
    let password_hash = hash_password(&payload.password)?;

    let mut tx = state.pool.begin().await?;
    let organization = db::organizations::insert(&mut tx, &organization_name).await?;
    let owner = db::users::insert(
        &mut tx,
        NewUser {
            email: &email,
            password_hash: &password_hash,
            full_name: &full_name,
            role: Role::Owner,
            organization_id: organization.id,
        },
    )
    .await?;
    tx.commit().await?;

    let user: User = owner.try_into()?;
    tracing::info!(organization_id = %organization.id, user_id = %user.id, "organization registered");

    Ok((StatusCode::CREATED, Json(state.jwt.issue(user)?)))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Too many login attempts from this client")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    client: ClientContext,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    state.throttle.check_login(&client)?;
    let invalid = || AppError::unauthorized("invalid credentials");

    let email = normalize_email(&payload.email).map_err(|_| invalid())?;
    let db_user = db::users::fetch_by_email(&state.pool, &email)
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&payload.password, &db_user.password_hash)? {
        return Err(invalid());
    }

    let user: User = db_user.try_into()?;
    Ok(Json(state.jwt.issue(user)?))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "Auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = AuthResponse),
        (status = 401, description = "Refresh token invalid or user gone")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    let claims = state.jwt.decode(&payload.refresh_token, TokenKind::Refresh)?;

    // Re-read the user so a changed role or a deleted account takes effect.
    let db_user = db::users::fetch_by_id(&state.pool, claims.sub)
        .await?
        .ok_or_else(|| AppError::unauthorized("user no longer exists"))?;

    let user: User = db_user.try_into()?;
    Ok(Json(state.jwt.issue(user)?))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn me(State(state): State<AppState>, principal: Principal) -> AppResult<Json<User>> {
    let db_user = db::users::fetch_in_org(&state.pool, principal.organization_id, principal.user_id).await?;
    Ok(Json(db_user.try_into()?))
}
