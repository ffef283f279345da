use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{Permission, Principal};
use crate::db;
use crate::db::users::NewUser;
use crate::errors::{AppError, AppResult};
use crate::models::pagination::{PageRequest, Paged};
use crate::models::user::{
    normalize_email, normalize_full_name, CreateUserRequest, UpdateUserRequest, User, UserListQuery,
};
use crate::utils::hash_password;

#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    params(UserListQuery),
    responses(
        (status = 200, description = "Users of the caller's organization", body = crate::models::pagination::UserPage),
        (status = 403, description = "Missing user:manage")
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<UserListQuery>,
) -> AppResult<Json<Paged<User>>> {
    principal.require(Permission::UserManage)?;
    let page = PageRequest::resolve(query.page, query.limit)?;

    let (rows, total) = db::users::list(&state.pool, principal.organization_id, query.role, page).await?;
    let data = rows.into_iter().map(User::try_from).collect::<Result<_, _>>()?;

    Ok(Json(Paged {
        data,
        meta: page.meta(total),
    }))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User detail", body = User),
        (status = 404, description = "No such user in this organization")
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    principal.require(Permission::UserManage)?;

    let db_user = db::users::fetch_in_org(&state.pool, principal.organization_id, id).await?;
    Ok(Json(db_user.try_into()?))
}

#[utoipa::path(
    post,
    path = "/users",
    tag = "Users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    principal.require(Permission::UserManage)?;

    let email = normalize_email(&payload.email)?;
    let full_name = normalize_full_name(&payload.full_name)?;
    db::users::ensure_email_available(&state.pool, &email).await?;
    let password_hash = hash_password(&payload.password)?;

    let mut conn = state.pool.acquire().await?;
    let db_user = db::users::insert(
        &mut conn,
        NewUser {
            email: &email,
            password_hash: &password_hash,
            full_name: &full_name,
            role: payload.role,
            organization_id: principal.organization_id,
        },
    )
    .await?;

    let user: User = db_user.try_into()?;
    tracing::info!(user_id = %user.id, role = %user.role, created_by = %principal.user_id, "user created");
    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    patch,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 400, description = "Nothing to update"),
        (status = 404, description = "No such user in this organization")
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    principal.require(Permission::UserManage)?;
    if payload.is_empty() {
        return Err(AppError::bad_request("no fields to update"));
    }
    let full_name = payload.full_name.as_deref().map(normalize_full_name).transpose()?;

    let db_user = db::users::update(&state.pool, principal.organization_id, id, full_name.as_deref(), payload.role)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    Ok(Json(db_user.try_into()?))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 204, description = "User deleted; audit history is kept"),
        (status = 400, description = "Cannot delete yourself"),
        (status = 404, description = "No such user in this organization")
    )
)]
pub async fn delete_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    principal.require(Permission::UserManage)?;
    if id == principal.user_id {
        return Err(AppError::bad_request("you cannot delete your own account"));
    }

    if !db::users::delete(&state.pool, principal.organization_id, id).await? {
        return Err(AppError::not_found("user not found"));
    }

    tracing::info!(user_id = %id, deleted_by = %principal.user_id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
