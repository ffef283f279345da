use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{audited, ClientContext};
use crate::authz::{Permission, Principal};
use crate::db;
use crate::errors::{AppError, AppResult};
use crate::models::audit_log::{AuditAction, AuditLogEntry, AuditLogQuery};
use crate::models::pagination::{PageRequest, Paged};
use crate::models::supplier::{
    AiAnalysisStatus, CreateSupplierRequest, Supplier, SupplierChanges, SupplierListQuery, UpdateNotesRequest,
    UpdateRiskLevelRequest, UpdateSupplierRequest,
};
use crate::queue::RiskAnalysisJobData;

fn not_found() -> AppError {
    AppError::not_found("supplier not found")
}

#[utoipa::path(
    get,
    path = "/suppliers",
    tag = "Suppliers",
    params(SupplierListQuery),
    responses(
        (status = 200, description = "Suppliers of the caller's organization", body = crate::models::pagination::SupplierPage)
    )
)]
pub async fn list_suppliers(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<SupplierListQuery>,
) -> AppResult<Json<Paged<Supplier>>> {
    principal.require(Permission::SupplierRead)?;
    let page = PageRequest::resolve(query.page, query.limit)?;

    let (data, total) = db::suppliers::list(&state.pool, principal.organization_id, &query, page).await?;
    Ok(Json(Paged {
        data,
        meta: page.meta(total),
    }))
}

#[utoipa::path(
    get,
    path = "/suppliers/{id}",
    tag = "Suppliers",
    params(("id" = Uuid, Path, description = "Supplier id")),
    responses(
        (status = 200, description = "Supplier detail", body = Supplier),
        (status = 404, description = "No such supplier in this organization")
    )
)]
pub async fn get_supplier(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Supplier>> {
    principal.require(Permission::SupplierRead)?;

    let supplier = db::suppliers::fetch(&state.pool, principal.organization_id, id)
        .await?
        .ok_or_else(not_found)?;
    principal.ensure_access(supplier.organization_id, "supplier")?;
    Ok(Json(supplier))
}

#[utoipa::path(
    post,
    path = "/suppliers",
    tag = "Suppliers",
    request_body = CreateSupplierRequest,
    responses(
        (status = 201, description = "Supplier created; risk analysis queued", body = Supplier),
        (status = 400, description = "Invalid payload"),
        (status = 403, description = "Missing supplier:create")
    )
)]
pub async fn create_supplier(
    State(state): State<AppState>,
    principal: Principal,
    client: ClientContext,
    Json(payload): Json<CreateSupplierRequest>,
) -> AppResult<(StatusCode, Json<Supplier>)> {
    principal.require(Permission::SupplierCreate)?;
    let new = payload.validate()?;

    let scope = state.audit_scope(&principal, &client);
    let created = audited::<Supplier, _, _, _>(scope, AuditAction::Create, None, || {
        db::suppliers::insert(&state.pool, principal.organization_id, &new)
    })
    .await?;
    let mut supplier = created.value;

    // Without a job nothing would ever settle the pending status.
    match state.queue.enqueue(RiskAnalysisJobData::from(&supplier)).await {
        Ok(job_id) => tracing::debug!(job_id = %job_id, supplier_id = %supplier.id, "risk analysis requested"),
        Err(err) => {
            tracing::error!(error = %err, supplier_id = %supplier.id, "could not queue risk analysis");
            if db::suppliers::mark_analysis_failed(&state.pool, principal.organization_id, supplier.id).await? {
                supplier.ai_analysis_status = AiAnalysisStatus::Error;
            }
        }
    }

    Ok((StatusCode::CREATED, Json(supplier)))
}

#[utoipa::path(
    put,
    path = "/suppliers/{id}",
    tag = "Suppliers",
    params(("id" = Uuid, Path, description = "Supplier id")),
    request_body = UpdateSupplierRequest,
    responses(
        (status = 200, description = "Supplier updated", body = Supplier),
        (status = 404, description = "No such supplier in this organization")
    )
)]
pub async fn update_supplier(
    State(state): State<AppState>,
    principal: Principal,
    client: ClientContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateSupplierRequest>,
) -> AppResult<Json<Supplier>> {
    principal.require(Permission::SupplierUpdate)?;
    let changes = payload.validate()?;

    if changes.is_empty() {
        return get_supplier(State(state), principal, Path(id)).await;
    }

    apply_changes(&state, &principal, &client, id, changes).await
}

#[utoipa::path(
    patch,
    path = "/suppliers/{id}/risk-level",
    tag = "Suppliers",
    params(("id" = Uuid, Path, description = "Supplier id")),
    request_body = UpdateRiskLevelRequest,
    responses(
        (status = 200, description = "Risk level updated", body = Supplier),
        (status = 404, description = "No such supplier in this organization")
    )
)]
pub async fn update_risk_level(
    State(state): State<AppState>,
    principal: Principal,
    client: ClientContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRiskLevelRequest>,
) -> AppResult<Json<Supplier>> {
    principal.require(Permission::SupplierUpdateRisk)?;

    let changes = SupplierChanges {
        risk_level: Some(payload.risk_level),
        ..SupplierChanges::default()
    };
    apply_changes(&state, &principal, &client, id, changes).await
}

#[utoipa::path(
    patch,
    path = "/suppliers/{id}/notes",
    tag = "Suppliers",
    params(("id" = Uuid, Path, description = "Supplier id")),
    request_body = UpdateNotesRequest,
    responses(
        (status = 200, description = "Notes updated", body = Supplier),
        (status = 400, description = "Notes rejected"),
        (status = 404, description = "No such supplier in this organization")
    )
)]
pub async fn update_notes(
    State(state): State<AppState>,
    principal: Principal,
    client: ClientContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateNotesRequest>,
) -> AppResult<Json<Supplier>> {
    principal.require(Permission::SupplierAddNotes)?;
    let changes = payload.validate()?;

    apply_changes(&state, &principal, &client, id, changes).await
}

async fn apply_changes(
    state: &AppState,
    principal: &Principal,
    client: &ClientContext,
    id: Uuid,
    changes: SupplierChanges,
) -> AppResult<Json<Supplier>> {
    let scope = state.audit_scope(principal, client);
    let updated = audited::<Supplier, _, _, _>(scope, AuditAction::Update, Some(id), || async {
        db::suppliers::update(&state.pool, principal.organization_id, id, &changes)
            .await?
            .ok_or_else(not_found)
    })
    .await?;
    principal.ensure_access(updated.value.organization_id, "supplier")?;

    Ok(Json(updated.value))
}

#[utoipa::path(
    delete,
    path = "/suppliers/{id}",
    tag = "Suppliers",
    params(("id" = Uuid, Path, description = "Supplier id")),
    responses(
        (status = 204, description = "Supplier deleted"),
        (status = 404, description = "No such supplier in this organization")
    )
)]
pub async fn delete_supplier(
    State(state): State<AppState>,
    principal: Principal,
    client: ClientContext,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    principal.require(Permission::SupplierDelete)?;

    let scope = state.audit_scope(&principal, &client);
    audited::<Supplier, _, _, _>(scope, AuditAction::Delete, Some(id), || async {
        if db::suppliers::delete(&state.pool, principal.organization_id, id).await? {
            Ok(())
        } else {
            Err(not_found())
        }
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/suppliers/{id}/audit-logs",
    tag = "Suppliers",
    params(("id" = Uuid, Path, description = "Supplier id"), AuditLogQuery),
    responses(
        (status = 200, description = "Audit trail of the supplier", body = crate::models::pagination::AuditLogPage),
        (status = 403, description = "Missing audit:read"),
        (status = 404, description = "No such supplier in this organization")
    )
)]
pub async fn supplier_audit_logs(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Query(query): Query<AuditLogQuery>,
) -> AppResult<Json<Paged<AuditLogEntry>>> {
    principal.require(Permission::AuditRead)?;
    let page = PageRequest::resolve(query.page, query.limit)?;

    let (data, total) = state
        .audit
        .list_for_entity(principal.organization_id, "supplier", id, &query, page)
        .await?;

    // A deleted supplier keeps its history; an unknown one is a 404.
    if total == 0
        && db::suppliers::fetch(&state.pool, principal.organization_id, id)
            .await?
            .is_none()
    {
        return Err(not_found());
    }

    Ok(Json(Paged {
        data,
        meta: page.meta(total),
    }))
}
