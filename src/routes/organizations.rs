use axum::extract::State;
use axum::Json;

use crate::app::AppState;
use crate::audit::apply_org_deletion;
use crate::authz::{Permission, Principal};
use crate::db;
use crate::errors::AppResult;
use crate::models::organization::OrganizationDeleted;

#[utoipa::path(
    delete,
    path = "/organizations/current",
    tag = "Organizations",
    responses(
        (status = 200, description = "Organization deleted with its users and suppliers", body = OrganizationDeleted),
        (status = 403, description = "Missing org:delete")
    )
)]
pub async fn delete_current_organization(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<OrganizationDeleted>> {
    principal.require(Permission::OrgDelete)?;
    let organization_id = principal.organization_id;
    let policy = state.audit_config.on_org_delete;

    let mut tx = state.pool.begin().await?;
    let (users_deleted, suppliers_deleted) = db::organizations::dependents(&mut tx, organization_id).await?;
    let audit_logs_affected = apply_org_deletion(&mut tx, organization_id, policy).await?;
    db::organizations::delete(&mut tx, organization_id).await?;
    tx.commit().await?;

    tracing::warn!(
        organization_id = %organization_id,
        deleted_by = %principal.user_id,
        users_deleted,
        suppliers_deleted,
        audit_policy = %policy,
        audit_logs_affected,
        "organization deleted"
    );

    Ok(Json(OrganizationDeleted {
        organization_id,
        users_deleted,
        suppliers_deleted,
        audit_logs: policy.to_string(),
        audit_logs_affected,
    }))
}
