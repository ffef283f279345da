use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::parse_text;
use crate::errors::AppError;
use crate::models::pagination::SortOrder;
use crate::utils::parse_uuid;

text_enum!(AuditAction {
    Create => "CREATE",
    Update => "UPDATE",
    Delete => "DELETE",
});

/// One field that differs between the before and after snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FieldChange {
    pub field: String,
    #[schema(value_type = Object)]
    pub before: Value,
    #[schema(value_type = Object)]
    pub after: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub seq: i64,
    /// Null once the actor was deleted or the trail was anonymized.
    pub user_id: Option<Uuid>,
    pub user_email: Option<String>,
    pub user_full_name: Option<String>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Uuid,
    #[schema(value_type = Option<Object>)]
    pub before: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub after: Option<Value>,
    pub changes: Vec<FieldChange>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An audit row joined with its (possibly deleted) actor.
#[derive(Debug, Clone, FromRow)]
pub struct DbAuditLog {
    pub id: String,
    pub seq: i64,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub user_full_name: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before_state: Option<String>,
    pub after_state: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn parse_snapshot(raw: Option<&str>, column: &str) -> Result<Option<Value>, AppError> {
    raw.map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|err| AppError::internal(format!("corrupt audit {column}: {err}")))
}

impl TryFrom<DbAuditLog> for AuditLogEntry {
    type Error = AppError;

    fn try_from(value: DbAuditLog) -> Result<Self, Self::Error> {
        let before = parse_snapshot(value.before_state.as_deref(), "before")?;
        let after = parse_snapshot(value.after_state.as_deref(), "after")?;
        let changes = crate::audit::snapshot::diff_values(before.as_ref(), after.as_ref());

        Ok(AuditLogEntry {
            id: parse_uuid(&value.id, "audit log")?,
            seq: value.seq,
            user_id: value
                .user_id
                .as_deref()
                .map(|id| parse_uuid(id, "user"))
                .transpose()?,
            user_email: value.user_email,
            user_full_name: value.user_full_name,
            action: parse_text(&value.action, "audit action")?,
            entity_type: value.entity_type,
            entity_id: parse_uuid(&value.entity_id, "entity")?,
            before,
            after,
            changes,
            ip_address: value.ip_address,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditSortField {
    #[default]
    CreatedAt,
    Action,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub action: Option<AuditAction>,
    pub sort_by: Option<AuditSortField>,
    pub sort_order: Option<SortOrder>,
}
