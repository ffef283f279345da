use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::utils::parse_uuid;

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbOrganization {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbOrganization> for Organization {
    type Error = AppError;

    fn try_from(value: DbOrganization) -> Result<Self, Self::Error> {
        Ok(Organization {
            id: parse_uuid(&value.id, "organization")?,
            name: value.name,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationDeleted {
    pub organization_id: Uuid,
    pub users_deleted: i64,
    pub suppliers_deleted: i64,
    /// What happened to the organization's audit trail: retain, purge or anonymize.
    pub audit_logs: String,
    pub audit_logs_affected: u64,
}
