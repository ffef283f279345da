use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::authz::Role;
use crate::errors::AppError;
use crate::utils::{parse_uuid, required_text};

const EMAIL_MAX_CHARS: usize = 255;
const FULL_NAME_MAX_CHARS: usize = 255;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub organization_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbUser {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: String,
    pub organization_id: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbUser> for User {
    type Error = AppError;

    fn try_from(value: DbUser) -> Result<Self, Self::Error> {
        Ok(User {
            id: parse_uuid(&value.id, "user")?,
            email: value.email,
            full_name: value.full_name,
            role: value
                .role
                .parse()
                .map_err(|err| AppError::internal(format!("corrupt user role: {err}")))?,
            organization_id: parse_uuid(&value.organization_id, "organization")?,
            created_at: value.created_at,
        })
    }
}

/// Lower-cased, trimmed email with a minimal shape check.
pub fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = required_text(email, "email", EMAIL_MAX_CHARS)?.to_lowercase();
    let valid = email
        .split_once('@')
        .map(|(local, host)| !local.is_empty() && host.contains('.') && !host.starts_with('.'))
        .unwrap_or(false);

    if !valid || email.chars().any(char::is_whitespace) {
        return Err(AppError::bad_request("email is not valid"));
    }
    Ok(email)
}

pub fn normalize_full_name(full_name: &str) -> Result<String, AppError> {
    required_text(full_name, "fullName", FULL_NAME_MAX_CHARS)
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[schema(example = "Acme Holdings")]
    pub organization_name: String,
    #[schema(example = "Ada Lovelace")]
    pub full_name: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub user: User,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub role: Option<Role>,
}

impl UpdateUserRequest {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.role.is_none()
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct UserListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub role: Option<Role>,
}
