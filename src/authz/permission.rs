use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Organization-level role. Every user holds exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Analyst,
    Auditor,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Owner, Role::Admin, Role::Analyst, Role::Auditor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Analyst => "analyst",
            Role::Auditor => "auditor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| format!("unknown role: {value}"))
    }
}

/// The closed permission set. Wire names are matched exactly; nothing is
/// pattern-matched, so `supplier:*` or injected suffixes never resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Permission {
    #[serde(rename = "supplier:create")]
    SupplierCreate,
    #[serde(rename = "supplier:read")]
    SupplierRead,
    #[serde(rename = "supplier:update")]
    SupplierUpdate,
    #[serde(rename = "supplier:delete")]
    SupplierDelete,
    #[serde(rename = "supplier:update_risk")]
    SupplierUpdateRisk,
    #[serde(rename = "supplier:add_notes")]
    SupplierAddNotes,
    #[serde(rename = "audit:read")]
    AuditRead,
    #[serde(rename = "user:manage")]
    UserManage,
    #[serde(rename = "org:delete")]
    OrgDelete,
}

impl Permission {
    pub const ALL: [Permission; 9] = [
        Permission::SupplierCreate,
        Permission::SupplierRead,
        Permission::SupplierUpdate,
        Permission::SupplierDelete,
        Permission::SupplierUpdateRisk,
        Permission::SupplierAddNotes,
        Permission::AuditRead,
        Permission::UserManage,
        Permission::OrgDelete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::SupplierCreate => "supplier:create",
            Permission::SupplierRead => "supplier:read",
            Permission::SupplierUpdate => "supplier:update",
            Permission::SupplierDelete => "supplier:delete",
            Permission::SupplierUpdateRisk => "supplier:update_risk",
            Permission::SupplierAddNotes => "supplier:add_notes",
            Permission::AuditRead => "audit:read",
            Permission::UserManage => "user:manage",
            Permission::OrgDelete => "org:delete",
        }
    }

    /// Exact, case-sensitive lookup of a wire name.
    pub fn parse(value: &str) -> Option<Permission> {
        Permission::ALL.into_iter().find(|permission| permission.as_str() == value)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The role/permission matrix.
///
/// Every (role, permission) pair is spelled out so that adding a role or a
/// permission fails to compile until the new row or column is decided.
/// Admin's full update right subsumes the risk-level and notes rights.
pub fn has_permission(role: Role, permission: Permission) -> bool {
    use Permission::*;

    match (role, permission) {
        (
            Role::Owner,
            SupplierCreate | SupplierRead | SupplierUpdate | SupplierDelete | SupplierUpdateRisk
            | SupplierAddNotes | AuditRead | UserManage | OrgDelete,
        ) => true,

        (
            Role::Admin,
            SupplierCreate | SupplierRead | SupplierUpdate | SupplierDelete | SupplierUpdateRisk
            | SupplierAddNotes | AuditRead,
        ) => true,
        (Role::Admin, UserManage | OrgDelete) => false,

        (Role::Analyst, SupplierRead | SupplierUpdateRisk | SupplierAddNotes) => true,
        (
            Role::Analyst,
            SupplierCreate | SupplierUpdate | SupplierDelete | AuditRead | UserManage | OrgDelete,
        ) => false,

        (Role::Auditor, SupplierRead | AuditRead) => true,
        (
            Role::Auditor,
            SupplierCreate | SupplierUpdate | SupplierDelete | SupplierUpdateRisk | SupplierAddNotes
            | UserManage | OrgDelete,
        ) => false,
    }
}

/// String-level entry point for callers holding raw role/permission names.
/// Unknown roles and anything outside the closed permission set are denied.
pub fn has_permission_str(role: &str, permission: &str) -> bool {
    match (role.parse::<Role>(), Permission::parse(permission)) {
        (Ok(role), Some(permission)) => has_permission(role, permission),
        _ => false,
    }
}

pub fn permissions_for(role: Role) -> Vec<Permission> {
    Permission::ALL
        .into_iter()
        .filter(|permission| has_permission(role, *permission))
        .collect()
}
