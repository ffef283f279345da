use uuid::Uuid;

use super::permission::{has_permission, Permission, Role};
use crate::errors::{AppError, AppResult};

/// The authenticated caller: who they are, which tenant they act in, and their role.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: Uuid, organization_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            organization_id,
            role,
        }
    }

    pub fn can(&self, permission: Permission) -> bool {
        has_permission(self.role, permission)
    }

    /// Reject with 403 unless the role grants `permission`.
    pub fn require(&self, permission: Permission) -> AppResult<()> {
        if self.can(permission) {
            return Ok(());
        }

        tracing::debug!(
            user_id = %self.user_id,
            role = %self.role,
            permission = %permission,
            "permission denied"
        );
        Err(AppError::forbidden(format!(
            "you do not have the permission '{permission}' to perform this action"
        )))
    }

    pub fn can_access(&self, resource_organization_id: Uuid) -> bool {
        can_access_resource(
            &self.organization_id.to_string(),
            &resource_organization_id.to_string(),
        )
    }

    /// Tenant gate for an already-loaded resource. A mismatch is reported as
    /// not found so that callers cannot learn whether another tenant's record exists.
    pub fn ensure_access(&self, resource_organization_id: Uuid, what: &str) -> AppResult<()> {
        if self.can_access(resource_organization_id) {
            Ok(())
        } else {
            Err(AppError::not_found(format!("{what} not found")))
        }
    }
}

/// True iff both organization ids are non-empty and byte-for-byte equal.
/// No trimming and no case folding.
pub fn can_access_resource(user_organization_id: &str, resource_organization_id: &str) -> bool {
    !user_organization_id.is_empty()
        && !resource_organization_id.is_empty()
        && user_organization_id == resource_organization_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_organization_is_allowed() {
        assert!(can_access_resource("org-1", "org-1"));
    }

    #[test]
    fn different_or_empty_organizations_are_rejected() {
        assert!(!can_access_resource("org-1", "org-2"));
        assert!(!can_access_resource("", "org-1"));
        assert!(!can_access_resource("org-1", ""));
        assert!(!can_access_resource("", ""));
    }

    #[test]
    fn comparison_is_case_and_whitespace_sensitive() {
        assert!(!can_access_resource("Org-1", "org-1"));
        assert!(!can_access_resource("org-1 ", "org-1"));
        assert!(!can_access_resource(" org-1", "org-1"));
    }

    #[test]
    fn principal_gate_maps_mismatch_to_not_found() {
        let principal = Principal::new(Uuid::new_v4(), Uuid::new_v4(), Role::Owner);
        assert!(principal.ensure_access(principal.organization_id, "supplier").is_ok());

        let err = principal.ensure_access(Uuid::new_v4(), "supplier").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn require_maps_denial_to_forbidden() {
        let principal = Principal::new(Uuid::new_v4(), Uuid::new_v4(), Role::Auditor);
        assert!(principal.require(Permission::AuditRead).is_ok());
        assert!(matches!(
            principal.require(Permission::SupplierDelete),
            Err(AppError::Forbidden(_))
        ));
    }
}
