//! Authorization: the role/permission matrix and the tenant isolation gate.
//!
//! Both checks are pure. Routes call [`Principal::require`] before any business
//! logic (and before audit capture) and scope every entity query by the
//! principal's organization, so cross-tenant lookups surface as "not found".

mod permission;
mod principal;

pub use permission::{has_permission, has_permission_str, permissions_for, Permission, Role};
pub use principal::{can_access_resource, Principal};
