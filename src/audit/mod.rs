//! Append-only audit trail for supplier mutations.
//!
//! [`audited`] wraps a mutation: it snapshots the entity before, runs the
//! operation, snapshots it after and hands one entry to the [`AuditLogger`].
//! Rows are hash-chained per organization so tampering is detectable.

mod context;
mod interceptor;
mod logger;
pub mod snapshot;

pub use context::ClientContext;
pub use interceptor::{audited, AuditScope, Audited};
pub use logger::{
    apply_org_deletion, AuditConfig, AuditLogger, ChainReport, NewAuditEntry, OrgAuditPolicy,
};
pub use snapshot::{AuditSubject, AuditedEntity, SupplierSnapshot};
