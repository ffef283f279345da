use std::future::Future;

use serde::Serialize;
use uuid::Uuid;

use super::context::ClientContext;
use super::logger::{AuditLogger, NewAuditEntry};
use super::snapshot::{AuditSubject, AuditedEntity};
use crate::authz::Principal;
use crate::errors::AppResult;
use crate::models::audit_log::AuditAction;

/// Who is acting and from where.
#[derive(Clone, Copy)]
pub struct AuditScope<'a> {
    pub logger: &'a AuditLogger,
    pub principal: &'a Principal,
    pub client: &'a ClientContext,
}

/// The operation's result together with what was captured around it.
#[derive(Debug)]
pub struct Audited<T, S> {
    pub value: T,
    pub before: Option<S>,
    pub after: Option<S>,
    /// `None` when the entry could not be written or the entity id was unknown.
    pub log_id: Option<Uuid>,
}

/// Run `operation` under audit.
///
/// The before-state is captured first (for updates and deletes, from
/// `entity_id`); a capture failure aborts before the operation runs. A failed
/// operation writes nothing. After success the after-state is captured and one
/// entry is appended, unless an update left the snapshot unchanged. Failures
/// from here on are logged and the mutation stands.
pub async fn audited<E, T, F, Fut>(
    scope: AuditScope<'_>,
    action: AuditAction,
    entity_id: Option<Uuid>,
    operation: F,
) -> AppResult<Audited<T, E::Snapshot>>
where
    E: AuditedEntity,
    T: AuditSubject,
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let pool = scope.logger.pool();
    let organization_id = scope.principal.organization_id;

    let before = match (action, entity_id) {
        (AuditAction::Create, _) | (_, None) => None,
        (_, Some(id)) => E::capture(pool, organization_id, id).await?,
    };

    let value = operation().await?;

    let mut outcome = Audited {
        value,
        before,
        after: None,
        log_id: None,
    };

    let resolved_id = match action {
        AuditAction::Create => outcome.value.audited_id(),
        AuditAction::Update | AuditAction::Delete => entity_id,
    };
    let Some(resolved_id) = resolved_id else {
        tracing::warn!(
            entity_type = E::entity_type(),
            action = %action,
            "audit skipped: entity id could not be resolved"
        );
        return Ok(outcome);
    };

    if action != AuditAction::Delete {
        match E::capture(pool, organization_id, resolved_id).await {
            Ok(after) => outcome.after = after,
            Err(err) => {
                tracing::error!(
                    error = %err,
                    entity_type = E::entity_type(),
                    entity_id = %resolved_id,
                    "audit after-state capture failed; mutation kept without audit entry"
                );
                return Ok(outcome);
            }
        }
    }

    let entry = match build_entry::<E, T>(&scope, action, resolved_id, &outcome) {
        Ok(entry) => entry,
        Err(err) => {
            tracing::error!(error = %err, entity_id = %resolved_id, "audit snapshot serialization failed");
            return Ok(outcome);
        }
    };

    if action == AuditAction::Update && entry.before == entry.after {
        tracing::debug!(
            entity_type = E::entity_type(),
            entity_id = %resolved_id,
            "update left the entity unchanged; no audit entry"
        );
        return Ok(outcome);
    }

    match scope.logger.record(entry).await {
        Ok(log_id) => outcome.log_id = Some(log_id),
        Err(err) => {
            tracing::error!(
                error = %err,
                entity_type = E::entity_type(),
                entity_id = %resolved_id,
                action = %action,
                "audit write failed; mutation kept without audit entry"
            );
        }
    }

    Ok(outcome)
}

fn build_entry<E: AuditedEntity, T>(
    scope: &AuditScope<'_>,
    action: AuditAction,
    entity_id: Uuid,
    outcome: &Audited<T, E::Snapshot>,
) -> AppResult<NewAuditEntry> {
    Ok(NewAuditEntry {
        organization_id: scope.principal.organization_id,
        user_id: Some(scope.principal.user_id),
        action,
        entity_type: E::entity_type(),
        entity_id,
        before: to_json(outcome.before.as_ref())?,
        after: to_json(outcome.after.as_ref())?,
        ip_address: scope.client.ip.clone(),
    })
}

fn to_json<S: Serialize>(snapshot: Option<&S>) -> AppResult<Option<serde_json::Value>> {
    Ok(snapshot.map(serde_json::to_value).transpose()?)
}
