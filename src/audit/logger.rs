use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::env_or;
use crate::errors::{AppError, AppResult};
use crate::models::audit_log::{AuditAction, AuditLogEntry, AuditLogQuery, AuditSortField, DbAuditLog};
use crate::models::pagination::PageRequest;
use crate::utils::utc_now;

/// One audit record to append. `before`/`after` must match the action:
/// create has no before, delete has no after, update has both.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: AuditAction,
    pub entity_type: &'static str,
    pub entity_id: Uuid,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub ip_address: Option<String>,
}

impl NewAuditEntry {
    fn check_shape(&self) -> AppResult<()> {
        let ok = match self.action {
            AuditAction::Create => self.before.is_none() && self.after.is_some(),
            AuditAction::Update => self.before.is_some() && self.after.is_some(),
            AuditAction::Delete => self.before.is_some() && self.after.is_none(),
        };

        if ok {
            Ok(())
        } else {
            Err(AppError::internal(format!(
                "{} audit entry for {} {} has the wrong before/after shape",
                self.action, self.entity_type, self.entity_id
            )))
        }
    }
}

/// Result of walking one organization's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChainReport {
    pub organization_id: Uuid,
    pub checked: u64,
    /// Sequence number of the first row whose link or digest does not verify.
    pub broken_at: Option<i64>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.broken_at.is_none()
    }
}

#[derive(Debug, FromRow)]
struct ChainRow {
    id: String,
    seq: i64,
    action: String,
    entity_type: String,
    entity_id: String,
    before_state: Option<String>,
    after_state: Option<String>,
    created_at: DateTime<Utc>,
    prev_hash: Option<String>,
    hash: String,
}

/// Content covered by the digest. Actor and IP stay outside so that
/// anonymization does not break verification.
struct ChainContent<'a> {
    id: &'a str,
    organization_id: &'a str,
    seq: i64,
    action: &'a str,
    entity_type: &'a str,
    entity_id: &'a str,
    before: Option<&'a str>,
    after: Option<&'a str>,
    created_at: DateTime<Utc>,
}

fn chain_hash(prev_hash: Option<&str>, content: &ChainContent<'_>) -> String {
    let mut hasher = Sha256::new();
    // Length-prefix every part so field boundaries are unambiguous.
    let mut part = |bytes: &[u8]| {
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(bytes);
    };

    part(prev_hash.unwrap_or_default().as_bytes());
    part(content.id.as_bytes());
    part(content.organization_id.as_bytes());
    part(&content.seq.to_be_bytes());
    part(content.action.as_bytes());
    part(content.entity_type.as_bytes());
    part(content.entity_id.as_bytes());
    part(content.before.unwrap_or("null").as_bytes());
    part(content.after.unwrap_or("null").as_bytes());
    part(&content.created_at.timestamp_micros().to_be_bytes());

    hex::encode(hasher.finalize())
}

/// Writer and reader for `audit_logs`. Cloning shares the chain lock.
#[derive(Clone)]
pub struct AuditLogger {
    pool: SqlitePool,
    chain_lock: Arc<Mutex<()>>,
}

impl AuditLogger {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            chain_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Append one entry to its organization's chain and return its id.
    pub async fn record(&self, entry: NewAuditEntry) -> AppResult<Uuid> {
        entry.check_shape()?;

        let before = entry.before.as_ref().map(serde_json::to_string).transpose()?;
        let after = entry.after.as_ref().map(serde_json::to_string).transpose()?;
        let organization_id = entry.organization_id.to_string();
        let entity_id = entry.entity_id.to_string();

        let _guard = self.chain_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let tail: Option<(i64, String)> = sqlx::query_as(
            "SELECT seq, hash FROM audit_logs WHERE organization_id = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(&organization_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (seq, prev_hash) = match tail {
            Some((seq, hash)) => (seq + 1, Some(hash)),
            None => (1, None),
        };

        let id = Uuid::new_v4();
        let id_text = id.to_string();
        let created_at = utc_now();
        let hash = chain_hash(
            prev_hash.as_deref(),
            &ChainContent {
                id: &id_text,
                organization_id: &organization_id,
                seq,
                action: entry.action.as_str(),
                entity_type: entry.entity_type,
                entity_id: &entity_id,
                before: before.as_deref(),
                after: after.as_deref(),
                created_at,
            },
        );

        sqlx::query(
            "INSERT INTO audit_logs (id, organization_id, seq, user_id, action, entity_type, entity_id, \
             before_state, after_state, ip_address, created_at, prev_hash, hash) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id_text)
        .bind(&organization_id)
        .bind(seq)
        .bind(entry.user_id.map(|user| user.to_string()))
        .bind(entry.action.as_str())
        .bind(entry.entity_type)
        .bind(&entity_id)
        .bind(&before)
        .bind(&after)
        .bind(&entry.ip_address)
        .bind(created_at)
        .bind(&prev_hash)
        .bind(&hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            audit_id = %id,
            organization_id = %entry.organization_id,
            seq,
            action = %entry.action,
            entity_id = %entry.entity_id,
            "audit entry recorded"
        );
        Ok(id)
    }

    /// Entries for one entity within the organization, with actor details when
    /// the actor still exists.
    pub async fn list_for_entity(
        &self,
        organization_id: Uuid,
        entity_type: &str,
        entity_id: Uuid,
        query: &AuditLogQuery,
        page: PageRequest,
    ) -> AppResult<(Vec<AuditLogEntry>, i64)> {
        let push_filters = |builder: &mut QueryBuilder<'static, Sqlite>| {
            builder
                .push(" WHERE a.organization_id = ")
                .push_bind(organization_id.to_string())
                .push(" AND a.entity_type = ")
                .push_bind(entity_type.to_string())
                .push(" AND a.entity_id = ")
                .push_bind(entity_id.to_string());
            if let Some(action) = query.action {
                builder.push(" AND a.action = ").push_bind(action.as_str());
            }
        };

        let mut count: QueryBuilder<'static, Sqlite> = QueryBuilder::new("SELECT COUNT(1) FROM audit_logs a");
        push_filters(&mut count);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select: QueryBuilder<'static, Sqlite> = QueryBuilder::new(
            "SELECT a.id, a.seq, a.user_id, u.email AS user_email, u.full_name AS user_full_name, \
             a.action, a.entity_type, a.entity_id, a.before_state, a.after_state, a.ip_address, a.created_at \
             FROM audit_logs a LEFT JOIN users u ON u.id = a.user_id",
        );
        push_filters(&mut select);

        let order = query.sort_order.unwrap_or_default().as_sql();
        let column = match query.sort_by.unwrap_or_default() {
            AuditSortField::CreatedAt => "a.created_at",
            AuditSortField::Action => "a.action",
        };
        select
            .push(format!(" ORDER BY {column} {order}, a.seq {order} LIMIT "))
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = select.build_query_as::<DbAuditLog>().fetch_all(&self.pool).await?;
        let entries = rows
            .into_iter()
            .map(AuditLogEntry::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok((entries, total))
    }

    /// Walk the organization's chain in sequence order, recomputing each digest.
    pub async fn verify_chain(&self, organization_id: Uuid) -> AppResult<ChainReport> {
        let organization = organization_id.to_string();
        let rows = sqlx::query_as::<_, ChainRow>(
            "SELECT id, seq, action, entity_type, entity_id, before_state, after_state, created_at, prev_hash, hash \
             FROM audit_logs WHERE organization_id = ? ORDER BY seq ASC",
        )
        .bind(&organization)
        .fetch_all(&self.pool)
        .await?;

        let mut report = ChainReport {
            organization_id,
            checked: 0,
            broken_at: None,
        };
        let mut expected_prev: Option<String> = None;
        let mut expected_seq = 1;

        for row in rows {
            let recomputed = chain_hash(
                row.prev_hash.as_deref(),
                &ChainContent {
                    id: &row.id,
                    organization_id: &organization,
                    seq: row.seq,
                    action: &row.action,
                    entity_type: &row.entity_type,
                    entity_id: &row.entity_id,
                    before: row.before_state.as_deref(),
                    after: row.after_state.as_deref(),
                    created_at: row.created_at,
                },
            );

            if row.seq != expected_seq || row.prev_hash != expected_prev || recomputed != row.hash {
                tracing::warn!(organization_id = %organization_id, seq = row.seq, "audit chain broken");
                report.broken_at = Some(row.seq);
                break;
            }

            report.checked += 1;
            expected_seq += 1;
            expected_prev = Some(row.hash);
        }

        Ok(report)
    }

    /// Every organization that has audit rows, including deleted tenants whose
    /// trail was retained.
    pub async fn organizations(&self) -> AppResult<Vec<Uuid>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT DISTINCT organization_id FROM audit_logs ORDER BY organization_id")
            .fetch_all(&self.pool)
            .await?;

        ids.iter()
            .map(|id| crate::utils::parse_uuid(id, "organization"))
            .collect()
    }
}

/// What happens to an organization's audit rows when the organization is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrgAuditPolicy {
    /// Keep the rows untouched.
    #[default]
    Retain,
    /// Delete the rows.
    Purge,
    /// Keep the rows but drop actor and IP.
    Anonymize,
}

impl OrgAuditPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgAuditPolicy::Retain => "retain",
            OrgAuditPolicy::Purge => "purge",
            OrgAuditPolicy::Anonymize => "anonymize",
        }
    }
}

impl fmt::Display for OrgAuditPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgAuditPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "retain" => Ok(OrgAuditPolicy::Retain),
            "purge" => Ok(OrgAuditPolicy::Purge),
            "anonymize" => Ok(OrgAuditPolicy::Anonymize),
            other => Err(format!("unknown audit policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuditConfig {
    pub on_org_delete: OrgAuditPolicy,
}

impl AuditConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            on_org_delete: env_or("AUDIT_ON_ORG_DELETE", OrgAuditPolicy::Retain)?,
        })
    }
}

/// Apply `policy` to the organization's audit rows on the caller's
/// connection, so it commits or rolls back with the organization delete.
/// Returns the number of rows affected.
pub async fn apply_org_deletion(
    conn: &mut SqliteConnection,
    organization_id: Uuid,
    policy: OrgAuditPolicy,
) -> AppResult<u64> {
    let sql = match policy {
        OrgAuditPolicy::Retain => return Ok(0),
        OrgAuditPolicy::Purge => "DELETE FROM audit_logs WHERE organization_id = ?",
        OrgAuditPolicy::Anonymize => {
            "UPDATE audit_logs SET user_id = NULL, ip_address = NULL WHERE organization_id = ?"
        }
    };

    let result = sqlx::query(sql)
        .bind(organization_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}
