//! Supplier queries. Every human-facing read and write is scoped by
//! `(id, organization_id)`; the worker-side writes touch only the `ai_*`
//! columns and report whether the supplier still exists.

use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::SUPPLIER_COLUMNS;
use crate::errors::AppResult;
use crate::models::pagination::{like_pattern, PageRequest};
use crate::models::supplier::{
    AiAnalysisStatus, DbSupplier, NewSupplier, Supplier, SupplierChanges, SupplierListQuery,
};
use crate::utils::utc_now;

pub async fn fetch(pool: &SqlitePool, organization_id: Uuid, id: Uuid) -> AppResult<Option<Supplier>> {
    let sql = format!("SELECT {SUPPLIER_COLUMNS} FROM suppliers WHERE id = ? AND organization_id = ?");
    let row = sqlx::query_as::<_, DbSupplier>(&sql)
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(Supplier::try_from).transpose()
}

pub async fn insert(pool: &SqlitePool, organization_id: Uuid, new: &NewSupplier) -> AppResult<Supplier> {
    let now = utc_now();
    let sql = format!(
        "INSERT INTO suppliers (id, name, domain, category, risk_level, status, contract_end_date, notes, \
         organization_id, ai_analysis_status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {SUPPLIER_COLUMNS}"
    );

    let row = sqlx::query_as::<_, DbSupplier>(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(&new.name)
        .bind(&new.domain)
        .bind(new.category.as_str())
        .bind(new.risk_level.as_str())
        .bind(new.status.as_str())
        .bind(new.contract_end_date)
        .bind(&new.notes)
        .bind(organization_id.to_string())
        .bind(AiAnalysisStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await?;

    row.try_into()
}

/// Apply `changes` to the human-edited columns. `None` when the supplier is
/// not in the organization.
pub async fn update(
    pool: &SqlitePool,
    organization_id: Uuid,
    id: Uuid,
    changes: &SupplierChanges,
) -> AppResult<Option<Supplier>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE suppliers SET updated_at = ");
    builder.push_bind(utc_now());

    if let Some(name) = &changes.name {
        builder.push(", name = ").push_bind(name.clone());
    }
    if let Some(domain) = &changes.domain {
        builder.push(", domain = ").push_bind(domain.clone());
    }
    if let Some(category) = changes.category {
        builder.push(", category = ").push_bind(category.as_str());
    }
    if let Some(risk_level) = changes.risk_level {
        builder.push(", risk_level = ").push_bind(risk_level.as_str());
    }
    if let Some(status) = changes.status {
        builder.push(", status = ").push_bind(status.as_str());
    }
    if let Some(contract_end_date) = changes.contract_end_date {
        builder.push(", contract_end_date = ").push_bind(contract_end_date);
    }
    if let Some(notes) = &changes.notes {
        builder.push(", notes = ").push_bind(notes.clone());
    }

    builder
        .push(" WHERE id = ")
        .push_bind(id.to_string())
        .push(" AND organization_id = ")
        .push_bind(organization_id.to_string())
        .push(format!(" RETURNING {SUPPLIER_COLUMNS}"));

    let row = builder
        .build_query_as::<DbSupplier>()
        .fetch_optional(pool)
        .await?;

    row.map(Supplier::try_from).transpose()
}

pub async fn delete(pool: &SqlitePool, organization_id: Uuid, id: Uuid) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM suppliers WHERE id = ? AND organization_id = ?")
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, organization_id: Uuid, query: &SupplierListQuery) {
    builder
        .push(" WHERE organization_id = ")
        .push_bind(organization_id.to_string());

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = like_pattern(search);
        builder
            .push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR domain LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
    if let Some(category) = query.category {
        builder.push(" AND category = ").push_bind(category.as_str());
    }
    if let Some(risk_level) = query.risk_level {
        builder.push(" AND risk_level = ").push_bind(risk_level.as_str());
    }
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
}

pub async fn list(
    pool: &SqlitePool,
    organization_id: Uuid,
    query: &SupplierListQuery,
    page: PageRequest,
) -> AppResult<(Vec<Supplier>, i64)> {
    let mut count: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(1) FROM suppliers");
    push_filters(&mut count, organization_id, query);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {SUPPLIER_COLUMNS} FROM suppliers"));
    push_filters(&mut select, organization_id, query);

    let column = query.sort_by.unwrap_or_default().column();
    let order = query.sort_order.unwrap_or_default().as_sql();
    select
        .push(format!(" ORDER BY {column} {order}, id ASC LIMIT "))
        .push_bind(i64::from(page.limit))
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows = select.build_query_as::<DbSupplier>().fetch_all(pool).await?;
    let suppliers = rows
        .into_iter()
        .map(Supplier::try_from)
        .collect::<AppResult<Vec<_>>>()?;

    Ok((suppliers, total))
}

pub async fn mark_analysis_pending(pool: &SqlitePool, organization_id: Uuid, id: Uuid) -> AppResult<bool> {
    set_analysis_status(pool, organization_id, id, AiAnalysisStatus::Pending).await
}

pub async fn mark_analysis_failed(pool: &SqlitePool, organization_id: Uuid, id: Uuid) -> AppResult<bool> {
    set_analysis_status(pool, organization_id, id, AiAnalysisStatus::Error).await
}

async fn set_analysis_status(
    pool: &SqlitePool,
    organization_id: Uuid,
    id: Uuid,
    status: AiAnalysisStatus,
) -> AppResult<bool> {
    let result = sqlx::query("UPDATE suppliers SET ai_analysis_status = ? WHERE id = ? AND organization_id = ?")
        .bind(status.as_str())
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Persist score, payload and the Complete status in one statement.
pub async fn record_analysis(
    pool: &SqlitePool,
    organization_id: Uuid,
    id: Uuid,
    risk_score: f64,
    analysis_json: &str,
) -> AppResult<bool> {
    let result = sqlx::query(
        "UPDATE suppliers SET ai_risk_score = ?, ai_analysis = ?, ai_analysis_status = ? \
         WHERE id = ? AND organization_id = ?",
    )
    .bind(risk_score)
    .bind(analysis_json)
    .bind(AiAnalysisStatus::Complete.as_str())
    .bind(id.to_string())
    .bind(organization_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
