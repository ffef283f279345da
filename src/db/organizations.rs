use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::organization::{DbOrganization, Organization};
use crate::utils::utc_now;

pub async fn insert(conn: &mut SqliteConnection, name: &str) -> AppResult<Organization> {
    let row = sqlx::query_as::<_, DbOrganization>(
        "INSERT INTO organizations (id, name, created_at) VALUES (?, ?, ?) RETURNING id, name, created_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(utc_now())
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

/// Row counts that an organization delete will cascade to.
pub async fn dependents(conn: &mut SqliteConnection, id: Uuid) -> AppResult<(i64, i64)> {
    let counts: (i64, i64) = sqlx::query_as(
        "SELECT (SELECT COUNT(1) FROM users WHERE organization_id = ?1), \
                (SELECT COUNT(1) FROM suppliers WHERE organization_id = ?1)",
    )
    .bind(id.to_string())
    .fetch_one(&mut *conn)
    .await?;

    Ok(counts)
}

/// Users and suppliers go with it through `ON DELETE CASCADE`.
pub async fn delete(conn: &mut SqliteConnection, id: Uuid) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM organizations WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("organization not found"));
    }
    Ok(())
}
