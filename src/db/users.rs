use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::USER_COLUMNS;
use crate::authz::Role;
use crate::errors::{AppError, AppResult};
use crate::models::pagination::PageRequest;
use crate::models::user::DbUser;
use crate::utils::utc_now;

pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub full_name: &'a str,
    pub role: Role,
    pub organization_id: Uuid,
}

pub async fn fetch_by_id(pool: &SqlitePool, id: Uuid) -> AppResult<Option<DbUser>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    Ok(sqlx::query_as::<_, DbUser>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?)
}

pub async fn fetch_in_org(pool: &SqlitePool, organization_id: Uuid, id: Uuid) -> AppResult<DbUser> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ? AND organization_id = ?");
    sqlx::query_as::<_, DbUser>(&sql)
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))
}

pub async fn fetch_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<DbUser>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
    Ok(sqlx::query_as::<_, DbUser>(&sql)
        .bind(email)
        .fetch_optional(pool)
        .await?)
}

pub async fn ensure_email_available(pool: &SqlitePool, email: &str) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ?")
        .bind(email)
        .fetch_one(pool)
        .await?;

    if count > 0 {
        return Err(AppError::conflict("email already in use"));
    }
    Ok(())
}

pub async fn insert(conn: &mut SqliteConnection, new: NewUser<'_>) -> AppResult<DbUser> {
    let sql = format!(
        "INSERT INTO users (id, email, password_hash, full_name, role, organization_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {USER_COLUMNS}"
    );

    sqlx::query_as::<_, DbUser>(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(new.email)
        .bind(new.password_hash)
        .bind(new.full_name)
        .bind(new.role.as_str())
        .bind(new.organization_id.to_string())
        .bind(utc_now())
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| {
            if err.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                AppError::conflict("email already in use")
            } else {
                AppError::from(err)
            }
        })
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, organization_id: Uuid, role: Option<Role>) {
    builder
        .push(" WHERE organization_id = ")
        .push_bind(organization_id.to_string());
    if let Some(role) = role {
        builder.push(" AND role = ").push_bind(role.as_str());
    }
}

pub async fn list(
    pool: &SqlitePool,
    organization_id: Uuid,
    role: Option<Role>,
    page: PageRequest,
) -> AppResult<(Vec<DbUser>, i64)> {
    let mut count: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(1) FROM users");
    push_filters(&mut count, organization_id, role);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users"));
    push_filters(&mut select, organization_id, role);
    select
        .push(" ORDER BY created_at DESC, id ASC LIMIT ")
        .push_bind(i64::from(page.limit))
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows = select.build_query_as::<DbUser>().fetch_all(pool).await?;
    Ok((rows, total))
}

/// `None` when the user is not in the organization.
pub async fn update(
    pool: &SqlitePool,
    organization_id: Uuid,
    id: Uuid,
    full_name: Option<&str>,
    role: Option<Role>,
) -> AppResult<Option<DbUser>> {
    let sql = format!(
        "UPDATE users SET full_name = COALESCE(?, full_name), role = COALESCE(?, role) \
         WHERE id = ? AND organization_id = ? RETURNING {USER_COLUMNS}"
    );

    Ok(sqlx::query_as::<_, DbUser>(&sql)
        .bind(full_name)
        .bind(role.map(|role| role.as_str()))
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(pool)
        .await?)
}

/// Audit rows reference users without a foreign key, so history survives.
pub async fn delete(pool: &SqlitePool, organization_id: Uuid, id: Uuid) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM users WHERE id = ? AND organization_id = ?")
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
