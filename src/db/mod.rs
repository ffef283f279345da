use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

pub mod organizations;
pub mod suppliers;
pub mod users;

pub const SUPPLIER_COLUMNS: &str = "id, name, domain, category, risk_level, status, contract_end_date, notes, \
	organization_id, ai_risk_score, ai_analysis, ai_analysis_status, created_at, updated_at";

pub const USER_COLUMNS: &str = "id, email, password_hash, full_name, role, organization_id, created_at";

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
	let options = SqliteConnectOptions::from_str(database_url)
		.context("invalid DATABASE_URL")?
		.create_if_missing(true)
		.journal_mode(SqliteJournalMode::Wal)
		.foreign_keys(true)
		.busy_timeout(Duration::from_secs(5));

	let pool = SqlitePoolOptions::new()
		.max_connections(10)
		.min_connections(1)
		.acquire_timeout(Duration::from_secs(10))
		.connect_with(options)
		.await
		.context("failed to connect to database")?;

	Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
	sqlx::migrate!()
		.run(pool)
		.await
		.context("failed to run migrations")
}

pub async fn init() -> anyhow::Result<SqlitePool> {
	let database_url = crate::config::database_url()?;
	let pool = connect(&database_url).await?;
	migrate(&pool).await?;
	tracing::info!("database ready");
	Ok(pool)
}
