use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations_on(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Applies the schema to an already-open pool. Idempotent.
pub async fn run_migrations_on(pool: &sqlx::SqlitePool) -> Result<()> {
    // Registered leak datasets
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS managed_databases (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            file_path TEXT NOT NULL,
            history TEXT,
            active INTEGER NOT NULL DEFAULT 0,
            is_encrypted INTEGER NOT NULL DEFAULT 0,
            encryption_started INTEGER NOT NULL DEFAULT 0,
            job_id TEXT,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Encrypted cell index. The unique quadruple makes re-ingestion runs
    // harmless: an overlapping re-run cannot insert duplicates.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data (
            id INTEGER PRIMARY KEY,
            database_id INTEGER NOT NULL,
            user_index INTEGER NOT NULL,
            column_name TEXT NOT NULL,
            value TEXT NOT NULL,
            UNIQUE(database_id, user_index, column_name, value),
            FOREIGN KEY (database_id) REFERENCES managed_databases(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Background ingestion jobs, polled by the progress endpoint
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_jobs (
            id TEXT PRIMARY KEY,
            database_id INTEGER NOT NULL,
            state TEXT NOT NULL,
            current INTEGER NOT NULL DEFAULT 0,
            total INTEGER NOT NULL DEFAULT 0,
            percent INTEGER NOT NULL DEFAULT 0,
            description TEXT NOT NULL DEFAULT '',
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Audit log of executed searches
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS query_history (
            id INTEGER PRIMARY KEY,
            user TEXT NOT NULL,
            query TEXT NOT NULL,
            result_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_data_value ON data(value)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_data_database_row ON data(database_id, user_index)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_user ON query_history(user, created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
