//! Dataset registry.
//!
//! Registration copies the source file into the storage directory and
//! inserts the `managed_databases` row; ingestion is scheduled by the
//! caller as a separate, explicit step after that write has committed.
//! Deleting a dataset removes the stored file and cascades to its index
//! rows.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use std::path::Path;

use crate::config::Config;
use crate::models::ManagedDatabase;

/// Default note attached to a dataset nobody has written up yet.
pub const DEFAULT_HISTORY: &str = "No history is known for this database";

pub const HISTORY_MAX_LEN: usize = 500;

pub async fn register(
    pool: &SqlitePool,
    config: &Config,
    name: &str,
    source: &Path,
    history: Option<&str>,
    activate: bool,
) -> Result<ManagedDatabase> {
    if name.trim().is_empty() {
        bail!("dataset name must not be empty");
    }
    // The name doubles as the stored file name.
    if name.contains('/') || name.contains('\\') {
        bail!("dataset name must not contain path separators");
    }
    if let Some(note) = history {
        if note.chars().count() > HISTORY_MAX_LEN {
            bail!("history note must be at most {} characters", HISTORY_MAX_LEN);
        }
    }
    if !source.exists() {
        bail!("source file does not exist: {}", source.display());
    }
    if get_by_name(pool, name).await?.is_some() {
        bail!("a dataset named '{}' is already registered", name);
    }

    // Reject unsupported formats before copying anything.
    let extension = source
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    crate::format::handler_for(source)?;

    std::fs::create_dir_all(&config.storage.dir)?;
    let stored_path = config.storage.dir.join(format!("{}.{}", name, extension));
    std::fs::copy(source, &stored_path)
        .with_context(|| format!("failed to copy {} into storage", source.display()))?;

    let now = chrono::Utc::now().timestamp();
    let history = history.unwrap_or(DEFAULT_HISTORY);
    sqlx::query(
        r#"
        INSERT INTO managed_databases (name, file_path, history, active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(name)
    .bind(stored_path.to_string_lossy().as_ref())
    .bind(history)
    .bind(activate as i64)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    get_by_name(pool, name)
        .await?
        .context("dataset vanished right after registration")
}

pub async fn get_by_name(pool: &SqlitePool, name: &str) -> Result<Option<ManagedDatabase>> {
    let row = sqlx::query("SELECT * FROM managed_databases WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(ManagedDatabase::from_row))
}

pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<ManagedDatabase>> {
    let row = sqlx::query("SELECT * FROM managed_databases WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(ManagedDatabase::from_row))
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<ManagedDatabase>> {
    let rows = sqlx::query("SELECT * FROM managed_databases ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(ManagedDatabase::from_row).collect())
}

pub async fn set_active(pool: &SqlitePool, name: &str, active: bool) -> Result<ManagedDatabase> {
    let dataset = get_by_name(pool, name)
        .await?
        .with_context(|| format!("no dataset named '{}'", name))?;

    sqlx::query("UPDATE managed_databases SET active = ?, updated_at = ? WHERE id = ?")
        .bind(active as i64)
        .bind(chrono::Utc::now().timestamp())
        .bind(dataset.id)
        .execute(pool)
        .await?;

    get_by_id(pool, dataset.id)
        .await?
        .context("dataset vanished during update")
}

/// Deletes the dataset row (index rows cascade) and unlinks the stored file.
pub async fn remove(pool: &SqlitePool, name: &str) -> Result<()> {
    let dataset = get_by_name(pool, name)
        .await?
        .with_context(|| format!("no dataset named '{}'", name))?;

    sqlx::query("DELETE FROM managed_databases WHERE id = ?")
        .bind(dataset.id)
        .execute(pool)
        .await?;

    let path = Path::new(&dataset.file_path);
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove stored file {}", dataset.file_path))?;
    }
    Ok(())
}

/// Points a dataset at a replacement file and resets its encryption state,
/// so the new file version goes back through ingestion from scratch.
pub async fn replace_file(
    pool: &SqlitePool,
    config: &Config,
    name: &str,
    source: &Path,
) -> Result<ManagedDatabase> {
    let dataset = get_by_name(pool, name)
        .await?
        .with_context(|| format!("no dataset named '{}'", name))?;
    if !source.exists() {
        bail!("source file does not exist: {}", source.display());
    }
    let extension = source
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    crate::format::handler_for(source)?;

    std::fs::create_dir_all(&config.storage.dir)?;
    let stored_path = config.storage.dir.join(format!("{}.{}", name, extension));
    std::fs::copy(source, &stored_path)?;

    // Stale index rows from the previous file version are dropped along
    // with the encryption state.
    sqlx::query("DELETE FROM data WHERE database_id = ?")
        .bind(dataset.id)
        .execute(pool)
        .await?;
    sqlx::query(
        r#"
        UPDATE managed_databases
        SET file_path = ?, is_encrypted = 0, encryption_started = 0,
            job_id = NULL, last_error = NULL, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(stored_path.to_string_lossy().as_ref())
    .bind(chrono::Utc::now().timestamp())
    .bind(dataset.id)
    .execute(pool)
    .await?;

    get_by_id(pool, dataset.id)
        .await?
        .context("dataset vanished during replace")
}
