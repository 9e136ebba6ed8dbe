//! Ingestion engine.
//!
//! Drives one dataset through validate → count → encrypt → index, and flips
//! `is_encrypted` only when every row made it through. "Encrypted" is
//! all-or-nothing from the caller's point of view: a failed run records its
//! error, clears the `encryption_started` guard so a retry is possible, and
//! leaves the dataset invisible to search. A retry re-processes the whole
//! file, which is safe because the index's unique quadruple swallows
//! overlapping re-inserts.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::Path;

use crate::cipher::CellCipher;
use crate::config::Config;
use crate::datasets;
use crate::format::{handler_for, IndexBuffer, IndexSink};
use crate::models::IndexRecord;
use crate::progress::{IngestEvent, IngestProgress};

/// Flushes buffered index records into the `data` table, one transaction
/// per batch. `INSERT OR IGNORE` suppresses duplicate quadruples — expected
/// behavior during retries, not an error.
pub struct SqliteIndexSink<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SqliteIndexSink<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IndexSink for SqliteIndexSink<'_> {
    async fn insert_batch(&self, records: &[IndexRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO data (database_id, user_index, column_name, value)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(record.database_id)
            .bind(record.row.index())
            .bind(&record.column_name)
            .bind(&record.value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Runs one full ingestion for a registered dataset.
///
/// Callers invoke this explicitly after the registering write has
/// committed — either inline (CLI) or from a background job
/// ([`crate::jobs::start`]).
pub async fn run_ingestion(
    pool: &SqlitePool,
    config: &Config,
    database_id: i64,
    progress: &dyn IngestProgress,
) -> Result<()> {
    let dataset = datasets::get_by_id(pool, database_id)
        .await?
        .with_context(|| format!("no dataset with id {}", database_id))?;

    if dataset.is_encrypted {
        bail!("dataset '{}' is already encrypted", dataset.name);
    }

    progress.report(IngestEvent::Validating).await;

    // Unsupported extensions and unreadable files fail here, before the
    // guard is taken and before any row is touched.
    let prepared = async {
        let handler = handler_for(Path::new(&dataset.file_path))?;
        handler.validate().await?;
        let total = handler.count_rows().await?;
        Ok::<_, anyhow::Error>((handler, total))
    }
    .await;
    let (handler, total) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => {
            record_error(pool, database_id, &err).await?;
            return Err(err).with_context(|| format!("validation failed for '{}'", dataset.name));
        }
    };

    // Atomic claim: of two near-simultaneous runs, exactly one proceeds.
    let claimed = sqlx::query(
        r#"
        UPDATE managed_databases
        SET encryption_started = 1, last_error = NULL, updated_at = ?
        WHERE id = ? AND encryption_started = 0 AND is_encrypted = 0
        "#,
    )
    .bind(chrono::Utc::now().timestamp())
    .bind(database_id)
    .execute(pool)
    .await?;
    if claimed.rows_affected() == 0 {
        bail!("ingestion already in progress for '{}'", dataset.name);
    }

    let cipher = CellCipher::new(config.encryption.key_bytes()?);
    let sink = SqliteIndexSink::new(pool);
    let mut buffer = IndexBuffer::new(&sink, config.ingest.batch_size);

    let outcome = async {
        handler
            .encrypt(&cipher, database_id, &mut buffer, progress, total)
            .await?;
        buffer.finish().await
    }
    .await;

    match outcome {
        Ok(()) => {
            sqlx::query(
                r#"
                UPDATE managed_databases
                SET is_encrypted = 1, last_error = NULL, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(chrono::Utc::now().timestamp())
            .bind(database_id)
            .execute(pool)
            .await?;
            progress.report(IngestEvent::Finished { total }).await;
            Ok(())
        }
        Err(err) => {
            // Reset the guard so the dataset stays retryable; the dataset
            // remains un-encrypted and excluded from search.
            record_error(pool, database_id, &err).await?;
            sqlx::query("UPDATE managed_databases SET encryption_started = 0 WHERE id = ?")
                .bind(database_id)
                .execute(pool)
                .await?;
            Err(err).with_context(|| format!("ingestion failed for '{}'", dataset.name))
        }
    }
}

async fn record_error(pool: &SqlitePool, database_id: i64, err: &anyhow::Error) -> Result<()> {
    sqlx::query("UPDATE managed_databases SET last_error = ?, updated_at = ? WHERE id = ?")
        .bind(format!("{:#}", err))
        .bind(chrono::Utc::now().timestamp())
        .bind(database_id)
        .execute(pool)
        .await?;
    Ok(())
}
