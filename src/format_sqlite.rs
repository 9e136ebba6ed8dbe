//! SQLite dump handler.
//!
//! Walks every user table of an uploaded SQLite file, addressing rows by
//! the engine's `rowid`. Every TEXT cell is normalized, encrypted, and
//! rewritten in place; one index record is buffered per encrypted cell.
//! Internal bookkeeping tables are excluded by a fixed denylist.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, TypeInfo, ValueRef};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::cipher::CellCipher;
use crate::format::{FormatError, FormatHandler, IndexBuffer};
use crate::models::{truncate_value, IndexRecord, PreviewTable, RowRef};
use crate::normalize::normalize_value;
use crate::progress::{IngestEvent, IngestProgress};

/// Internal bookkeeping tables that never hold user data.
const SYSTEM_TABLES: &[&str] = &[
    "sqlite_sequence",
    "sqlite_stat1",
    "sqlite_stat3",
    "sqlite_stat4",
];

pub struct SqliteHandler {
    path: PathBuf,
}

impl SqliteHandler {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    async fn open(&self) -> Result<SqlitePool> {
        if !self.path.exists() {
            anyhow::bail!("file does not exist: {}", self.path.display());
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", self.path.display()))?
            .create_if_missing(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(pool)
    }

    async fn user_tables(&self, pool: &SqlitePool) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .filter(|name| !SYSTEM_TABLES.contains(&name.as_str()))
            .collect())
    }

    async fn table_columns(&self, pool: &SqlitePool, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("name")).collect())
    }
}

#[async_trait]
impl FormatHandler for SqliteHandler {
    async fn validate(&self) -> Result<()> {
        let pool = self
            .open()
            .await
            .map_err(|e| FormatError::InvalidSqlite(e.to_string()))?;
        // Probing the table catalog is what actually reads the header.
        let probe = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(&pool)
            .await;
        pool.close().await;
        probe.map_err(|e| FormatError::InvalidSqlite(e.to_string()))?;
        Ok(())
    }

    async fn count_rows(&self) -> Result<u64> {
        let pool = self.open().await?;
        let mut total = 0u64;
        for table in self.user_tables(&pool).await? {
            let count: i64 =
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(&table)))
                    .fetch_one(&pool)
                    .await?;
            total += count as u64;
        }
        pool.close().await;
        Ok(total)
    }

    async fn encrypt(
        &self,
        cipher: &CellCipher,
        database_id: i64,
        buffer: &mut IndexBuffer<'_>,
        progress: &dyn IngestProgress,
        total: u64,
    ) -> Result<()> {
        let pool = self.open().await?;
        let mut processed = 0u64;

        for table in self.user_tables(&pool).await? {
            let columns = self.table_columns(&pool, &table).await?;
            let select = format!("SELECT rowid AS rowid_, * FROM {}", quote_ident(&table));
            let rows = sqlx::query(&select).fetch_all(&pool).await?;

            for row in &rows {
                let rowid: i64 = row.get("rowid_");
                let mut updates: Vec<(String, String)> = Vec::new();

                for (idx, column) in columns.iter().enumerate() {
                    // Positional offset skips the leading rowid alias.
                    let cell = idx + 1;
                    let raw = row.try_get_raw(cell)?;
                    if raw.is_null() {
                        continue;
                    }
                    let type_name = {
                        let info = raw.type_info();
                        info.name().to_string()
                    };
                    if type_name != "TEXT" {
                        continue;
                    }

                    let value: String = row.try_get(cell)?;
                    let ciphertext = cipher.encrypt(&normalize_value(&value));
                    buffer
                        .push(IndexRecord {
                            database_id,
                            row: RowRef::SqliteRowId(rowid),
                            column_name: column.clone(),
                            value: truncate_value(&ciphertext).to_string(),
                        })
                        .await?;
                    updates.push((column.clone(), ciphertext));
                }

                if !updates.is_empty() {
                    let set_clause = updates
                        .iter()
                        .map(|(column, _)| format!("{} = ?", quote_ident(column)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let sql = format!(
                        "UPDATE {} SET {} WHERE rowid = ?",
                        quote_ident(&table),
                        set_clause
                    );
                    let mut query = sqlx::query(&sql);
                    for (_, ciphertext) in &updates {
                        query = query.bind(ciphertext);
                    }
                    query.bind(rowid).execute(&pool).await?;
                }

                processed += 1;
                progress
                    .report(IngestEvent::Encrypting { processed, total })
                    .await;
            }
        }

        pool.close().await;
        Ok(())
    }

    async fn read_preview(&self, n: u32) -> Result<Vec<PreviewTable>> {
        let pool = self.open().await?;
        let mut previews = Vec::new();

        for table in self.user_tables(&pool).await? {
            let columns = self.table_columns(&pool, &table).await?;
            let sql = format!("SELECT * FROM {} LIMIT {}", quote_ident(&table), n);
            let rows = sqlx::query(&sql).fetch_all(&pool).await?;

            let mut preview_rows = Vec::with_capacity(rows.len());
            for row in &rows {
                let mut cells = Vec::with_capacity(columns.len());
                for idx in 0..columns.len() {
                    cells.push(cell_to_json(row, idx)?);
                }
                preview_rows.push(cells);
            }

            previews.push(PreviewTable {
                name: table,
                columns,
                rows: preview_rows,
            });
        }

        pool.close().await;
        Ok(previews)
    }
}

fn cell_to_json(row: &SqliteRow, idx: usize) -> Result<serde_json::Value> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(serde_json::Value::Null);
    }
    let type_name = {
        let info = raw.type_info();
        info.name().to_string()
    };
    Ok(match type_name.as_str() {
        "TEXT" => serde_json::Value::String(row.try_get::<String, _>(idx)?),
        "INTEGER" => serde_json::Value::from(row.try_get::<i64, _>(idx)?),
        "REAL" => serde_json::Value::from(row.try_get::<f64, _>(idx)?),
        "BLOB" => serde_json::Value::String(hex::encode(row.try_get::<Vec<u8>, _>(idx)?)),
        _ => serde_json::Value::Null,
    })
}

/// Table and column names come from the dump itself, so they are quoted,
/// never interpolated bare.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn validate_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.sqlite");
        std::fs::write(&path, b"definitely not a database").unwrap();

        let handler = SqliteHandler::new(&path);
        let err = handler.validate().await.unwrap_err();
        assert!(err.downcast_ref::<FormatError>().is_some());
    }

    #[tokio::test]
    async fn validate_rejects_missing_file() {
        let handler = SqliteHandler::new(Path::new("/nonexistent/nope.db"));
        assert!(handler.validate().await.is_err());
    }
}
