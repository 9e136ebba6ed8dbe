//! Core data models used throughout Leakdex.
//!
//! These types represent the registered datasets, the encrypted index
//! records that flow through ingestion, and the grouped results the search
//! engine returns.

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::classify::TierBuckets;

/// One registered leak dataset and its lifecycle flags.
///
/// A dataset participates in search only when `active && is_encrypted`.
#[derive(Debug, Clone, Serialize)]
pub struct ManagedDatabase {
    pub id: i64,
    pub name: String,
    pub file_path: String,
    /// Human-readable note about the leak (≤500 chars).
    pub history: Option<String>,
    pub active: bool,
    pub is_encrypted: bool,
    /// Idempotency guard: set when an ingestion run has claimed this
    /// dataset; cleared on failure so a retry is possible.
    pub encryption_started: bool,
    /// Identifier of the most recent background ingestion job, if any.
    pub job_id: Option<String>,
    /// Description of the last ingestion failure, if any.
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ManagedDatabase {
    pub fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            name: row.get("name"),
            file_path: row.get("file_path"),
            history: row.get("history"),
            active: row.get::<i64, _>("active") != 0,
            is_encrypted: row.get::<i64, _>("is_encrypted") != 0,
            encryption_started: row.get::<i64, _>("encryption_started") != 0,
            job_id: row.get("job_id"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    /// True when the dataset is visible to the search engine.
    pub fn searchable(&self) -> bool {
        self.active && self.is_encrypted
    }
}

/// Source-native row identifier.
///
/// SQLite rows are addressed by the engine's `rowid`; CSV rows by their
/// 1-based line number. The two live in different namespaces and must never
/// be compared across formats, so the tag travels with the value until the
/// storage boundary collapses it to an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowRef {
    SqliteRowId(i64),
    CsvLine(i64),
}

impl RowRef {
    /// The bare integer persisted in the `data.user_index` column.
    pub fn index(self) -> i64 {
        match self {
            RowRef::SqliteRowId(n) => n,
            RowRef::CsvLine(n) => n,
        }
    }
}

/// One encrypted cell plus its source coordinates, buffered during
/// ingestion and bulk-inserted into the `data` side-table.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub database_id: i64,
    pub row: RowRef,
    /// Origin column name, unnormalized.
    pub column_name: String,
    /// Ciphertext, truncated to the storage column width.
    pub value: String,
}

/// Ciphertext column width. Truncation can make very long ciphertexts
/// non-reversible, which is acceptable: stored values are only ever
/// compared for equality, never decrypted.
pub const VALUE_MAX_LEN: usize = 255;

/// Truncates a hex ciphertext to [`VALUE_MAX_LEN`]. Hex is ASCII, so the
/// byte cut is always a char boundary.
pub fn truncate_value(ciphertext: &str) -> &str {
    &ciphertext[..ciphertext.len().min(VALUE_MAX_LEN)]
}

/// Search results for one dataset: its name, leak note, and the matched
/// columns bucketed by sensitivity.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseReport {
    pub database: String,
    pub history: Option<String>,
    pub data: TierBuckets,
}

/// Preview of one source table: column names plus the first n raw rows,
/// returned whether or not the dataset has been encrypted yet.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}
