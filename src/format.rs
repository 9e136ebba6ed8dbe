//! Format handler trait and extension dispatch.
//!
//! Each supported dump format implements one capability set:
//! `{validate, count_rows, encrypt, read_preview}`. The concrete handler is
//! selected by file extension before any row is touched; an unsupported
//! extension is rejected up front with a [`FormatError`].

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::cipher::CellCipher;
use crate::format_csv::CsvHandler;
use crate::format_sqlite::SqliteHandler;
use crate::models::{IndexRecord, PreviewTable};
use crate::progress::IngestProgress;

/// The file is not a valid instance of its claimed format.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unsupported file extension: '{0}' (expected .sqlite, .db, or .csv)")]
    Unsupported(String),

    #[error("not a readable SQLite database: {0}")]
    InvalidSqlite(String),

    #[error("not a valid CSV file: {0}")]
    InvalidCsv(String),
}

/// Capability set every dump format provides.
///
/// `encrypt` walks the source, normalizes and encrypts its textual cells in
/// place, and pushes one [`IndexRecord`] per encrypted cell into the sink
/// buffer. After each processed source row it reports progress; it has no
/// awareness of how progress is consumed downstream.
#[async_trait]
pub trait FormatHandler: Send + Sync {
    /// Cheap structural check. Ingestion must not proceed past a failure.
    async fn validate(&self) -> Result<()>;

    /// Total data rows in the source (all user tables for SQLite, records
    /// minus header for CSV).
    async fn count_rows(&self) -> Result<u64>;

    async fn encrypt(
        &self,
        cipher: &CellCipher,
        database_id: i64,
        buffer: &mut IndexBuffer<'_>,
        progress: &dyn IngestProgress,
        total: u64,
    ) -> Result<()>;

    /// Column names and the first `n` raw rows per table. Works whether or
    /// not the source has been encrypted yet.
    async fn read_preview(&self, n: u32) -> Result<Vec<PreviewTable>>;
}

/// Selects a handler by file extension.
pub fn handler_for(path: &Path) -> Result<Box<dyn FormatHandler>, FormatError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("sqlite") | Some("db") => Ok(Box::new(SqliteHandler::new(path))),
        Some("csv") => Ok(Box::new(CsvHandler::new(path))),
        other => Err(FormatError::Unsupported(
            other.unwrap_or_default().to_string(),
        )),
    }
}

/// Persistence seam for buffered index records.
///
/// One `insert_batch` call is one bulk insert. Duplicate quadruples are
/// silently ignored by the store so overlapping re-runs stay harmless.
#[async_trait]
pub trait IndexSink: Send + Sync {
    async fn insert_batch(&self, records: &[IndexRecord]) -> Result<()>;
}

/// Buffers index records and flushes them to the sink in fixed-size batches
/// to bound memory and transaction size. A final partial batch is always
/// flushed by [`IndexBuffer::finish`].
pub struct IndexBuffer<'a> {
    sink: &'a dyn IndexSink,
    capacity: usize,
    records: Vec<IndexRecord>,
}

impl<'a> IndexBuffer<'a> {
    pub fn new(sink: &'a dyn IndexSink, capacity: usize) -> Self {
        Self {
            sink,
            capacity: capacity.max(1),
            records: Vec::new(),
        }
    }

    pub async fn push(&mut self, record: IndexRecord) -> Result<()> {
        self.records.push(record);
        if self.records.len() >= self.capacity {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn finish(&mut self) -> Result<()> {
        if !self.records.is_empty() {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.sink.insert_batch(&self.records).await?;
        self.records.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RowRef;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingSink {
        flushes: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl CountingSink {
        fn new() -> Self {
            Self {
                flushes: AtomicUsize::new(0),
                batch_sizes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl IndexSink for CountingSink {
        async fn insert_batch(&self, records: &[IndexRecord]) -> Result<()> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(records.len());
            Ok(())
        }
    }

    fn record(n: i64) -> IndexRecord {
        IndexRecord {
            database_id: 1,
            row: RowRef::CsvLine(n),
            column_name: "email".to_string(),
            value: format!("{:032x}", n),
        }
    }

    #[tokio::test]
    async fn batch_boundary_is_two_flushes() {
        let sink = CountingSink::new();
        let mut buffer = IndexBuffer::new(&sink, 5);
        for n in 0..6 {
            buffer.push(record(n)).await.unwrap();
        }
        buffer.finish().await.unwrap();
        assert_eq!(sink.flushes.load(Ordering::SeqCst), 2);
        assert_eq!(*sink.batch_sizes.lock().unwrap(), vec![5, 1]);
    }

    #[tokio::test]
    async fn exact_batch_has_no_empty_tail_flush() {
        let sink = CountingSink::new();
        let mut buffer = IndexBuffer::new(&sink, 5);
        for n in 0..5 {
            buffer.push(record(n)).await.unwrap();
        }
        buffer.finish().await.unwrap();
        assert_eq!(sink.flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_by_extension() {
        assert!(handler_for(Path::new("dump.sqlite")).is_ok());
        assert!(handler_for(Path::new("dump.DB")).is_ok());
        assert!(handler_for(Path::new("dump.csv")).is_ok());
        assert!(matches!(
            handler_for(Path::new("dump.xlsx")),
            Err(FormatError::Unsupported(_))
        ));
        assert!(matches!(
            handler_for(Path::new("dump")),
            Err(FormatError::Unsupported(_))
        ));
    }
}
