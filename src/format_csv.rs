//! CSV dump handler.
//!
//! A CSV file is one flat table. The first record is always treated as the
//! header; data rows are addressed by their 1-based line number. Non-empty
//! cells are normalized, encrypted, and the file is rewritten in place with
//! ciphertext. Cells wider than the header get a synthetic "Column N" label.

use anyhow::Result;
use async_trait::async_trait;
use csv::StringRecord;
use std::path::{Path, PathBuf};

use crate::cipher::CellCipher;
use crate::format::{FormatError, FormatHandler, IndexBuffer};
use crate::models::{truncate_value, IndexRecord, PreviewTable, RowRef};
use crate::normalize::normalize_value;
use crate::progress::{IngestEvent, IngestProgress};

pub struct CsvHandler {
    path: PathBuf,
}

impl CsvHandler {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn read_records(&self) -> Result<Vec<StringRecord>, FormatError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| FormatError::InvalidCsv(e.to_string()))?;

        let mut records = Vec::new();
        for record in reader.records() {
            records.push(record.map_err(|e| FormatError::InvalidCsv(e.to_string()))?);
        }
        Ok(records)
    }
}

#[async_trait]
impl FormatHandler for CsvHandler {
    async fn validate(&self) -> Result<()> {
        self.read_records()?;
        Ok(())
    }

    async fn count_rows(&self) -> Result<u64> {
        let records = self.read_records()?;
        Ok(records.len().saturating_sub(1) as u64)
    }

    async fn encrypt(
        &self,
        cipher: &CellCipher,
        database_id: i64,
        buffer: &mut IndexBuffer<'_>,
        progress: &dyn IngestProgress,
        total: u64,
    ) -> Result<()> {
        let records = self.read_records()?;
        let header: Vec<String> = records
            .first()
            .map(|record| record.iter().map(str::to_string).collect())
            .unwrap_or_default();

        let mut writer = csv::WriterBuilder::new().flexible(true).from_path(&self.path)?;
        if let Some(first) = records.first() {
            writer.write_record(first)?;
        }

        let mut processed = 0u64;
        for (offset, record) in records.iter().skip(1).enumerate() {
            let line = RowRef::CsvLine((offset + 1) as i64);
            let mut out_row: Vec<String> = Vec::with_capacity(record.len());

            for (col, value) in record.iter().enumerate() {
                if value.is_empty() {
                    out_row.push(String::new());
                    continue;
                }

                let ciphertext = cipher.encrypt(&normalize_value(value));
                let column_name = header
                    .get(col)
                    .filter(|name| !name.is_empty())
                    .cloned()
                    .unwrap_or_else(|| format!("Column {}", col + 1));

                buffer
                    .push(IndexRecord {
                        database_id,
                        row: line,
                        column_name,
                        value: truncate_value(&ciphertext).to_string(),
                    })
                    .await?;
                out_row.push(ciphertext);
            }

            writer.write_record(&out_row)?;
            processed += 1;
            progress
                .report(IngestEvent::Encrypting { processed, total })
                .await;
        }

        writer.flush()?;
        Ok(())
    }

    async fn read_preview(&self, n: u32) -> Result<Vec<PreviewTable>> {
        let records = self.read_records()?;
        let columns: Vec<String> = records
            .first()
            .map(|record| record.iter().map(str::to_string).collect())
            .unwrap_or_default();

        let rows = records
            .iter()
            .skip(1)
            .take(n as usize)
            .map(|record| {
                record
                    .iter()
                    .map(|value| serde_json::Value::String(value.to_string()))
                    .collect()
            })
            .collect();

        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "csv".to_string());

        Ok(vec![PreviewTable {
            name,
            columns,
            rows,
        }])
    }
}
