//! Ingestion progress reporting.
//!
//! Reports observable progress while a dump is being encrypted so operators
//! see how much is left and when the dataset becomes searchable. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts; background
//! jobs persist the same events into the jobs table instead (see
//! [`crate::jobs`]). Reporting is fire-and-forget — the handlers emit events
//! and have no awareness of who consumes them.

use async_trait::async_trait;
use std::io::Write;

/// A single progress event for one ingestion run.
#[derive(Clone, Debug)]
pub enum IngestEvent {
    /// The source file is being validated and counted. Total unknown.
    Validating,
    /// Encryption phase: n source rows processed out of total.
    Encrypting { processed: u64, total: u64 },
    /// The run completed and the dataset is now searchable.
    Finished { total: u64 },
}

/// Receives progress events. Called from the ingestion pipeline after every
/// processed source row.
#[async_trait]
pub trait IngestProgress: Send + Sync {
    async fn report(&self, event: IngestEvent);
}

/// Human-friendly progress on stderr: "encrypt leaks-2021  1,234 / 5,000 rows".
pub struct StderrProgress {
    dataset: String,
}

impl StderrProgress {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
        }
    }
}

#[async_trait]
impl IngestProgress for StderrProgress {
    async fn report(&self, event: IngestEvent) {
        let line = match &event {
            IngestEvent::Validating => format!("encrypt {}  validating...\n", self.dataset),
            IngestEvent::Encrypting { processed, total } => format!(
                "encrypt {}  {} / {} rows\n",
                self.dataset,
                format_number(*processed),
                format_number(*total)
            ),
            IngestEvent::Finished { total } => format!(
                "encrypt {}  done ({} rows)\n",
                self.dataset,
                format_number(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress {
    dataset: String,
}

impl JsonProgress {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
        }
    }
}

#[async_trait]
impl IngestProgress for JsonProgress {
    async fn report(&self, event: IngestEvent) {
        let obj = match &event {
            IngestEvent::Validating => serde_json::json!({
                "event": "progress",
                "dataset": self.dataset,
                "phase": "validating"
            }),
            IngestEvent::Encrypting { processed, total } => serde_json::json!({
                "event": "progress",
                "dataset": self.dataset,
                "phase": "encrypting",
                "n": processed,
                "total": total
            }),
            IngestEvent::Finished { total } => serde_json::json!({
                "event": "progress",
                "dataset": self.dataset,
                "phase": "done",
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

#[async_trait]
impl IngestProgress for NoProgress {
    async fn report(&self, _event: IngestEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode, labeled with the dataset name.
    pub fn reporter(&self, dataset: &str) -> Box<dyn IngestProgress> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress::new(dataset)),
            ProgressMode::Json => Box::new(JsonProgress::new(dataset)),
        }
    }
}
