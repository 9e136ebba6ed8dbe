//! Background ingestion jobs.
//!
//! Ingestion runs on a worker task distinct from the request path. Each job
//! persists its progress blob into the `ingest_jobs` table, keyed by a UUID,
//! where the polling endpoint reads it. Reporting is best-effort with no
//! handshake: a poller that finds no row yet treats the job as not started.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::ingest;
use crate::progress::{IngestEvent, IngestProgress};

/// Progress blob exposed to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: String,
    /// `pending` | `running` | `done` | `failed`
    pub state: String,
    pub current: i64,
    pub total: i64,
    pub percent: i64,
    pub description: String,
}

/// Schedules a background ingestion for a registered dataset.
///
/// The job row is written before the task is spawned so a poller can never
/// observe a started job with no progress record. Returns the job id.
pub async fn start(pool: &SqlitePool, config: &Config, database_id: i64) -> Result<String> {
    let job_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO ingest_jobs (id, database_id, state, description, updated_at)
        VALUES (?, ?, 'running', 'starting encryption', ?)
        "#,
    )
    .bind(&job_id)
    .bind(database_id)
    .bind(now)
    .execute(pool)
    .await?;

    sqlx::query("UPDATE managed_databases SET job_id = ?, updated_at = ? WHERE id = ?")
        .bind(&job_id)
        .bind(now)
        .bind(database_id)
        .execute(pool)
        .await?;

    let task_pool = pool.clone();
    let task_config = config.clone();
    let task_job_id = job_id.clone();
    tokio::spawn(async move {
        let reporter = JobProgress {
            pool: task_pool.clone(),
            job_id: task_job_id.clone(),
        };
        let result = ingest::run_ingestion(&task_pool, &task_config, database_id, &reporter).await;
        let (state, description) = match &result {
            Ok(()) => ("done", "encryption complete".to_string()),
            Err(err) => ("failed", format!("error: {:#}", err)),
        };
        let _ = sqlx::query(
            "UPDATE ingest_jobs SET state = ?, description = ?, updated_at = ? WHERE id = ?",
        )
        .bind(state)
        .bind(description)
        .bind(chrono::Utc::now().timestamp())
        .bind(&task_job_id)
        .execute(&task_pool)
        .await;
    });

    Ok(job_id)
}

/// Reads a job's progress blob. An unknown id reads as a pending job, not
/// an error — the poller may simply be ahead of the queue.
pub async fn status(pool: &SqlitePool, job_id: &str) -> Result<JobStatus> {
    let row = sqlx::query("SELECT * FROM ingest_jobs WHERE id = ?")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    Ok(match row {
        Some(row) => JobStatus {
            id: row.get("id"),
            state: row.get("state"),
            current: row.get("current"),
            total: row.get("total"),
            percent: row.get("percent"),
            description: row.get("description"),
        },
        None => JobStatus {
            id: job_id.to_string(),
            state: "pending".to_string(),
            current: 0,
            total: 0,
            percent: 0,
            description: "not started".to_string(),
        },
    })
}

/// Persists ingestion progress into the job row, fire-and-forget.
struct JobProgress {
    pool: SqlitePool,
    job_id: String,
}

#[async_trait]
impl IngestProgress for JobProgress {
    async fn report(&self, event: IngestEvent) {
        let (current, total, description) = match event {
            IngestEvent::Validating => (0, 0, "validating source file".to_string()),
            IngestEvent::Encrypting { processed, total } => {
                let description = format!(
                    "processed {} of {} rows ({}%)",
                    processed,
                    total,
                    percent_of(processed, total)
                );
                (processed as i64, total as i64, description)
            }
            IngestEvent::Finished { total } => {
                (total as i64, total as i64, "encryption complete".to_string())
            }
        };

        let percent = percent_of(current.max(0) as u64, total.max(0) as u64);
        let _ = sqlx::query(
            r#"
            UPDATE ingest_jobs
            SET current = ?, total = ?, percent = ?, description = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(current)
        .bind(total)
        .bind(percent as i64)
        .bind(description)
        .bind(chrono::Utc::now().timestamp())
        .bind(&self.job_id)
        .execute(&self.pool)
        .await;
    }
}

fn percent_of(current: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    current * 100 / total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_handles_zero_total() {
        assert_eq!(percent_of(0, 0), 0);
        assert_eq!(percent_of(5, 10), 50);
        assert_eq!(percent_of(10, 10), 100);
    }
}
