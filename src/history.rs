//! Query history log.
//!
//! Every executed search is recorded for audit: who asked, the encrypted
//! query string (plaintext is never persisted), the classified result blob,
//! and when. Consumed by the CLI `history` command and the HTTP endpoint.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::models::DatabaseReport;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub user: String,
    /// Encrypted query string as stored.
    pub query: String,
    pub result: serde_json::Value,
    pub created_at: i64,
}

pub async fn append(
    pool: &SqlitePool,
    user: &str,
    encrypted_query: &str,
    reports: &[DatabaseReport],
) -> Result<()> {
    let result_json = serde_json::to_string(reports)?;
    sqlx::query(
        "INSERT INTO query_history (user, query, result_json, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user)
    .bind(encrypted_query)
    .bind(result_json)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list(pool: &SqlitePool, user: Option<&str>, limit: i64) -> Result<Vec<HistoryEntry>> {
    let rows = match user {
        Some(user) => {
            sqlx::query(
                "SELECT * FROM query_history WHERE user = ? ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(user)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query("SELECT * FROM query_history ORDER BY created_at DESC, id DESC LIMIT ?")
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
    };

    Ok(rows
        .iter()
        .map(|row| {
            let result_json: String = row.get("result_json");
            HistoryEntry {
                id: row.get("id"),
                user: row.get("user"),
                query: row.get("query"),
                result: serde_json::from_str(&result_json)
                    .unwrap_or(serde_json::Value::Array(Vec::new())),
                created_at: row.get("created_at"),
            }
        })
        .collect())
}
