//! Equality search over the encrypted cell index.
//!
//! The query is normalized and encrypted with the same deterministic cipher
//! used at ingest time, so its ciphertext equals whatever was stored for
//! the same logical value — the corpus is never decrypted to answer a
//! search. Matches are expanded to full source rows, grouped by dataset,
//! and the matched columns classified by sensitivity tier.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::cipher::CellCipher;
use crate::classify::classify_columns;
use crate::history;
use crate::models::{truncate_value, DatabaseReport};
use crate::normalize::normalize_value;

/// Runs a search and appends it to the query history log.
///
/// Every successful search is recorded, whether or not it found matches.
pub async fn run_search(
    pool: &SqlitePool,
    cipher: &CellCipher,
    raw_query: &str,
    user: &str,
) -> Result<Vec<DatabaseReport>> {
    let (encrypted_query, reports) = execute(pool, cipher, raw_query).await?;
    history::append(pool, user, &encrypted_query, &reports).await?;
    Ok(reports)
}

/// Core search: returns the encrypted query string and the grouped,
/// classified results. No match anywhere is an empty result set, not an
/// error.
pub async fn execute(
    pool: &SqlitePool,
    cipher: &CellCipher,
    raw_query: &str,
) -> Result<(String, Vec<DatabaseReport>)> {
    let query = raw_query.trim();
    // Malformed queries are rejected before encryption is attempted.
    if query.is_empty() {
        bail!("query must not be empty");
    }

    let ciphertext = cipher.encrypt(&normalize_value(query));
    // Stored values are truncated to the column width, so the probe is too.
    let probe = truncate_value(&ciphertext).to_string();

    // Step 1: matched (database, row) pairs, de-duplicated, only across
    // datasets that are active and fully encrypted.
    let pairs = sqlx::query(
        r#"
        SELECT DISTINCT d.database_id, d.user_index
        FROM data d
        JOIN managed_databases m ON m.id = d.database_id
        WHERE d.value = ? AND m.active = 1 AND m.is_encrypted = 1
        "#,
    )
    .bind(&probe)
    .fetch_all(pool)
    .await?;

    // Step 2: every other column captured for those same source rows.
    let mut cells: Vec<MatchedCell> = Vec::new();
    for pair in &pairs {
        let database_id: i64 = pair.get("database_id");
        let user_index: i64 = pair.get("user_index");

        let rows = sqlx::query(
            r#"
            SELECT m.name, m.history, d.user_index, d.column_name
            FROM data d
            JOIN managed_databases m ON m.id = d.database_id
            WHERE d.database_id = ? AND d.user_index = ?
              AND m.active = 1 AND m.is_encrypted = 1
            ORDER BY d.id
            "#,
        )
        .bind(database_id)
        .bind(user_index)
        .fetch_all(pool)
        .await?;

        for row in &rows {
            cells.push(MatchedCell {
                database: row.get("name"),
                history: row.get("history"),
                user_index: row.get("user_index"),
                column_name: row.get("column_name"),
            });
        }
    }

    Ok((probe, group_results(cells)))
}

/// One matched index cell joined with its owning dataset.
#[derive(Debug, Clone)]
struct MatchedCell {
    database: String,
    history: Option<String>,
    user_index: i64,
    column_name: String,
}

/// Groups matched cells by dataset (ordered by dataset name, then row
/// index) and classifies each group's columns into sensitivity tiers.
fn group_results(mut cells: Vec<MatchedCell>) -> Vec<DatabaseReport> {
    cells.sort_by(|a, b| {
        a.database
            .cmp(&b.database)
            .then(a.user_index.cmp(&b.user_index))
    });

    let mut reports: Vec<(String, Option<String>, Vec<String>)> = Vec::new();
    for cell in cells {
        match reports.last_mut() {
            Some((database, _, columns)) if *database == cell.database => {
                columns.push(cell.column_name);
            }
            _ => reports.push((cell.database, cell.history, vec![cell.column_name])),
        }
    }

    reports
        .into_iter()
        .map(|(database, history, columns)| DatabaseReport {
            database,
            history,
            data: classify_columns(columns.iter().map(String::as_str)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(database: &str, user_index: i64, column: &str) -> MatchedCell {
        MatchedCell {
            database: database.to_string(),
            history: Some(format!("history of {}", database)),
            user_index,
            column_name: column.to_string(),
        }
    }

    #[test]
    fn groups_by_database_in_name_order() {
        let reports = group_results(vec![
            cell("beta", 1, "email"),
            cell("alpha", 2, "Телефон"),
            cell("beta", 1, "Город"),
        ]);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].database, "alpha");
        assert_eq!(reports[0].data.critical, vec!["phone_number"]);
        assert_eq!(reports[1].database, "beta");
        assert_eq!(reports[1].data.critical, vec!["email"]);
        assert_eq!(reports[1].data.medium, vec!["city"]);
    }

    #[test]
    fn duplicate_columns_collapse() {
        let reports = group_results(vec![
            cell("alpha", 1, "email"),
            cell("alpha", 2, "email"),
            cell("alpha", 2, "почта"),
        ]);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].data.critical, vec!["email"]);
    }

    #[test]
    fn unknown_columns_fall_to_low() {
        let reports = group_results(vec![cell("alpha", 1, "foo_bar")]);
        assert_eq!(reports[0].data.low, vec!["foo_bar"]);
        assert!(reports[0].data.critical.is_empty());
    }

    #[test]
    fn no_cells_is_empty_report() {
        assert!(group_results(Vec::new()).is_empty());
    }
}
