//! Library-level pipeline tests: registration → ingestion → search over
//! real temp files, exercising both format handlers against the same store.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tempfile::TempDir;

use leakdex::cipher::CellCipher;
use leakdex::config::{Config, DbConfig, EncryptionConfig, IngestConfig, ServerConfig, StorageConfig};
use leakdex::models::truncate_value;
use leakdex::normalize::normalize_value;
use leakdex::progress::NoProgress;
use leakdex::{datasets, db, format, ingest, jobs, migrate, search};

const TEST_KEY: [u8; 32] = *b"0123456789abcdef0123456789abcdef";

fn test_config(root: &Path) -> Config {
    Config {
        db: DbConfig {
            path: root.join("data/leakdex.sqlite"),
        },
        storage: StorageConfig {
            dir: root.join("data/uploads"),
        },
        encryption: EncryptionConfig {
            key: Some(hex::encode(TEST_KEY)),
            passphrase: None,
        },
        ingest: IngestConfig::default(),
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
    }
}

async fn setup() -> (TempDir, Config, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations_on(&pool).await.unwrap();
    (tmp, config, pool)
}

fn write_csv(root: &Path, name: &str, body: &str) -> PathBuf {
    let path = root.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

async fn write_sqlite_dump(root: &Path, name: &str) -> PathBuf {
    let path = root.join(name);
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .unwrap()
        .create_if_missing(true);
    let dump = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    sqlx::query("CREATE TABLE users (email TEXT, phone TEXT, age INTEGER)")
        .execute(&dump)
        .await
        .unwrap();
    sqlx::query("INSERT INTO users VALUES ('a@b.com', '89111411123', 33)")
        .execute(&dump)
        .await
        .unwrap();
    sqlx::query("INSERT INTO users VALUES ('c@d.com', NULL, 44)")
        .execute(&dump)
        .await
        .unwrap();

    dump.close().await;
    path
}

async fn data_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM data")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn csv_ingestion_indexes_every_nonempty_cell() {
    let (tmp, config, pool) = setup().await;
    let csv = write_csv(
        tmp.path(),
        "dump.csv",
        "email,phone,city\na@b.com,89111411123,Moscow\nc@d.com,,\n",
    );

    let dataset = datasets::register(&pool, &config, "leak-a", &csv, None, true)
        .await
        .unwrap();
    ingest::run_ingestion(&pool, &config, dataset.id, &NoProgress)
        .await
        .unwrap();

    // Four non-empty cells across two data rows.
    assert_eq!(data_count(&pool).await, 4);

    let dataset = datasets::get_by_id(&pool, dataset.id).await.unwrap().unwrap();
    assert!(dataset.is_encrypted);
    assert!(dataset.searchable());
}

#[tokio::test]
async fn sqlite_ingestion_encrypts_text_cells_only() {
    let (tmp, config, pool) = setup().await;
    let dump = write_sqlite_dump(tmp.path(), "dump.sqlite").await;

    let dataset = datasets::register(&pool, &config, "leak-sql", &dump, None, true)
        .await
        .unwrap();
    ingest::run_ingestion(&pool, &config, dataset.id, &NoProgress)
        .await
        .unwrap();

    // Three TEXT cells (one phone is NULL); the INTEGER column is skipped.
    assert_eq!(data_count(&pool).await, 3);

    // The stored file itself was rewritten in place with ciphertext.
    let cipher = CellCipher::new(TEST_KEY);
    let stored = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::from_str(&format!(
                "sqlite:{}",
                config.storage.dir.join("leak-sql.sqlite").display()
            ))
            .unwrap()
            .create_if_missing(false),
        )
        .await
        .unwrap();
    let email: String = sqlx::query_scalar("SELECT email FROM users WHERE rowid = 1")
        .fetch_one(&stored)
        .await
        .unwrap();
    assert_eq!(email, cipher.encrypt("a@b.com"));
    let age: i64 = sqlx::query_scalar("SELECT age FROM users WHERE rowid = 1")
        .fetch_one(&stored)
        .await
        .unwrap();
    assert_eq!(age, 33);
    stored.close().await;
}

#[tokio::test]
async fn search_matches_across_formats_and_classifies() {
    let (tmp, config, pool) = setup().await;
    let csv = write_csv(
        tmp.path(),
        "dump.csv",
        "email,Телефон,Город,foo_bar\na@b.com,+7 (911) 141-11-23,Moscow,xyz\n",
    );
    let dump = write_sqlite_dump(tmp.path(), "dump.sqlite").await;

    for (name, path) in [("leak-csv", &csv), ("leak-sql", &dump)] {
        let dataset = datasets::register(&pool, &config, name, path, None, true)
            .await
            .unwrap();
        ingest::run_ingestion(&pool, &config, dataset.id, &NoProgress)
            .await
            .unwrap();
    }

    let cipher = CellCipher::new(TEST_KEY);

    // Both dumps stored the same phone in different spellings; one
    // normalized query hits both.
    let (_, reports) = search::execute(&pool, &cipher, "8 911 141 11 23").await.unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].database, "leak-csv");
    assert!(reports[0].data.critical.contains(&"phone_number".to_string()));
    assert!(reports[0].data.critical.contains(&"email".to_string()));
    assert_eq!(reports[0].data.medium, vec!["city"]);
    assert_eq!(reports[0].data.low, vec!["foo_bar"]);
    assert_eq!(reports[1].database, "leak-sql");

    // The probe is the truncated deterministic ciphertext of the
    // normalized query.
    let (probe, _) = search::execute(&pool, &cipher, "a@b.com").await.unwrap();
    assert_eq!(probe, truncate_value(&cipher.encrypt(&normalize_value("a@b.com"))));
}

#[tokio::test]
async fn search_excludes_inactive_and_unencrypted_datasets() {
    let (tmp, config, pool) = setup().await;
    let csv = write_csv(tmp.path(), "dump.csv", "email\na@b.com\n");

    let dataset = datasets::register(&pool, &config, "leak-a", &csv, None, false)
        .await
        .unwrap();
    ingest::run_ingestion(&pool, &config, dataset.id, &NoProgress)
        .await
        .unwrap();

    let cipher = CellCipher::new(TEST_KEY);

    // Encrypted but inactive: invisible even on an exact ciphertext match.
    let (_, reports) = search::execute(&pool, &cipher, "a@b.com").await.unwrap();
    assert!(reports.is_empty());

    datasets::set_active(&pool, "leak-a", true).await.unwrap();
    let (_, reports) = search::execute(&pool, &cipher, "a@b.com").await.unwrap();
    assert_eq!(reports.len(), 1);
}

#[tokio::test]
async fn no_match_is_empty_and_still_logged() {
    let (_tmp, _config, pool) = setup().await;
    let cipher = CellCipher::new(TEST_KEY);

    let reports = search::run_search(&pool, &cipher, "nonexistent-query-xyz", "alice")
        .await
        .unwrap();
    assert!(reports.is_empty());

    let entries = leakdex::history::list(&pool, Some("alice"), 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        cipher.decrypt(&entries[0].query).unwrap(),
        "nonexistent-query-xyz"
    );
}

#[tokio::test]
async fn empty_query_rejected_before_encryption() {
    let (_tmp, _config, pool) = setup().await;
    let cipher = CellCipher::new(TEST_KEY);
    assert!(search::execute(&pool, &cipher, "   ").await.is_err());
}

#[tokio::test]
async fn duplicate_index_rows_are_suppressed_on_retry() {
    let (tmp, config, pool) = setup().await;
    let csv = write_csv(tmp.path(), "dump.csv", "email\na@b.com\n");
    let dataset = datasets::register(&pool, &config, "leak-a", &csv, None, true)
        .await
        .unwrap();
    ingest::run_ingestion(&pool, &config, dataset.id, &NoProgress)
        .await
        .unwrap();
    let after_first = data_count(&pool).await;

    // Replaying the same batch through the sink hits the unique quadruple
    // and inserts nothing — the retry path in miniature.
    use leakdex::format::IndexSink;
    use leakdex::models::{IndexRecord, RowRef};
    let cipher = CellCipher::new(TEST_KEY);
    let sink = ingest::SqliteIndexSink::new(&pool);
    let record = IndexRecord {
        database_id: dataset.id,
        row: RowRef::CsvLine(1),
        column_name: "email".to_string(),
        value: truncate_value(&cipher.encrypt("a@b.com")).to_string(),
    };
    sink.insert_batch(&[record.clone(), record]).await.unwrap();
    assert_eq!(data_count(&pool).await, after_first);
}

#[tokio::test]
async fn failed_ingestion_records_error_and_stays_retryable() {
    let (tmp, config, pool) = setup().await;
    let garbage = tmp.path().join("broken.sqlite");
    std::fs::write(&garbage, b"this is not a database at all").unwrap();

    let dataset = datasets::register(&pool, &config, "broken", &garbage, None, true)
        .await
        .unwrap();
    let err = ingest::run_ingestion(&pool, &config, dataset.id, &NoProgress)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("broken"));

    let dataset = datasets::get_by_id(&pool, dataset.id).await.unwrap().unwrap();
    assert!(!dataset.is_encrypted);
    assert!(!dataset.encryption_started);
    assert!(dataset.last_error.is_some());

    // Pointing the dataset at a valid replacement file makes the retry
    // succeed from scratch.
    let csv = write_csv(tmp.path(), "fixed.csv", "email\na@b.com\n");
    let dataset = datasets::replace_file(&pool, &config, "broken", &csv)
        .await
        .unwrap();
    ingest::run_ingestion(&pool, &config, dataset.id, &NoProgress)
        .await
        .unwrap();
    let dataset = datasets::get_by_id(&pool, dataset.id).await.unwrap().unwrap();
    assert!(dataset.is_encrypted);
    assert!(dataset.last_error.is_none());
}

#[tokio::test]
async fn second_run_on_encrypted_dataset_is_refused() {
    let (tmp, config, pool) = setup().await;
    let csv = write_csv(tmp.path(), "dump.csv", "email\na@b.com\n");
    let dataset = datasets::register(&pool, &config, "leak-a", &csv, None, true)
        .await
        .unwrap();
    ingest::run_ingestion(&pool, &config, dataset.id, &NoProgress)
        .await
        .unwrap();

    let err = ingest::run_ingestion(&pool, &config, dataset.id, &NoProgress)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already encrypted"));
}

#[tokio::test]
async fn preview_works_before_and_after_encryption() {
    let (tmp, config, pool) = setup().await;
    let csv = write_csv(tmp.path(), "dump.csv", "email,city\na@b.com,Moscow\n");
    let dataset = datasets::register(&pool, &config, "leak-a", &csv, None, false)
        .await
        .unwrap();

    let handler = format::handler_for(Path::new(&dataset.file_path)).unwrap();
    let before = handler.read_preview(5).await.unwrap();
    assert_eq!(before[0].columns, vec!["email", "city"]);
    assert_eq!(before[0].rows[0][0], serde_json::json!("a@b.com"));

    ingest::run_ingestion(&pool, &config, dataset.id, &NoProgress)
        .await
        .unwrap();

    let after = handler.read_preview(5).await.unwrap();
    assert_eq!(after[0].columns, vec!["email", "city"]);
    assert_ne!(after[0].rows[0][0], serde_json::json!("a@b.com"));
}

#[tokio::test]
async fn background_job_reports_progress_and_completes() {
    let (tmp, config, pool) = setup().await;
    let csv = write_csv(tmp.path(), "dump.csv", "email\na@b.com\nc@d.com\n");
    let dataset = datasets::register(&pool, &config, "leak-a", &csv, None, true)
        .await
        .unwrap();

    let job_id = jobs::start(&pool, &config, dataset.id).await.unwrap();

    let mut status = jobs::status(&pool, &job_id).await.unwrap();
    for _ in 0..200 {
        if status.state == "done" || status.state == "failed" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        status = jobs::status(&pool, &job_id).await.unwrap();
    }
    assert_eq!(status.state, "done", "job did not finish: {:?}", status);
    assert_eq!(status.description, "encryption complete");

    let dataset = datasets::get_by_id(&pool, dataset.id).await.unwrap().unwrap();
    assert!(dataset.is_encrypted);
    assert_eq!(dataset.job_id.as_deref(), Some(job_id.as_str()));
}

#[tokio::test]
async fn unknown_job_id_reads_as_not_started() {
    let (_tmp, _config, pool) = setup().await;
    let status = jobs::status(&pool, "no-such-job").await.unwrap();
    assert_eq!(status.state, "pending");
    assert_eq!(status.description, "not started");
}
