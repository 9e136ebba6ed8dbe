//! # Leakdex CLI (`ldx`)
//!
//! The `ldx` binary is the primary interface for Leakdex. It provides
//! commands for store initialization, dataset registration and ingestion,
//! equality search, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! ldx --config ./config/ldx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ldx init` | Create the SQLite store and run schema migrations |
//! | `ldx add <name> <file>` | Register a dump and encrypt it inline |
//! | `ldx ingest <name>` | (Re)run ingestion for a registered dataset |
//! | `ldx list` | List datasets and their lifecycle state |
//! | `ldx preview <name>` | Show the first rows of the stored file |
//! | `ldx activate <name>` | Include (or `--off`, exclude) a dataset in search |
//! | `ldx remove <name>` | Delete a dataset, its index rows, and its file |
//! | `ldx replace <name> <file>` | Swap in a new file version and re-ingest |
//! | `ldx search "<query>"` | Search the encrypted corpus by equality |
//! | `ldx history` | Show recent query history |
//! | `ldx serve` | Start the JSON HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the store
//! ldx init --config ./config/ldx.toml
//!
//! # Register a CSV dump, encrypt it, and make it searchable
//! ldx add collection-x ./dumps/collection-x.csv --history "Forum leak, 2021" --activate
//!
//! # Search across every active dataset
//! ldx search "+7 (911) 141-11-23"
//! ```

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use leakdex::cipher::CellCipher;
use leakdex::progress::ProgressMode;
use leakdex::{config, datasets, db, format, history, ingest, migrate, search, server};

/// Leakdex CLI — a per-cell encryption and equality-search engine for
/// ingested leak datasets.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ldx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ldx",
    about = "Leakdex — a per-cell encryption and equality-search engine for leak datasets",
    version,
    long_about = "Leakdex ingests third-party data dumps (SQLite or CSV), deterministically \
    encrypts every textual cell, indexes the ciphertexts for equality search, and answers \
    plaintext queries without ever decrypting the stored corpus."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ldx.toml`. Database, storage, encryption-key,
    /// and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/ldx.toml")]
    config: PathBuf,

    /// Progress output on stderr: `off`, `human`, or `json`.
    /// Defaults to `human` when stderr is a TTY, otherwise `off`.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the store schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (managed_databases, data, ingest_jobs, query_history).
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Register a dump file and encrypt it inline.
    ///
    /// Copies the file into the storage directory, registers it under the
    /// given name, then runs the full ingestion with progress on stderr.
    Add {
        /// Unique dataset name.
        name: String,

        /// Path to the source dump (`.sqlite`, `.db`, or `.csv`).
        file: PathBuf,

        /// Short note about the leak (at most 500 characters).
        #[arg(long)]
        history: Option<String>,

        /// Make the dataset searchable as soon as encryption completes.
        #[arg(long)]
        activate: bool,
    },

    /// (Re)run ingestion for a registered dataset.
    ///
    /// Used to retry after a failed run. Re-processing is safe: the index's
    /// unique constraint prevents duplicate entries.
    Ingest {
        /// Dataset name.
        name: String,
    },

    /// List registered datasets and their lifecycle state.
    List,

    /// Show the first rows of a dataset's stored file.
    ///
    /// Works whether or not the dataset has been encrypted yet.
    Preview {
        /// Dataset name.
        name: String,

        /// Number of rows per table.
        #[arg(long)]
        rows: Option<u32>,
    },

    /// Include a dataset in search (or exclude it with `--off`).
    Activate {
        /// Dataset name.
        name: String,

        /// Exclude the dataset from search instead.
        #[arg(long)]
        off: bool,
    },

    /// Delete a dataset, its index rows, and its stored file.
    Remove {
        /// Dataset name.
        name: String,
    },

    /// Replace a dataset's file with a new version.
    ///
    /// Drops the old index rows, resets the encryption state, and runs
    /// ingestion over the replacement file.
    Replace {
        /// Dataset name.
        name: String,

        /// Path to the replacement dump (`.sqlite`, `.db`, or `.csv`).
        file: PathBuf,
    },

    /// Search the encrypted corpus.
    ///
    /// The query is normalized (phone/email canonicalization), encrypted
    /// with the deterministic cipher, and matched by equality across every
    /// active, fully-encrypted dataset.
    Search {
        /// The search query (an email, phone number, name, ...).
        query: String,

        /// User identity recorded in the query history.
        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// Show recent query history.
    History {
        /// Only this user's queries.
        #[arg(long)]
        user: Option<String>,

        /// Maximum entries to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Start the JSON HTTP server.
    ///
    /// Binds to the address configured in `[server].bind`. Registrations
    /// made over HTTP are ingested by background jobs with polled progress.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let progress_mode = match cli.progress.as_deref() {
        None => ProgressMode::default_for_tty(),
        Some("off") => ProgressMode::Off,
        Some("human") => ProgressMode::Human,
        Some("json") => ProgressMode::Json,
        Some(other) => bail!("Unknown progress mode: {}. Use off, human, or json.", other),
    };

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Store initialized successfully.");
        }
        Commands::Add {
            name,
            file,
            history,
            activate,
        } => {
            let pool = db::connect(&cfg).await?;
            let dataset =
                datasets::register(&pool, &cfg, &name, &file, history.as_deref(), activate).await?;
            let reporter = progress_mode.reporter(&dataset.name);
            ingest::run_ingestion(&pool, &cfg, dataset.id, reporter.as_ref()).await?;

            println!("add {}", dataset.name);
            println!("  stored: {}", dataset.file_path);
            println!("  encrypted: yes");
            println!("  active: {}", if activate { "yes" } else { "no" });
            println!("ok");
            pool.close().await;
        }
        Commands::Ingest { name } => {
            let pool = db::connect(&cfg).await?;
            let dataset = match datasets::get_by_name(&pool, &name).await? {
                Some(dataset) => dataset,
                None => bail!("no dataset named '{}'", name),
            };
            let reporter = progress_mode.reporter(&dataset.name);
            ingest::run_ingestion(&pool, &cfg, dataset.id, reporter.as_ref()).await?;
            println!("ingest {}", dataset.name);
            println!("ok");
            pool.close().await;
        }
        Commands::List => {
            let pool = db::connect(&cfg).await?;
            let all = datasets::list(&pool).await?;
            println!("{:<24} {:<8} {:<12} STATE", "NAME", "ACTIVE", "ENCRYPTED");
            for dataset in &all {
                let state = if dataset.is_encrypted {
                    "encrypted"
                } else if dataset.encryption_started {
                    "encrypting"
                } else if dataset.last_error.is_some() {
                    "failed"
                } else {
                    "uploaded"
                };
                println!(
                    "{:<24} {:<8} {:<12} {}",
                    dataset.name,
                    if dataset.active { "yes" } else { "no" },
                    if dataset.is_encrypted { "yes" } else { "no" },
                    state
                );
                if let Some(err) = &dataset.last_error {
                    println!("    last error: {}", err);
                }
            }
            pool.close().await;
        }
        Commands::Preview { name, rows } => {
            let pool = db::connect(&cfg).await?;
            let dataset = match datasets::get_by_name(&pool, &name).await? {
                Some(dataset) => dataset,
                None => bail!("no dataset named '{}'", name),
            };
            let n = rows.unwrap_or(cfg.ingest.preview_rows);
            let handler = format::handler_for(std::path::Path::new(&dataset.file_path))?;
            for table in handler.read_preview(n).await? {
                println!("table {}", table.name);
                println!("  columns: {}", table.columns.join(", "));
                for row in &table.rows {
                    let cells: Vec<String> = row.iter().map(cell_display).collect();
                    println!("  {}", cells.join(", "));
                }
            }
            pool.close().await;
        }
        Commands::Activate { name, off } => {
            let pool = db::connect(&cfg).await?;
            let dataset = datasets::set_active(&pool, &name, !off).await?;
            println!(
                "{} is now {}",
                dataset.name,
                if dataset.active { "active" } else { "inactive" }
            );
            pool.close().await;
        }
        Commands::Remove { name } => {
            let pool = db::connect(&cfg).await?;
            datasets::remove(&pool, &name).await?;
            println!("removed {}", name);
            pool.close().await;
        }
        Commands::Replace { name, file } => {
            let pool = db::connect(&cfg).await?;
            let dataset = datasets::replace_file(&pool, &cfg, &name, &file).await?;
            let reporter = progress_mode.reporter(&dataset.name);
            ingest::run_ingestion(&pool, &cfg, dataset.id, reporter.as_ref()).await?;
            println!("replace {}", dataset.name);
            println!("ok");
            pool.close().await;
        }
        Commands::Search { query, user } => {
            let pool = db::connect(&cfg).await?;
            let cipher = CellCipher::new(cfg.encryption.key_bytes()?);
            let results = search::run_search(&pool, &cipher, &query, &user).await?;

            if results.is_empty() {
                println!("No results.");
            } else {
                for (i, report) in results.iter().enumerate() {
                    println!("{}. {}", i + 1, report.database);
                    if let Some(note) = &report.history {
                        println!("    history: {}", note);
                    }
                    print_tier("critical", &report.data.critical);
                    print_tier("medium", &report.data.medium);
                    print_tier("low", &report.data.low);
                    println!();
                }
            }
            pool.close().await;
        }
        Commands::History { user, limit } => {
            let pool = db::connect(&cfg).await?;
            let cipher = CellCipher::new(cfg.encryption.key_bytes()?);
            for entry in history::list(&pool, user.as_deref(), limit).await? {
                let date = chrono::DateTime::from_timestamp(entry.created_at, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                // Truncated ciphertexts fail to decrypt; show them as stored.
                let shown = cipher
                    .decrypt(&entry.query)
                    .unwrap_or_else(|_| entry.query.clone());
                let hits = entry.result.as_array().map(|a| a.len()).unwrap_or(0);
                println!("{}  {:<12} {}  ({} datasets)", date, entry.user, shown, hits);
            }
            pool.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn print_tier(label: &str, columns: &[String]) {
    if !columns.is_empty() {
        println!("    {}: {}", label, columns.join(", "));
    }
}

fn cell_display(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}
