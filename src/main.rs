//! bulkgres - A fast, resilient bulk data importer for PostgreSQL
//!
//! Operational entry point: liveness probing, pool diagnostics, and
//! newline-delimited-JSON imports. The actual logic is in the library
//! modules for better testability.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use bulkgres::config::{ConnectionConfig, load_settings};
use bulkgres::db::{PgConnector, Record};
use bulkgres::import::ImportEngine;
use bulkgres::pool::ConnectionPool;

#[derive(Parser)]
#[command(name = "bulkgres", version, about = "Bulk data importer for PostgreSQL")]
struct Cli {
    /// Connection URL (defaults to $DATABASE_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that a validated connection can be obtained
    Ping,
    /// Print pool diagnostics as JSON
    Status,
    /// Import newline-delimited JSON records into a table
    Import {
        /// Destination table name
        #[arg(long)]
        table: String,
        /// Path to the .ndjson file (one JSON object per line)
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bulkgres=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let connection = match cli.url {
        Some(url) => ConnectionConfig::from_url(&url)?,
        None => ConnectionConfig::from_env()
            .context("no --url given and DATABASE_URL is not set")?,
    };
    let settings = load_settings()?;

    let pool = ConnectionPool::new(PgConnector::new(connection), settings.pool).await;

    match cli.command {
        Command::Ping => {
            if pool.test_connection().await {
                println!("ok");
            } else {
                anyhow::bail!("connection test failed");
            }
        }
        Command::Status => {
            let status = pool.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Import { table, file } => {
            let records = read_ndjson(&file)
                .with_context(|| format!("failed to read records from {}", file.display()))?;
            let engine = ImportEngine::new(Arc::clone(&pool), settings.import, &settings.security);
            let report = engine.import_records(records, &table).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    pool.close().await;
    Ok(())
}

/// Read one record per line from a newline-delimited JSON file.
///
/// Blank lines are skipped; a non-object line is a hard error since it
/// cannot name its columns.
fn read_ndjson(path: &PathBuf) -> Result<Vec<Record>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);

    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid JSON", line_no + 1))?;
        let object = value
            .as_object()
            .with_context(|| format!("line {}: expected a JSON object", line_no + 1))?;
        records.push(Record::from_json_object(object));
    }
    Ok(records)
}
