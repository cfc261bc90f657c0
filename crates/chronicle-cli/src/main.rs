//! Chronicle operator CLI
//!
//! The `chronicle` command inspects and maintains a file-backed memory store.
//!
//! ## Commands
//!
//! - `stats`: Counts and aggregate state hash of the active set
//! - `get`: Print one active record by id
//! - `prune`: Run a retention pass at a given instant
//! - `check`: Compare an expected state hash against the store
//! - `verify`: Re-hash every active payload
//! - `config`: Print the effective configuration as TOML

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};

use chronicle_core::{
    IndexError, MemoryStore, Neighbor, RecordId, SimilarityIndex, StateHash, StoreConfig,
};

#[derive(Parser)]
#[command(name = "chronicle")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and maintain a Chronicle memory store", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Path to the record log
    #[arg(
        long,
        global = true,
        env = "CHRONICLE_LOG",
        default_value = ".chronicle/records.jsonl"
    )]
    log: PathBuf,

    /// TOML config file (defaults plus CHRONICLE_* overrides when omitted)
    #[arg(long, global = true, env = "CHRONICLE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show active/expired/stale counts and the state hash
    Stats,

    /// Print an active record as JSON
    Get {
        /// Record id
        id: String,
    },

    /// Expire and purge records at the given instant
    Prune {
        /// RFC 3339 timestamp or unix seconds (default: now)
        #[arg(long)]
        now: Option<String>,
    },

    /// Check whether a cached derivative built at `expected` is stale
    Check {
        /// Aggregate state hash the caller last saw
        #[arg(long)]
        expected: String,
    },

    /// Re-hash every active payload and report mismatches
    Verify,

    /// Print the effective configuration
    Config,
}

/// The operator CLI never runs similarity lookups.
struct NoIndex;

#[async_trait]
impl SimilarityIndex for NoIndex {
    async fn nearest(
        &self,
        _vector: &[f32],
        _k: usize,
        _active_ids: &HashSet<RecordId>,
    ) -> Result<Vec<Neighbor>, IndexError> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    chronicle_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => cmd_config(&config),
        command => {
            let store = open_store(config, &cli.log)?;
            let _span = chronicle_core::obs::StoreSpan::enter(&cli.log.display().to_string());
            match command {
                Commands::Stats => cmd_stats(&store).await,
                Commands::Get { id } => cmd_get(&store, &id).await,
                Commands::Prune { now } => cmd_prune(&store, now.as_deref()).await,
                Commands::Check { expected } => cmd_check(&store, &expected).await,
                Commands::Verify => cmd_verify(&store).await,
                Commands::Config => cmd_config(store.config()),
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<StoreConfig> {
    let config = match path {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
            .with_env_overrides()?,
        None => StoreConfig::from_env()?,
    };
    Ok(config)
}

fn open_store(config: StoreConfig, log: &Path) -> Result<MemoryStore> {
    MemoryStore::open_file(config, log, Arc::new(NoIndex))
        .with_context(|| format!("Failed to open record log at {}", log.display()))
}

/// Accept RFC 3339 or integer unix seconds.
fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let secs: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("'{raw}' is neither RFC 3339 nor unix seconds"))?;
    match Utc.timestamp_opt(secs, 0).single() {
        Some(dt) => Ok(dt),
        None => bail!("timestamp out of range: {secs}"),
    }
}

async fn cmd_stats(store: &MemoryStore) -> Result<()> {
    let stats = store.stats().await;
    println!("active:     {}", stats.active);
    println!("expired:    {}", stats.expired);
    println!("stale:      {}", stats.stale);
    println!("superseded: {}", stats.superseded);
    println!("purged:     {}", stats.purged);
    println!("version:    {}", stats.version);
    println!("state hash: {}", stats.state_hash);
    Ok(())
}

async fn cmd_get(store: &MemoryStore, id: &str) -> Result<()> {
    let record = store
        .get(&RecordId::from(id))
        .await
        .with_context(|| format!("No active record '{id}'"))?;
    println!("{}", serde_json::to_string_pretty(&*record)?);
    Ok(())
}

async fn cmd_prune(store: &MemoryStore, now: Option<&str>) -> Result<()> {
    let now = match now {
        Some(raw) => parse_instant(raw)?,
        None => Utc::now(),
    };
    let stats = store.prune(now).await.context("Prune failed")?;
    info!(expired = stats.expired_count, purged = stats.purged_count, "prune finished");
    println!(
        "Pruned at {}: {} expired, {} purged",
        now.to_rfc3339(),
        stats.expired_count,
        stats.purged_count
    );
    Ok(())
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    stale: bool,
    expected: &'a str,
    current_hash: &'a str,
}

async fn cmd_check(store: &MemoryStore, expected: &str) -> Result<()> {
    let report = store.check(&StateHash::from(expected)).await;
    let out = CheckOutput {
        stale: report.stale,
        expected,
        current_hash: report.current_hash.as_str(),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn cmd_verify(store: &MemoryStore) -> Result<()> {
    let report = store.verify_integrity().await;
    if report.mismatched.is_empty() {
        println!("{} records verified, no mismatches", report.checked);
        return Ok(());
    }
    for id in &report.mismatched {
        println!("mismatch: {id}");
    }
    bail!(
        "{} of {} records failed content verification",
        report.mismatched.len(),
        report.checked
    )
}

fn cmd_config(config: &StoreConfig) -> Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}
