//! listing-ingest: binary entrypoint.
//! Runs batches of identifiers through the source pipeline, replays stored
//! snapshots and dumps them. Records go to stdout as JSON lines, logs to stderr.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use listing_ingest::config::{load_config_default, load_config_from, PipelineConfig};
use listing_ingest::ingest::normalize::{Normalizer, CURRENT_SCHEMA_VERSION};
use listing_ingest::ingest::providers::{build_adapters, default_http_client};
use listing_ingest::ingest::sink::PrometheusSink;
use listing_ingest::ingest::snapshot::{JsonlSnapshotStore, SnapshotFilter, SnapshotStore};
use listing_ingest::ingest::{BatchFetcher, Orchestrator};
use listing_ingest::metrics::Metrics;

#[derive(Parser)]
#[command(name = "listing-ingest")]
#[command(about = "Fetch, validate and normalize App Store listing metadata")]
#[command(version)]
struct Cli {
    /// Pipeline config (TOML or JSON). Defaults to $INGEST_CONFIG_PATH, then config/ingest.{toml,json}
    #[arg(long)]
    config: Option<PathBuf>,

    /// Snapshot JSONL file
    #[arg(long, default_value = "state/snapshots.jsonl")]
    snapshots: PathBuf,

    /// Serve /metrics and /health on this address while running
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve identifiers and print one JSON line per identifier
    Fetch {
        /// App Store ids or search terms
        ids: Vec<String>,

        /// File with one identifier per line (`#` starts a comment)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Re-derive records from stored snapshots of one source
    Reprocess {
        /// Adapter name, e.g. itunes-lookup
        source: String,

        /// Only snapshots recorded at or after this RFC 3339 instant
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Schema version stamped on the derived records
        #[arg(long, default_value_t = CURRENT_SCHEMA_VERSION)]
        schema_version: u32,
    },

    /// Print stored snapshots
    Snapshots {
        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        identifier: Option<String>,

        /// Newest N only
        #[arg(long)]
        limit: Option<usize>,
    },
}

/// Compact logs by default, JSON when `LOG_FORMAT=json`. Filter via `RUST_LOG`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("listing_ingest=info,ingest=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(p) => load_config_from(p),
        None => load_config_default(),
    }
}

fn read_identifiers(args: Vec<String>, file: Option<&Path>) -> Result<Vec<String>> {
    let mut ids = args;
    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading identifiers from {}", path.display()))?;
        ids.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }
    Ok(ids)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

async fn serve_metrics(addr: SocketAddr, orchestrator: Option<Arc<Orchestrator>>) -> Result<()> {
    let metrics = Metrics::init()?;
    let app = metrics.router(orchestrator);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics listener on {addr}"))?;
    tracing::info!(%addr, "metrics endpoint listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = ?e, "metrics server stopped");
        }
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;
    let store: Arc<dyn SnapshotStore> = Arc::new(JsonlSnapshotStore::new(&cli.snapshots));

    let client = default_http_client()?;
    let adapters = build_adapters(&cfg, client)?;
    let orchestrator = Arc::new(
        Orchestrator::from_config(&cfg, adapters, Arc::clone(&store))
            .with_sink(Arc::new(PrometheusSink)),
    );

    if let Some(addr) = cli.metrics_addr {
        serve_metrics(addr, Some(Arc::clone(&orchestrator))).await?;
    }

    match cli.command {
        Commands::Fetch { ids, file } => {
            let ids = read_identifiers(ids, file.as_deref())?;
            if ids.is_empty() {
                anyhow::bail!("no identifiers given");
            }
            let fetcher = BatchFetcher::from_config(Arc::clone(&orchestrator), &cfg);
            let results = fetcher.fetch_batch(&ids).await;

            let mut failed = 0usize;
            let mut printed = std::collections::HashSet::new();
            for id in ids.iter().map(|s| s.trim()) {
                if !printed.insert(id) {
                    continue;
                }
                let Some(res) = results.get(id) else { continue };
                let line = match res {
                    Ok(record) => serde_json::json!({ "identifier": id, "ok": true, "record": record }),
                    Err(e) => {
                        failed += 1;
                        serde_json::json!({ "identifier": id, "ok": false, "error": e, "message": e.to_string() })
                    }
                };
                print_json(&line)?;
            }
            tracing::info!(
                target: "ingest",
                total = results.len(),
                failed,
                "batch finished"
            );
            for h in orchestrator.health() {
                tracing::info!(
                    target: "ingest",
                    source = %h.adapter,
                    success_rate = h.success_rate,
                    attempts = h.attempts,
                    consecutive_failures = h.consecutive_failures,
                    "adapter health"
                );
            }
        }
        Commands::Reprocess {
            source,
            since,
            schema_version,
        } => {
            let normalizer = Normalizer::new(schema_version);
            let report = orchestrator.reprocess(&source, since, &normalizer).await?;
            for d in &report.derived {
                print_json(d)?;
            }
        }
        Commands::Snapshots {
            source,
            identifier,
            limit,
        } => {
            let filter = SnapshotFilter {
                source,
                identifier,
                limit,
                ..Default::default()
            };
            for s in store.query(&filter).await? {
                print_json(&s)?;
            }
        }
    }
    Ok(())
}
