//! Siphon - Cosmos chain indexer.
//!
//! # Usage
//!
//! ```bash
//! # Index a chain from block 1, following the tip
//! siphon --chain-id cosmoshub-4 --chain-name cosmoshub \
//!     --rpc-url http://localhost:26657 \
//!     --database-url postgres://localhost/siphon
//!
//! # Bounded backfill
//! siphon --chain-id cosmoshub-4 --chain-name cosmoshub \
//!     --start-block 1000000 --end-block 1100000
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use siphon_core::metrics::init_metrics;
use siphon_core::pipeline::{IndexerConfig, PipelineBuilder};
use siphon_parsers::{
    BankTransferParser, UnbondingCompleteParser, COMPLETE_UNBONDING_EVENT_TYPE, MSG_SEND_TYPE_URL,
};
use siphon_rpc::{HttpNodeClient, NodeClientConfig};
use siphon_storage::{Database, DatabaseConfig, PgStore};

/// Siphon CLI - Cosmos chain indexer.
#[derive(Parser, Debug)]
#[command(name = "siphon")]
#[command(about = "Siphon - drains a Cosmos chain into PostgreSQL")]
#[command(version)]
struct Cli {
    /// CometBFT node RPC URL.
    #[arg(long, env = "RPC_URL", default_value = "http://127.0.0.1:26657")]
    rpc_url: String,

    /// PostgreSQL database URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost/siphon"
    )]
    database_url: String,

    /// Chain identifier (e.g. "cosmoshub-4").
    #[arg(long, env = "CHAIN_ID")]
    chain_id: String,

    /// Human-readable chain name.
    #[arg(long, env = "CHAIN_NAME")]
    chain_name: String,

    /// Bech32 account prefix of the chain.
    #[arg(long, env = "ACCOUNT_PREFIX", default_value = "cosmos")]
    account_prefix: String,

    /// First block to index (0 is coerced to 1).
    #[arg(long, env = "START_BLOCK", default_value_t = 1)]
    start_block: u64,

    /// Last block to index; omit to follow the chain tip.
    #[arg(long, env = "END_BLOCK")]
    end_block: Option<u64>,

    /// Number of parallel RPC workers (clamped to 1-64).
    #[arg(long, env = "RPC_WORKERS", default_value_t = 4)]
    rpc_workers: usize,

    /// Reindex only heights that contained this message type.
    #[arg(long, env = "REINDEX_MESSAGE_TYPE")]
    reindex_message_type: Option<String>,

    /// Read heights from this newline-delimited file.
    #[arg(long, env = "BLOCK_INPUT_FILE")]
    block_input_file: Option<PathBuf>,

    /// JSON filter file merged with built-in filter registrations.
    #[arg(long, env = "FILTER_FILE")]
    filter_file: Option<PathBuf>,

    /// Wait for the node to finish catching up before indexing.
    #[arg(long, env = "WAIT_FOR_CHAIN")]
    wait_for_chain: bool,

    /// Seconds between catch-up status probes.
    #[arg(long, env = "WAIT_FOR_CHAIN_DELAY", default_value_t = 10)]
    wait_for_chain_delay: u64,

    /// Exit once the chain tip is reached instead of following it.
    #[arg(long, env = "EXIT_WHEN_CAUGHT_UP")]
    exit_when_caught_up: bool,

    /// Seconds between tip polls when following the chain.
    #[arg(long, env = "TIP_POLL_INTERVAL", default_value_t = 10)]
    tip_poll_interval: u64,

    /// Run the full pipeline without writing to the store.
    #[arg(long, env = "DRY")]
    dry: bool,

    /// Log throughput every N blocks; 0 disables.
    #[arg(long, env = "BLOCK_TIMER", default_value_t = 0)]
    block_timer: u64,

    /// Index transactions.
    #[arg(long, env = "INDEX_TRANSACTIONS", default_value_t = true, action = clap::ArgAction::Set)]
    index_transactions: bool,

    /// Index begin/end block events.
    #[arg(long, env = "INDEX_BLOCK_EVENTS", default_value_t = true, action = clap::ArgAction::Set)]
    index_block_events: bool,

    /// Prometheus metrics port; 0 disables the exporter.
    #[arg(long, env = "METRICS_PORT", default_value_t = 9090)]
    metrics_port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long, env = "LOG_PATH")]
    log_path: Option<PathBuf>,

    /// Human-readable log output instead of JSON.
    #[arg(long, env = "LOG_PRETTY")]
    log_pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_path.as_deref(), cli.log_pretty)?;

    // Prometheus metrics exporter (optional - failures don't crash the app)
    if cli.metrics_port != 0 {
        match format!("0.0.0.0:{}", cli.metrics_port).parse::<std::net::SocketAddr>() {
            Ok(metrics_addr) => match PrometheusBuilder::new()
                .with_http_listener(metrics_addr)
                .install()
            {
                Ok(()) => init_metrics(),
                Err(e) => {
                    warn!("Failed to start metrics exporter: {e}. Continuing without metrics.")
                }
            },
            Err(e) => warn!("Invalid metrics address: {e}. Continuing without metrics."),
        }
    }

    info!("Starting siphon indexer");
    debug!(rpc_url = %cli.rpc_url, "Node endpoint");
    debug!(database_url = %redacted(&cli.database_url), "Database endpoint");

    let indexer_config = IndexerConfig {
        chain_id: cli.chain_id.clone(),
        chain_name: cli.chain_name.clone(),
        account_prefix: cli.account_prefix.clone(),
        start_block: cli.start_block,
        end_block: cli.end_block,
        rpc_workers: cli.rpc_workers,
        reindex_message_type: cli.reindex_message_type.clone(),
        block_input_file: cli.block_input_file.clone(),
        filter_file: cli.filter_file.clone(),
        wait_for_chain: cli.wait_for_chain,
        wait_for_chain_delay: Duration::from_secs(cli.wait_for_chain_delay),
        exit_when_caught_up: cli.exit_when_caught_up,
        tip_poll_interval: Duration::from_secs(cli.tip_poll_interval),
        dry_run: cli.dry,
        block_timer: cli.block_timer,
        index_transactions: cli.index_transactions,
        index_block_events: cli.index_block_events,
    };

    info!("Connecting to database...");
    let db_config = DatabaseConfig::for_indexer(&cli.database_url);
    let db = Database::connect(&db_config)
        .await
        .context("Failed to connect to the database")?;
    db.migrate().await.context("Failed to run migrations")?;
    info!("Database ready (migrations applied)");

    let store = Arc::new(PgStore::new(&db));

    let node_config = NodeClientConfig {
        rpc_url: cli.rpc_url.clone(),
        account_prefix: cli.account_prefix.clone(),
        ..Default::default()
    };
    let client = Arc::new(
        HttpNodeClient::new(node_config).context("Failed to build the node client")?,
    );

    let pipeline = PipelineBuilder::new(indexer_config)
        .register_message_parser(MSG_SEND_TYPE_URL, Arc::new(BankTransferParser))
        .register_end_block_event_parser(
            COMPLETE_UNBONDING_EVENT_TYPE,
            Arc::new(UnbondingCompleteParser),
        )
        .build(client, store)
        .context("Pipeline setup failed")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        interrupted().await;
        warn!("Interrupt received, draining in-flight work");
        let _ = shutdown_tx.send(true);
    });

    let result = pipeline.run(shutdown_rx).await;
    db.close().await;

    let stats = result.context("Indexing failed")?;
    info!(
        blocks = stats.blocks_processed,
        writes = stats.db_writes,
        reattempts = stats.db_reattempts,
        "Indexing complete"
    );
    Ok(())
}

/// Initialize tracing subscriber.
fn init_tracing(level: &str, path: Option<&std::path::Path>, pretty: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let writer = std::sync::Mutex::new(file);
            if pretty {
                fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .init();
            } else {
                fmt().with_env_filter(filter).json().with_writer(writer).init();
            }
        }
        None => {
            if pretty {
                fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .init();
            } else {
                fmt().with_env_filter(filter).json().init();
            }
        }
    }

    Ok(())
}

/// Database URL with any password replaced, safe to log.
fn redacted(url_str: &str) -> String {
    let Ok(mut url) = url::Url::parse(url_str) else {
        return url_str.to_string();
    };
    if url.password().is_some() {
        let _ = url.set_password(Some("[redacted]"));
    }
    url.to_string()
}

/// Completes on SIGINT, and also on SIGTERM where that exists.
async fn interrupted() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            // SIGINT alone still gives an exit path
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
