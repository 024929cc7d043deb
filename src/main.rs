use clap::Parser;
use finguard::application::engine::PaymentEngine;
use finguard::config::EngineConfig;
use finguard::domain::ports::{PaymentStoreBox, StatusCacheBox};
use finguard::infrastructure::in_memory::{InMemoryPaymentStore, InMemoryStatusCache};
use finguard::infrastructure::notifier::LogNotifier;
use finguard::interfaces::batch::BatchRunner;
use finguard::interfaces::csv::command_reader::CommandReader;
use finguard::interfaces::csv::payment_writer::PaymentWriter;
use finguard::telemetry::init_tracing;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input CSV of lifecycle commands
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "FINGUARD_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Redis URL for the status cache (optional). Defaults to an in-process cache.
    #[arg(long, env = "FINGUARD_REDIS_URL")]
    redis_url: Option<String>,

    /// Expiry of cached statuses, in seconds
    #[arg(long, env = "FINGUARD_STATUS_TTL_SECS")]
    status_ttl_secs: Option<u64>,

    /// Log level for this crate when RUST_LOG is unset
    #[arg(long, env = "FINGUARD_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "FINGUARD_LOG_JSON")]
    log_json: bool,
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<PaymentStoreBox> {
    use finguard::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "using RocksDB payment store");
            Ok(Box::new(RocksDBStore::open(path).into_diagnostic()?))
        }
        None => Ok(Box::new(InMemoryPaymentStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<PaymentStoreBox> {
    if db_path.is_some() {
        tracing::warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
        );
    }
    Ok(Box::new(InMemoryPaymentStore::new()))
}

#[cfg(feature = "cache-redis")]
async fn open_cache(redis_url: Option<String>) -> Result<StatusCacheBox> {
    use finguard::infrastructure::redis::RedisStatusCache;

    match redis_url {
        Some(url) => Ok(Box::new(RedisStatusCache::connect(&url).await.into_diagnostic()?)),
        None => Ok(Box::new(InMemoryStatusCache::new())),
    }
}

#[cfg(not(feature = "cache-redis"))]
async fn open_cache(redis_url: Option<String>) -> Result<StatusCacheBox> {
    if redis_url.is_some() {
        tracing::warn!(
            "Redis cache requested via --redis-url, but 'cache-redis' feature is not enabled. Falling back to in-memory cache."
        );
    }
    Ok(Box::new(InMemoryStatusCache::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let store = open_store(cli.db_path)?;
    let cache = open_cache(cli.redis_url).await?;
    let config =
        EngineConfig::default().with_status_ttl(cli.status_ttl_secs.map(Duration::from_secs));

    let engine = PaymentEngine::new(store, cache)
        .with_config(config)
        .with_notifier(Arc::new(LogNotifier));
    let mut runner = BatchRunner::new(engine);

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for (index, command) in reader.commands().enumerate() {
        // header is line 1
        let line = index + 2;
        match command {
            Ok(command) => {
                if let Err(e) = runner.apply(command).await {
                    error!(line, kind = ?e.kind(), "Command rejected: {e}");
                }
            }
            Err(e) => {
                error!(line, "Error reading command: {e}");
            }
        }
    }

    let payments = runner.engine().all_payments().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_payments(payments).into_diagnostic()?;

    Ok(())
}
