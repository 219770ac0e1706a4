use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketmind::ai::AiClient;
use marketmind::api::{self, AppState};
use marketmind::assembler::ContextAssembler;
use marketmind::cache::SnapshotCache;
use marketmind::chat::ChatService;
use marketmind::config::Config;
use marketmind::db::Database;
use marketmind::market::MarketFetcher;
use marketmind::scheduler::{Scheduler, SchedulerConfig};
use marketmind::store::Store;

#[derive(Parser, Debug)]
#[command(name = "marketmind", about = "AI trading advisor backend")]
struct Cli {
    /// Bind address override
    #[arg(long)]
    host: Option<String>,

    /// Port override
    #[arg(long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first
    let mut config = Config::load()?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    // Initialize tracing with structured JSON logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "marketmind starting up");

    // Initialize database
    let db = Database::new(&config.database.path, config.database.max_connections).await?;
    db.run_migrations().await?;
    db.health_check().await?;

    info!("Database initialized successfully");

    let store = Arc::new(Store::new(db.pool.clone()));
    let cache = Arc::new(SnapshotCache::new());

    // Serve last durable snapshots (stale-flagged) until the first
    // scheduled refresh lands.
    for spec in &config.market.datasets {
        match store.latest_snapshot(&spec.id).await {
            Ok(Some(snapshot)) => {
                info!(dataset = %spec.id, fetched_at = %snapshot.fetched_at, "Warmed cache from audit trail");
                cache.put(snapshot, spec.ttl);
            }
            Ok(None) => {}
            Err(e) => warn!(dataset = %spec.id, error = %e, "Could not warm cache from audit trail"),
        }
    }

    let fetcher = Arc::new(MarketFetcher::new(&config.market)?);
    let scheduler = Scheduler::start(
        config.market.datasets.clone(),
        fetcher,
        Arc::clone(&cache),
        Arc::clone(&store),
        SchedulerConfig {
            jitter_fraction: config.market.jitter_fraction,
            failure_threshold: config.market.failure_threshold,
            backoff_factor: config.market.backoff_factor,
            max_backoff_mult: config.market.max_backoff_mult,
        },
    );

    let ai = Arc::new(AiClient::new(&config.ai)?);
    let assembler = Arc::new(ContextAssembler::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        config.market.datasets.clone(),
        config.chat.history_limit,
    ));
    let chat = Arc::new(ChatService::new(Arc::clone(&store), assembler, ai));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        config: Arc::new(config),
        store,
        cache,
        chat,
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // In-flight refresh jobs get a grace period, then are aborted.
    scheduler.shutdown(Duration::from_secs(10)).await;
    db.close().await;

    info!("marketmind stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to listen for shutdown signal");
    }
}
