use std::sync::Arc;

use channel_relay::config::RelayConfig;
use channel_relay::pipeline::{FanoutRouter, IngestionHandler};
use channel_relay::platform::http::HttpPlatformGateway;
use channel_relay::services::{HttpClassifier, HttpImageGenerator, HttpRewriter};
use channel_relay::sessions::{ListenerRegistry, SessionManager, SessionMap};
use channel_relay::store::{DEFAULT_TOPICS, Database, LibSqlBackend};
use channel_relay::worker::WorkerPool;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = RelayConfig::from_env()?;

    eprintln!("📡 channel-relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Sessions: {}", config.sessions_dir.display());
    eprintln!("   Platform bridge: {}", config.platform_url);

    // ── Database ────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);
    db.seed_topics(DEFAULT_TOPICS).await?;

    // ── External-service adapters ───────────────────────────────────
    let pool = WorkerPool::new(config.worker_pool_size);
    let classifier = Arc::new(HttpClassifier::new(
        config.classifier_url.clone(),
        config.http_timeout,
    )?);
    let rewriter = Arc::new(HttpRewriter::new(
        config.rewrite_url.clone(),
        config.http_timeout,
    )?);
    let images = Arc::new(HttpImageGenerator::new(
        config.image_url.clone(),
        config.image_api_key.clone(),
        config.image_api_secret.clone(),
        config.image.clone(),
        config.http_timeout,
    )?);

    // ── Pipeline ────────────────────────────────────────────────────
    let sessions = SessionMap::new();
    let router = Arc::new(FanoutRouter::new(
        Arc::clone(&db),
        sessions.clone(),
        rewriter,
        images,
        pool.clone(),
    ));
    let ingestion = Arc::new(IngestionHandler::new(
        Arc::clone(&db),
        classifier,
        router,
        pool,
    ));

    // ── Sessions ────────────────────────────────────────────────────
    let registry = Arc::new(ListenerRegistry::new(ingestion.event_handler()));
    let gateway = Arc::new(HttpPlatformGateway::new(
        config.platform_url.clone(),
        config.http_timeout,
    )?);
    let manager = Arc::new(SessionManager::new(
        Arc::clone(&db),
        gateway,
        registry,
        sessions,
        config.sessions_dir.clone(),
    ));

    // Resume every account whose session artifact survived the restart.
    manager.recover_all().await;

    info!("channel-relay running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    Ok(())
}
