//! StatusWatch - service availability monitor.

use statuswatch::config::{ConfigLoader, ConfigSnapshot, FileConfigLoader, ServerConfig};
use statuswatch::db::Store;
use statuswatch::notify::LogNotifier;
use statuswatch::probe::HttpProber;
use statuswatch::registry::TargetRegistry;
use statuswatch::scheduler::Scheduler;
use statuswatch::web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("statuswatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting StatusWatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    let loader = Arc::new(FileConfigLoader::new(&cfg.config_path));
    let snapshot = loader.load().unwrap_or_else(|e| {
        tracing::error!("Failed to load {}: {}; starting with no services", cfg.config_path, e);
        ConfigSnapshot::default()
    });

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let registry = Arc::new(TargetRegistry::new(snapshot));

    // Create and start scheduler
    let scheduler = Arc::new(Scheduler::new(
        registry.clone(),
        store.clone(),
        loader,
        Arc::new(HttpProber::new()?),
        Arc::new(LogNotifier),
        cfg.watch_interval,
    ));
    scheduler.start();

    // Start web server
    let server = Server::new(cfg, store, registry);
    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down");
        }
    }

    scheduler.shutdown().await;
    Ok(())
}
