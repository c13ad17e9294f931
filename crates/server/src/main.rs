//! Sextant server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use sextant_core::config::{AppConfig, MetadataConfig};
use sextant_server::{AppState, create_router, gc, lifecycle};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sextant - catalog and streaming server for multi-sensor recordings
#[derive(Parser, Debug)]
#[command(name = "sextantd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "SEXTANT_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,

    /// Bind address, overriding `server.bind`
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sextant=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Sextant v{}", env!("CARGO_PKG_VERSION"));

    // Defaults, then the optional file, then SEXTANT_* variables
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
    if std::path::Path::new(&args.config).exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }
    let mut config: AppConfig = figment
        .merge(Env::prefixed("SEXTANT_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    // Register Prometheus metrics
    sextant_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // Initialize storage backend
    let storage = sextant_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend ready");

    // Initialize metadata store
    let metadata = sextant_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    let MetadataConfig::Sqlite { path, .. } = &config.metadata;
    tracing::info!(path = %path.display(), "Metadata store initialized");

    let state = AppState::new(config.clone(), storage, metadata);

    // Finish aborts interrupted by a previous shutdown
    let purged = lifecycle::purge_aborted(&state)
        .await
        .context("failed to purge aborted sequences")?;
    if purged > 0 {
        tracing::info!(purged, "Purged sequences left in aborted state");
    }

    // Collect prefixes tombstoned before the last shutdown
    gc::spawn_sweep(state.clone());

    if config.gc.auto_schedule_enabled {
        gc::spawn_scheduler(state.clone());
    } else {
        tracing::info!("Automatic GC scheduling disabled");
    }

    // Create router
    let app = create_router(state);

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
