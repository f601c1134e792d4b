//! calyx-id - Flower Identification Service
//!
//! Serves the identification API, or runs one of the maintenance jobs
//! (embedding backfill, species import) against the same database.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use calyx_common::config::{CompiledDefaults, RootFolderInitializer, RootFolderResolver, TomlConfig};
use calyx_id::config::ServiceConfig;
use calyx_id::extractors::clip_client::ClipClient;
use calyx_id::extractors::{DailyQuota, Extractor, VisionBackend};
use calyx_id::services::{import_species_file, EmbeddingBackfill, HttpImageFetcher};
use calyx_id::store::SqliteStore;
use calyx_id::AppState;

const MODULE_NAME: &str = "calyx-id";

/// Command-line arguments for calyx-id
#[derive(Parser, Debug)]
#[command(name = "calyx-id")]
#[command(about = "Flower identification service")]
#[command(version)]
struct Cli {
    /// Root folder holding calyx.db
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// Listen address (overrides TOML)
    #[arg(short, long, global = true)]
    bind: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Compute embeddings for species stored without one
    BackfillEmbeddings,
    /// Import species from a JSON file
    ImportSpecies {
        /// JSON array of species records
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let toml_config = TomlConfig::load(MODULE_NAME);

    let log_level = toml_config
        .log_level
        .clone()
        .unwrap_or_else(|| CompiledDefaults::for_current_platform().log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("calyx_id={0},calyx_common={0},tower_http=info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting calyx-id v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    // Step 1: Resolve root folder
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(cli.root_folder.clone())
        .with_toml(toml_config.clone())
        .resolve();

    // Step 2: Create root folder directory if missing
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    // Step 3: Open or create database
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = calyx_id::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    // Step 4: Effective configuration
    let config = ServiceConfig::load(&db_pool, &toml_config, cli.bind.clone())
        .await
        .context("Failed to load configuration")?;

    let extractor = Arc::new(build_extractor(&config));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(db_pool, extractor, &config).await,
        Command::BackfillEmbeddings => {
            if !extractor.has_backend() {
                anyhow::bail!("Embedding backfill needs a vision API token");
            }
            let store = Arc::new(SqliteStore::new(db_pool));
            let fetcher = Arc::new(HttpImageFetcher::new()?);
            let report = EmbeddingBackfill::new(store, extractor, fetcher)
                .with_pause(config.backfill_pause)
                .run()
                .await?;
            info!("Backfill complete: {:?}", report);
            Ok(())
        }
        Command::ImportSpecies { file } => {
            let store = SqliteStore::new(db_pool);
            let report = import_species_file(&store, &file).await?;
            info!(
                "Imported {} species from {} ({} failed)",
                report.inserted,
                file.display(),
                report.failed
            );
            Ok(())
        }
    }
}

/// Vision backend when a token is configured, histogram-only otherwise
fn build_extractor(config: &ServiceConfig) -> Extractor {
    let quota = DailyQuota::new(config.daily_quota);

    let Some(token) = config.hf_token.clone() else {
        return Extractor::new(None, quota);
    };

    match ClipClient::new(token) {
        Ok(client) => {
            let client = match &config.vision_api_url {
                Some(url) => client.with_api_url(url.as_str()),
                None => client,
            };
            info!("Vision backend: {}", client.name());
            Extractor::new(Some(Arc::new(client) as Arc<dyn VisionBackend>), quota)
        }
        Err(e) => {
            warn!("Vision backend unavailable: {}", e);
            Extractor::new(None, quota)
        }
    }
}

async fn serve(db_pool: sqlx::SqlitePool, extractor: Arc<Extractor>, config: &ServiceConfig) -> Result<()> {
    let state = AppState::new(db_pool, extractor, config.cache_ttl_days);
    let app = calyx_id::build_router(state).layer(calyx_id::cors_layer(&config.cors_origins));

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!("Listening on http://{}", config.bind_address);
    info!("Health check: http://{}/health", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
