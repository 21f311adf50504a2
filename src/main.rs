//! Imation - prompt-to-image service with bounded artifact storage

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imation::{
    api::{build_app, AppState},
    artifact::{ArtifactStore, RetentionPolicy},
    config::ImationConfig,
    coordinator::GenerationCoordinator,
    generator::{HttpImageGenerator, ImageGenerator},
    server::ArtifactServer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "imation")]
#[command(author = "Imation Team")]
#[command(version)]
#[command(about = "Prompt-to-image service with bounded artifact storage")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "IMATION_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Directory holding stored images
        #[arg(long)]
        images_dir: Option<PathBuf>,

        /// Maximum number of stored images
        #[arg(long)]
        max_images: Option<usize>,
    },

    /// Run one retention pass and exit
    Cleanup {
        /// Maximum number of stored images
        #[arg(long)]
        max_images: Option<usize>,
    },

    /// List stored images
    List,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let mut config = match &cli.config {
        Some(path) => ImationConfig::from_file(path)?,
        None => ImationConfig::default(),
    };

    match cli.command {
        Commands::Serve {
            host,
            port,
            images_dir,
            max_images,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = images_dir {
                config.storage.images_dir = dir;
            }
            if let Some(max) = max_images {
                config.storage.max_images = max;
            }
            config.validate()?;
            run_server(config).await?;
        }
        Commands::Cleanup { max_images } => {
            if let Some(max) = max_images {
                config.storage.max_images = max;
            }
            config.validate()?;
            run_cleanup(&config).await?;
        }
        Commands::List => {
            list_images(&config).await?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("imation={},tower_http={}", log_level, log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_server(config: ImationConfig) -> Result<()> {
    tracing::info!("Starting Imation");

    let store = Arc::new(
        ArtifactStore::open(&config.storage.images_dir)
            .await
            .context("opening image store")?,
    );
    let retention = RetentionPolicy::new(config.storage.max_images);
    match retention.enforce(&store).await {
        Ok(report) => tracing::info!(
            retained = report.retained,
            evicted = report.evicted.len(),
            "Startup retention pass"
        ),
        Err(e) => tracing::warn!("Startup retention pass failed: {}", e),
    }

    let generator = Arc::new(HttpImageGenerator::new(&config.generator)?);
    if let Err(e) = generator.load().await {
        tracing::warn!("Image generator not ready, generation disabled: {}", e);
    }

    let state = AppState {
        coordinator: Arc::new(GenerationCoordinator::new(
            generator,
            store.clone(),
            retention,
            &config.generator,
        )),
        server: Arc::new(ArtifactServer::new(
            store,
            config.server.public_base_url.clone(),
        )),
    };
    let app = build_app(state, &config.server.cors_origins);

    if config.server.public_base_url.is_none()
        && !matches!(config.server.host.as_str(), "127.0.0.1" | "localhost" | "::1")
    {
        tracing::warn!(
            "server.public_base_url is unset; image links will follow the client's Host header"
        );
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(
        images_dir = %config.storage.images_dir.display(),
        max_images = config.storage.max_images,
        "Imation listening on http://{}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down...");
}

async fn run_cleanup(config: &ImationConfig) -> Result<()> {
    let store = ArtifactStore::open(&config.storage.images_dir).await?;
    let report = RetentionPolicy::new(config.storage.max_images)
        .enforce(&store)
        .await?;

    println!(
        "Retained {}, evicted {}, failed {}",
        report.retained,
        report.evicted.len(),
        report.failed.len()
    );
    for id in &report.failed {
        println!("  ✗ {}", id);
    }
    Ok(())
}

async fn list_images(config: &ImationConfig) -> Result<()> {
    let store = ArtifactStore::open(&config.storage.images_dir).await?;
    let artifacts = store.list().await?;

    for artifact in &artifacts {
        println!(
            "{}  {:>9}  {}  {}",
            artifact.created_at.format("%Y-%m-%d %H:%M:%S"),
            artifact.size_bytes,
            artifact.filename(),
            artifact.source_prompt.as_deref().unwrap_or("")
        );
    }
    println!("{} image(s) in {}", artifacts.len(), store.dir().display());
    Ok(())
}

fn show_config(config: Option<&ImationConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
