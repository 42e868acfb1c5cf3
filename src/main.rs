//! IRC Bouncer - Main binary

use clap::{Parser, Subcommand};
use ircbnc_core::{Bouncer, BouncerContext, Config, FileStore, IdentRegistry, IdentServer, UserUpdates};
use ircbnc_modules::{HttpPreview, ScriptRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// IRC Bouncer - keeps users connected to their IRC networks
#[derive(Parser)]
#[command(name = "ircbnc")]
#[command(about = "A persistent multi-user IRC bouncer")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Test configuration and exit
    #[arg(long)]
    test_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    if let Some(command) = cli.command {
        match command {
            Commands::Config { output } => {
                generate_config(&output)?;
                return Ok(());
            }
            Commands::Version => {
                show_version();
                return Ok(());
            }
        }
    }

    let config = if cli.config.exists() {
        info!("Loading configuration from {:?}", cli.config);
        Config::from_file(&cli.config)?
    } else {
        info!("Configuration file not found, using defaults");
        Config::default()
    };

    config.validate()?;
    if cli.test_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let context = build_context(&config).await?;
    let (bouncer, queues) = Bouncer::from_config(&config, context)?;
    for queue in queues {
        tokio::spawn(drain_updates(queue));
    }

    info!("Starting IRC bouncer...");
    bouncer.connect_all().await;

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received");

    if config.bouncer.autosave {
        let saved = bouncer.save().await;
        match saved.to_file(&cli.config) {
            Ok(()) => info!("Saved configuration to {:?}", cli.config),
            Err(e) => warn!("Failed to save configuration: {}", e),
        }
    }
    bouncer.shutdown().await;

    Ok(())
}

/// Wire up the store, previews, scripts and ident responder
async fn build_context(config: &Config) -> anyhow::Result<BouncerContext> {
    let settings = &config.bouncer;
    let store = FileStore::open(&settings.data_dir).await?;
    let ident = Arc::new(IdentRegistry::new());

    let mut context = BouncerContext::new(settings.clone())
        .with_store(Arc::new(store))
        .with_hooks(Arc::new(ScriptRegistry))
        .with_ident(ident.clone());

    if settings.preview.enabled {
        context = context.with_preview(Arc::new(HttpPreview::new(&settings.preview)?));
    }

    if settings.ident.enabled {
        let server = IdentServer::bind(&settings.ident.bind, settings.ident.port, ident).await?;
        tokio::spawn(server.run());
    }

    Ok(context)
}

/// Relay one user's updates to the log until the bouncer drops the queue
async fn drain_updates((user, mut updates): UserUpdates) {
    while let Some(update) = updates.recv().await {
        match serde_json::to_string(&update) {
            Ok(json) => info!(user = %user, "{}", json),
            Err(e) => warn!(user = %user, "Failed to encode update: {}", e),
        }
    }
    debug!(user = %user, "Delivery queue closed");
}

/// Initialize logging
fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    Ok(())
}

/// Generate default configuration file
fn generate_config(output: &Path) -> anyhow::Result<()> {
    let config = Config::default();
    config.to_file(output)?;
    println!("Generated default configuration file: {:?}", output);
    Ok(())
}

/// Show version information
fn show_version() {
    println!("ircbnc {}", env!("CARGO_PKG_VERSION"));
    println!("{}", env!("CARGO_PKG_DESCRIPTION"));
}
