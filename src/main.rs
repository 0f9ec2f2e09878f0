//! Hass Deck - Home Assistant on an Elgato Stream Deck
//!
//! Shows entity state on the deck keys and calls hub services on key presses.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hass_deck::binding::BindingResolver;
use hass_deck::config::AppConfig;
use hass_deck::deck::{Deck, PreviewDeck};
use hass_deck::hub::{ChannelOptions, WsConnector};
use hass_deck::render::ImageRenderer;
use hass_deck::sync::SyncController;

/// Hass Deck - mirror Home Assistant entities onto a Stream Deck
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Home Assistant host[:port] (overrides hub.host)
    #[arg(long, env = "HASS_HOST")]
    host: Option<String>,

    /// Long-lived access token (overrides hub.token)
    #[arg(long, env = "HASS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Write key images as PNG files to this directory instead of using a device
    #[arg(long)]
    preview: Option<PathBuf>,

    /// List connected Stream Decks
    #[arg(long)]
    list_devices: bool,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Starting Hass Deck v{}...", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        return list_devices();
    }

    info!("Configuration file: {}", args.config);
    let mut config = AppConfig::load(&args.config).await?;
    if let Some(host) = args.host {
        config.hub.host = host;
    }
    if let Some(token) = args.token {
        config.hub.token = Some(token);
    }
    config.validate()?;
    let token = config.require_token()?.to_string();

    if args.check_config {
        print_config_summary(&config);
        return Ok(());
    }

    let deck = open_deck(&config, args.preview)?;
    config.check_key_count(deck.key_count())?;

    let renderer = ImageRenderer::load(&config.deck.font, config.deck.icon_dir.clone())
        .context("Failed to load rendering assets")?;

    let controller = SyncController::new(
        config.buttons.clone(),
        deck,
        Arc::new(renderer),
        BindingResolver::default(),
        config.deck.brightness,
    )?;

    let connector = Arc::new(WsConnector::new(config.hub.websocket_url()));
    let options = ChannelOptions {
        access_token: token,
        reconnect_delay: config.hub.reconnect_delay(),
    };

    controller.run(connector, options, shutdown_signal()).await?;

    info!("Hass Deck shutdown complete");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn open_deck(config: &AppConfig, preview: Option<PathBuf>) -> Result<Arc<dyn Deck>> {
    if let Some(dir) = preview {
        let deck = PreviewDeck::create(dir, config.deck.preview_key_count)?;
        return Ok(Arc::new(deck));
    }
    open_hardware_deck()
}

#[cfg(feature = "streamdeck")]
fn open_hardware_deck() -> Result<Arc<dyn Deck>> {
    let deck = hass_deck::deck::StreamDeck::open(None)?;
    Ok(Arc::new(deck))
}

#[cfg(not(feature = "streamdeck"))]
fn open_hardware_deck() -> Result<Arc<dyn Deck>> {
    anyhow::bail!("Built without the `streamdeck` feature: use --preview <dir> or rebuild with --features streamdeck")
}

#[cfg(feature = "streamdeck")]
fn list_devices() -> Result<()> {
    let devices = hass_deck::deck::list_devices()?;

    println!("\n{}", "=== Stream Decks ===".bold().cyan());
    if devices.is_empty() {
        println!("  {}", "No devices found".yellow());
    }
    for device in devices {
        println!(
            "  {} {} ({} keys)",
            device.kind.bright_white(),
            device.serial.green(),
            device.key_count
        );
    }
    Ok(())
}

#[cfg(not(feature = "streamdeck"))]
fn list_devices() -> Result<()> {
    println!(
        "{}",
        "Device discovery needs the `streamdeck` feature".yellow()
    );
    Ok(())
}

fn print_config_summary(config: &AppConfig) {
    println!("\n{}", "=== Configuration OK ===".bold().cyan());
    println!("  Hub: {}", config.hub.websocket_url().green());
    println!(
        "  Reconnect delay: {} ms",
        config.hub.reconnect_delay_ms.to_string().green()
    );
    println!("  Brightness: {}%", config.deck.brightness.to_string().green());
    println!("  Buttons: {}", config.buttons.len().to_string().green());

    for (key, button) in config.buttons.iter().enumerate() {
        let entity = button.entity_id.as_deref().unwrap_or("-");
        let service = button.service.as_deref().unwrap_or("-");
        println!(
            "    {:>2}: {} {} {}",
            key,
            entity.yellow(),
            service.bright_white(),
            button.text.dimmed()
        );
    }
}
