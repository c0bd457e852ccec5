//! MIDI Router - layered routing of live input-device messages
//!
//! Attaches to every physical MIDI input, republishes traffic onto the
//! keyed event bus, and offers a live monitor plus an interactive learn
//! mode for discovering control keys.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use midi_router::capture::ControlValueCache;
use midi_router::config::AppConfig;
use midi_router::ports::{self, MidirGateway};
use midi_router::registry::DeviceRegistry;
use midi_router::{cli, monitor, EventBus};

/// MIDI Router - route live MIDI input through a keyed event bus
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI input ports
    #[arg(long)]
    list_ports: bool,

    /// Interactive learn mode: capture the next moved control
    #[arg(long)]
    learn: bool,

    /// Emit monitor output as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    let config = AppConfig::load_or_default(&args.config).await?;

    if args.list_ports {
        return ports::print_ports(&config.midi.denylist);
    }

    let bus = Arc::new(EventBus::new());
    let gateway = Arc::new(MidirGateway::new("midi-router"));
    let registry = Arc::new(DeviceRegistry::new(
        gateway,
        bus.clone(),
        config.midi.denylist.clone(),
    ));

    // Initial scan; hotplug rescans only when enabled.
    let attached = registry.scan_and_attach()?;
    info!(attached, "initial device scan complete");

    if config.midi.poll_enabled {
        info!(interval_ms = config.midi.poll_interval_ms, "periodic rescans enabled");
        tokio::spawn(registry.clone().run(config.poll_interval()));
    }

    if args.learn {
        let cache = Arc::new(ControlValueCache::new(bus));
        cli::run_learn_repl(cache).await
    } else {
        monitor::run_monitor(bus, args.json).await
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
