//! mqti - MQTT topic bridge with payload filtering
//!
//! Usage:
//!   mqti [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path (default: mqti.toml)
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use mqti::bridge::{ConnectionManager, Dispatcher};
use mqti::config::Config;
use mqti::message::write_records;
use mqti::registry::MappingRegistry;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages, including every filter decision
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// mqti - MQTT topic bridge with payload filtering
#[derive(Parser, Debug)]
#[command(name = "mqti")]
#[command(version)]
#[command(about = "Forward MQTT messages that pass each topic mapping's filter")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long, default_value = "mqti.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config file {}: {}", args.config.display(), e);
            std::process::exit(1);
        }
    };

    // CLI overrides config, config overrides default (info)
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let registry = Arc::new(MappingRegistry::from_configs(&config.mapping));

    info!("Starting mqti");
    info!("  Config file: {}", args.config.display());
    info!("  Broker: {}", config.mqtt.broker_uri());
    info!("  Client ID: {}", config.mqtt.client_id);
    info!("  Shutdown policy: {:?}", config.shutdown.policy);
    if registry.is_empty() {
        warn!("  No mappings configured, nothing will be forwarded");
    }
    for mapping in registry.iter() {
        info!(
            "  Mapping #{}: {} ({} filter)",
            mapping.index(),
            mapping.topic(),
            mapping.filter().kind()
        );
    }

    let (outbound_tx, outbound_rx) = mpsc::channel(config.dispatch.outbound_channel_capacity);
    let mut consumer = tokio::spawn(write_records(outbound_rx, tokio::io::stdout()));

    let manager =
        ConnectionManager::new(config.mqtt.clone(), registry, Dispatcher::new(outbound_tx))
            .with_max_concurrent_handlers(config.dispatch.max_concurrent_handlers)
            .with_shutdown_policy(config.shutdown.policy);
    let run = manager.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            if let Err(e) = result {
                error!("{}", e);
                std::process::exit(1);
            }
        }
        // Nobody is reading any more; stop instead of filling the channel
        result = &mut consumer => {
            match result? {
                Ok(written) => error!("Output closed after {} messages", written),
                Err(e) => error!("Failed to write message: {}", e),
            }
            std::process::exit(1);
        }
    }

    // The manager has dropped every sender; finish what is queued.
    match consumer.await? {
        Ok(written) => {
            info!("Wrote {} messages", written);
            Ok(())
        }
        Err(e) => {
            error!("Failed to write message: {}", e);
            std::process::exit(1);
        }
    }
}
