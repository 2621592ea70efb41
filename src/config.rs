/// Configuration management for the huddle server.
/// Handles command-line argument parsing and the runtime settings handed to handlers.
use clap::Parser;
use std::path::PathBuf;

use crate::db::presence_store::DEFAULT_STALE_AFTER_SECS;

#[derive(Parser, Debug)]
#[command(name = "Huddle Server")]
#[command(about = "Real-time messaging backend with direct messages and groups", long_about = None)]
pub struct Config {
    /// Server port (default: 4000)
    #[arg(long, default_value = "4000")]
    pub port: u16,

    /// SQLite database file path (default: huddle.db)
    #[arg(long, default_value = "huddle.db")]
    pub database: PathBuf,

    /// PID file path (optional) - write server PID to this file on startup
    #[arg(long)]
    pub pidfile: Option<PathBuf>,

    /// Signing secret of the identity webhook (`whsec_...`).
    /// Without it the webhook endpoint rejects every delivery.
    #[arg(long, env = "HUDDLE_WEBHOOK_SECRET")]
    pub webhook_secret: Option<String>,

    /// Seconds without a heartbeat after which a user reads as offline
    #[arg(long, default_value_t = DEFAULT_STALE_AFTER_SECS)]
    pub presence_stale_seconds: u64,

    /// Interval of the background sweep that persists stale users as offline
    #[arg(long, default_value = "30")]
    pub presence_sweep_seconds: u64,

    /// Messages updated per transaction when marking a conversation read
    #[arg(long, default_value = "200")]
    pub read_batch_size: usize,

    /// Default number of messages per history page
    #[arg(long, default_value = "50")]
    pub page_size: usize,
}

impl Config {
    /// Parse command-line arguments into Config
    pub fn from_args() -> Self {
        Config::parse()
    }
}

/// Runtime settings shared with request handlers
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub webhook_secret: Option<String>,
    pub presence_stale_seconds: u64,
    pub read_batch_size: usize,
    pub page_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            webhook_secret: None,
            presence_stale_seconds: DEFAULT_STALE_AFTER_SECS,
            read_batch_size: 200,
            page_size: 50,
        }
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        ServerConfig {
            webhook_secret: config.webhook_secret.clone(),
            presence_stale_seconds: config.presence_stale_seconds,
            read_batch_size: config.read_batch_size,
            page_size: config.page_size,
        }
    }
}
