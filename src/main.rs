/// Huddle Server - real-time messaging backend
///
/// Main server entry point. Handles:
/// - Command-line argument parsing
/// - Database initialization
/// - Background presence sweeping
/// - HTTP and WebSocket server startup
use actix_web::web;
use anyhow::Context;
use huddle_server::config::{Config, ServerConfig};
use huddle_server::db::{self, now_millis, DbPool, PresenceStore};
use huddle_server::handlers::WsServer;
use huddle_server::server;
use std::fs;
use std::process;
use std::time::Duration;

/// Periodically persist `offline` for users whose heartbeat went stale
fn spawn_presence_sweeper(pool: DbPool, interval_secs: u64, stale_after_secs: u64) {
    if interval_secs == 0 {
        log::info!("Presence sweeper disabled");
        return;
    }

    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            if let Err(e) = PresenceStore::sweep_stale(&pool, now_millis(), stale_after_secs).await {
                log::error!("Presence sweep failed: {}", e);
            }
        }
    });
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();

    let config = Config::from_args();

    log::info!("Starting Huddle Server");
    log::info!("Database: {:?}", config.database);
    log::info!("Port: {}", config.port);
    log::info!(
        "Presence stale after {}s, swept every {}s",
        config.presence_stale_seconds,
        config.presence_sweep_seconds
    );
    if config.webhook_secret.is_none() {
        log::warn!("No webhook secret configured; identity webhooks will be rejected");
    }

    // Write PID file if specified
    if let Some(pidfile) = &config.pidfile {
        let pid = process::id().to_string();
        fs::write(pidfile, pid)
            .with_context(|| format!("Failed to write PID file {:?}", pidfile))?;
        log::info!("PID file written to: {:?}", pidfile);
    }

    // Initialize database
    let db_path = config
        .database
        .to_str()
        .context("Database path is not valid UTF-8")?;
    let pool = db::create_pool(db_path).context("Failed to create database pool")?;

    log::info!("Database initialized");

    spawn_presence_sweeper(
        pool.clone(),
        config.presence_sweep_seconds,
        config.presence_stale_seconds,
    );

    let ws_server = web::Data::new(WsServer::new(pool.clone()));
    let server_config = web::Data::new(ServerConfig::from(&config));
    let pool_data = web::Data::new(pool);

    // Start HTTP server
    let bind_addr = format!("127.0.0.1:{}", config.port);
    log::info!("Starting HTTP server on {}", bind_addr);

    let http_server = server::create_http_server(pool_data, ws_server, server_config, &bind_addr)
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    http_server.await?;
    Ok(())
}
