//! Standalone study server binary
//!
//! The browser reaches it through the native messaging host, which relays
//! each message over the Unix socket.

use std::time::Duration;
use study_service::reminders::{spawn_daily_reminder, spawn_sync_reminder};
use study_service::{Config, StudyServer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("Starting Study Service...");

    let server = StudyServer::from_config(&config).await?;
    let dispatcher = server.dispatcher();

    if config.reminders.daily_enabled {
        spawn_daily_reminder(dispatcher.store().clone(), dispatcher.notifier().clone());
    }
    if config.reminders.sync_interval_minutes > 0 {
        spawn_sync_reminder(
            dispatcher,
            Duration::from_secs(config.reminders.sync_interval_minutes * 60),
        );
    }

    println!("Socket: {:?}", server.socket_path());
    println!("Press Ctrl+C to stop");

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            println!("\nShutting down...");
        }
    }

    // Clean up socket file
    if server.socket_path().exists() {
        std::fs::remove_file(server.socket_path())?;
    }

    Ok(())
}
