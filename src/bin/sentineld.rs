//! sentineld - motion sentinel daemon
//!
//! This daemon:
//! 1. Loads configuration (file, then environment overrides)
//! 2. Serves the live annotated feed at `/video-feed`
//! 3. Records close-range motion alerts and notifies about them

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use motion_sentinel::{
    AlertStore, ConfiguredFeeds, SentinelConfig, SqliteAlertStore, StreamServer,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve a motion-alerting camera feed")]
struct Args {
    /// Config file (TOML or JSON).
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the configured one.
    #[arg(long)]
    addr: Option<String>,

    /// Seconds between feed health log lines.
    #[arg(long, default_value_t = 30)]
    health_interval_s: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = SentinelConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server_addr = addr;
    }

    log_alert_history(&config.storage.db_path)?;
    log::info!(
        "camera {} at {}x{}, alerts within {:.1} m, cool-down {}s",
        config.camera_url,
        config.pipeline.width,
        config.pipeline.height,
        config.pipeline.throttle.max_distance_m,
        config.pipeline.throttle.cooldown.as_secs()
    );

    let server_addr = config.server_addr.clone();
    let feeds = ConfiguredFeeds::from_config(config)?;
    let handle = StreamServer::new(server_addr, Arc::new(feeds)).spawn()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("sentineld waiting for shutdown signal (Ctrl-C)...");
    let interval = Duration::from_secs(args.health_interval_s.max(1));
    loop {
        match rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                log::info!("health: {} active feed(s)", handle.active_feeds());
            }
        }
    }

    log::info!("shutdown signal received, stopping stream server...");
    handle.stop()?;
    Ok(())
}

fn log_alert_history(db_path: &str) -> Result<()> {
    let store = SqliteAlertStore::open(db_path)?;
    let total = store.count()?;
    log::info!("alert store {}: {} alert(s) on record", db_path, total);
    for record in store.recent(3)? {
        log::info!("  {}", record);
    }
    Ok(())
}
