use super::{build_scheduler, load_config};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn run(data_dir: Option<PathBuf>, interval: Option<u64>) {
    let config = match load_config(data_dir, interval) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    println!("🚀 Starting CSE poller");
    println!("📁 Data directory: {}", config.data_root.display());
    println!(
        "⏰ Market window: {} - {} (Asia/Colombo), every {}s",
        config.market_open,
        config.market_close,
        config.poll_interval.as_secs()
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        trigger.cancel();
    });

    let mut scheduler = build_scheduler(config, cancel);
    if let Err(e) = scheduler.run().await {
        eprintln!("❌ Poller stopped: {}", e);
        std::process::exit(1);
    }

    println!("👋 Poller stopped");
}
