use super::{build_scheduler, load_config};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// One forced cycle, used to verify the pipeline end to end
pub async fn run(data_dir: Option<PathBuf>) {
    let config = match load_config(data_dir, None) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    println!("🔄 Running one poll cycle into {}", config.data_root.display());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let mut scheduler = build_scheduler(config, cancel);
    let report = match scheduler.run_once().await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("❌ Cycle failed: {}", e);
            std::process::exit(1);
        }
    };

    println!("\n📊 Cycle at {}", report.timestamp.to_rfc3339());
    if let Some(status) = report.market_status {
        println!("   Market status:  {}", status.as_str());
    }
    println!("   Endpoints ok:   {}", report.succeeded.len());
    println!("   Endpoints fail: {}", report.failed.len());
    for endpoint in &report.failed {
        println!("     ⚠️  {}", endpoint);
    }
    println!("   Records:        {}", report.records);
    println!("   Files written:  {}", report.files_written);
    println!("   Files skipped:  {}", report.files_skipped);
    if report.reference_refreshed {
        println!("   Symbol reference refreshed");
    }
    for symbol in &report.anomalies {
        println!("   ⚠️  {} listed as both gainer and loser", symbol);
    }

    if report.storage_failures > 0 {
        eprintln!("❌ {} storage failure(s)", report.storage_failures);
        std::process::exit(1);
    }
    if report.all_failed() {
        eprintln!("❌ Every endpoint failed");
        std::process::exit(1);
    }

    println!("\n✅ Pipeline verification complete");
}
