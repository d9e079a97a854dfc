use anyhow::Result;

use rsshub_core::AppConfig;

use super::control_client;

pub async fn run(config: &AppConfig) -> Result<()> {
    let client = control_client(config);

    if !client.ping().await? {
        println!("Fetcher is not running (nothing listening on {}).", config.control.addr);
        return Ok(());
    }

    let status = client.status().await?;
    println!("Fetcher is running on {}", config.control.addr);
    println!("  Aggregator: {}", if status.running { "started" } else { "stopped" });
    println!("  Interval: {}", status.interval);
    println!("  Workers: {} ({} live)", status.workers, status.live_workers);
    println!("  Uptime: {}s", status.uptime_secs);

    Ok(())
}
