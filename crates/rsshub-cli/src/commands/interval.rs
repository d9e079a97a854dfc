use anyhow::Result;

use rsshub_core::AppConfig;

use super::control_client;

pub async fn run(config: &AppConfig, duration: &str) -> Result<()> {
    let change = control_client(config).set_interval(duration).await?;

    if change.is_noop() {
        println!("Interval unchanged: {}", change.new);
    } else {
        println!("Interval: {} -> {}", change.old, change.new);
    }

    Ok(())
}
