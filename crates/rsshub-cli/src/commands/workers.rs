use anyhow::{bail, Result};

use rsshub_core::AppConfig;

use super::control_client;

pub async fn run(config: &AppConfig, count: i64) -> Result<()> {
    if count <= 0 {
        bail!("Worker count must be greater than zero, got {}", count);
    }

    let change = control_client(config).set_workers(count).await?;

    if change.is_noop() {
        println!("Workers unchanged: {}", change.new);
    } else {
        println!("Workers: {} -> {}", change.old, change.new);
    }

    Ok(())
}
