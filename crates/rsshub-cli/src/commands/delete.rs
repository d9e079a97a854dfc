use anyhow::{bail, Result};

use rsshub_core::{
    storage::{Database, FeedRepository},
    AppConfig,
};

pub async fn run(config: &AppConfig, name: &str) -> Result<()> {
    let db = Database::new(config).await?;

    if !FeedRepository::new(&db).delete_by_name(name).await? {
        bail!("Feed '{}' not found", name);
    }

    println!("Deleted feed '{}'", name);
    Ok(())
}
