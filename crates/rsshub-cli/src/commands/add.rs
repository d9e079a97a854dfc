use anyhow::{bail, Result};

use rsshub_core::{
    feed::{validate_feed_url, NewFeed},
    storage::{Database, FeedRepository},
    AppConfig,
};

pub async fn run(config: &AppConfig, name: &str, url: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("Feed name must not be empty");
    }

    let url = validate_feed_url(url)?;

    let db = Database::new(config).await?;
    let feed = FeedRepository::new(&db)
        .create(&NewFeed {
            name: name.to_string(),
            url: url.to_string(),
        })
        .await?;

    println!("Added feed '{}' ({})", feed.name, feed.id);
    println!("  URL: {}", feed.url);
    println!("It will be picked up on the next tick of 'rsshub fetch'.");

    Ok(())
}
