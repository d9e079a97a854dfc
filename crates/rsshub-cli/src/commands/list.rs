use anyhow::Result;
use chrono::Utc;

use rsshub_core::{
    storage::{Database, FeedRepository},
    AppConfig,
};

pub async fn run(config: &AppConfig, num: Option<u32>) -> Result<()> {
    let db = Database::new(config).await?;
    let feed_repo = FeedRepository::new(&db);
    let feeds = feed_repo.list(num).await?;

    if feeds.is_empty() {
        println!("No feeds yet.");
        println!("\nTo add a feed, run:");
        println!("  rsshub add --name <name> --url <url>");
        return Ok(());
    }

    println!("Feeds ({}):\n", feeds.len());

    let now = Utc::now();
    for feed in &feeds {
        println!("  {}", feed.name);
        println!("    URL: {}", feed.url);
        println!("    Added: {}", feed.created_at.format("%Y-%m-%d %H:%M"));
        if feed.updated_at > feed.created_at {
            println!(
                "    Last polled: {} ({} min ago)",
                feed.updated_at.format("%Y-%m-%d %H:%M"),
                feed.staleness(now).num_minutes()
            );
        } else {
            println!("    Never polled");
        }
        println!();
    }

    Ok(())
}
