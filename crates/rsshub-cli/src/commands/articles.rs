use anyhow::Result;

use rsshub_core::{
    storage::{ArticleRepository, Database, FeedRepository},
    AppConfig, Error,
};

const SNIPPET_CHARS: usize = 160;

pub async fn run(config: &AppConfig, feed_name: &str, num: u32) -> Result<()> {
    let db = Database::new(config).await?;

    let feed = FeedRepository::new(&db)
        .find_by_name(feed_name)
        .await?
        .ok_or_else(|| Error::FeedNotFound(feed_name.to_string()))?;

    let articles = ArticleRepository::new(&db).list_by_feed(feed.id, num).await?;

    if articles.is_empty() {
        println!("No articles for '{}' yet.", feed.name);
        return Ok(());
    }

    for article in &articles {
        let title = if article.title.is_empty() {
            "(no title)"
        } else {
            article.title.as_str()
        };
        println!("{}", title);
        println!("  {}", article.link);
        println!("  Published: {}", article.published_at.format("%Y-%m-%d %H:%M"));

        let snippet = snippet(&article.description);
        if !snippet.is_empty() {
            println!("  {}", snippet);
        }
        println!();
    }

    Ok(())
}

/// Description collapsed onto one line and shortened to `SNIPPET_CHARS` chars
fn snippet(description: &str) -> String {
    let flat = description.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SNIPPET_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(SNIPPET_CHARS).collect();
    format!("{}...", cut.trim_end())
}
