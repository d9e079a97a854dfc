mod fetcher;
mod models;
mod parser;

pub use fetcher::{validate_feed_url, FeedFetcher};
pub use models::{Article, Feed, FetchedItem, NewFeed};
pub use parser::{parse_feed, parse_pub_date};

use tokio_util::sync::CancellationToken;

use crate::Result;

/// Retrieves a feed URL and normalizes its entries
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch and parse `url`. In-flight I/O must be abandoned once `cancel` fires.
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<FetchedItem>>;
}
