mod article_repo;
mod database;
mod feed_repo;
mod retry;

pub use article_repo::ArticleRepository;
pub use database::Database;
pub use feed_repo::FeedRepository;
pub use retry::{execute_with_retry, query_with_retry};

use uuid::Uuid;

use crate::feed::{Feed, FetchedItem};
use crate::Result;

/// Persistence operations the aggregator depends on
#[async_trait::async_trait]
pub trait FeedStore: Send + Sync {
    /// Up to `limit` feeds, least recently polled first
    async fn list_stale_feeds(&self, limit: usize) -> Result<Vec<Feed>>;

    /// Insert or refresh the article keyed by `(feed_id, item.link)`
    async fn upsert_article(&self, feed_id: Uuid, item: &FetchedItem) -> Result<()>;

    /// Bump the feed's `updated_at` to now
    async fn mark_feed_polled(&self, feed_id: Uuid) -> Result<()>;
}

/// [`FeedStore`] backed by the SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl FeedStore for SqliteStore {
    async fn list_stale_feeds(&self, limit: usize) -> Result<Vec<Feed>> {
        FeedRepository::new(&self.db).list_stale(limit).await
    }

    async fn upsert_article(&self, feed_id: Uuid, item: &FetchedItem) -> Result<()> {
        ArticleRepository::new(&self.db).upsert(feed_id, item).await
    }

    async fn mark_feed_polled(&self, feed_id: Uuid) -> Result<()> {
        FeedRepository::new(&self.db).mark_polled(feed_id).await
    }
}
