use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::retry::execute_with_retry;
use super::Database;
use crate::feed::{Article, FetchedItem};
use crate::Result;

/// Repository for article CRUD operations
pub struct ArticleRepository<'a> {
    db: &'a Database,
}

#[derive(FromRow)]
struct ArticleRow {
    id: String,
    feed_id: String,
    title: String,
    link: String,
    description: String,
    published_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Article {
            id: Uuid::parse_str(&row.id).unwrap_or_default(),
            feed_id: Uuid::parse_str(&row.feed_id).unwrap_or_default(),
            title: row.title,
            link: row.link,
            description: row.description,
            published_at: row.published_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl<'a> ArticleRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert an item, or refresh the existing article with the same `(feed_id, link)`
    pub async fn upsert(&self, feed_id: Uuid, item: &FetchedItem) -> Result<()> {
        let pool = self.db.pool().clone();
        let feed_id_str = feed_id.to_string();

        execute_with_retry(|| {
            let pool = pool.clone();
            let feed_id_str = feed_id_str.clone();
            let now = Utc::now();
            async move {
                sqlx::query(
                    r#"
                    INSERT INTO articles
                    (id, feed_id, title, link, description, published_at, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(feed_id, link) DO UPDATE SET
                        title = excluded.title,
                        description = excluded.description,
                        published_at = excluded.published_at,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&feed_id_str)
                .bind(&item.title)
                .bind(&item.link)
                .bind(&item.description)
                .bind(item.published_at)
                .bind(now)
                .bind(now)
                .execute(&pool)
                .await
                .map(|_| ())
            }
        })
        .await?;

        Ok(())
    }

    /// Latest articles of a feed, newest publication first
    pub async fn list_by_feed(&self, feed_id: Uuid, limit: u32) -> Result<Vec<Article>> {
        let rows: Vec<ArticleRow> = sqlx::query_as(
            r#"
            SELECT id, feed_id, title, link, description, published_at, created_at, updated_at
            FROM articles
            WHERE feed_id = ?
            ORDER BY published_at DESC, created_at DESC
            LIMIT ?
            "#,
        )
        .bind(feed_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(Article::from).collect())
    }

    /// Find the article stored for `(feed_id, link)`
    pub async fn find_by_link(&self, feed_id: Uuid, link: &str) -> Result<Option<Article>> {
        let row: Option<ArticleRow> = sqlx::query_as(
            r#"
            SELECT id, feed_id, title, link, description, published_at, created_at, updated_at
            FROM articles
            WHERE feed_id = ? AND link = ?
            "#,
        )
        .bind(feed_id.to_string())
        .bind(link)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(Article::from))
    }

    /// Number of articles stored for a feed
    pub async fn count_by_feed(&self, feed_id: Uuid) -> Result<u32> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_id = ?")
            .bind(feed_id.to_string())
            .fetch_one(self.db.pool())
            .await?;

        Ok(count.0 as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::NewFeed;
    use crate::storage::FeedRepository;
    use chrono::{Duration, TimeZone};

    async fn setup() -> (Database, Uuid) {
        let db = Database::new_in_memory().await.unwrap();
        let feed = FeedRepository::new(&db)
            .create(&NewFeed {
                name: "news".to_string(),
                url: "https://example.com/news.xml".to_string(),
            })
            .await
            .unwrap();
        (db, feed.id)
    }

    fn item(title: &str, link: &str, published_at: DateTime<Utc>) -> FetchedItem {
        FetchedItem {
            title: title.to_string(),
            link: link.to_string(),
            description: format!("{} description", title),
            published_at,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_on_link() {
        let (db, feed_id) = setup().await;
        let repo = ArticleRepository::new(&db);
        let first_date = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let second_date = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();

        repo.upsert(feed_id, &item("Original", "https://example.com/a", first_date))
            .await
            .unwrap();
        let original = repo
            .find_by_link(feed_id, "https://example.com/a")
            .await
            .unwrap()
            .unwrap();

        repo.upsert(feed_id, &item("Edited", "https://example.com/a", second_date))
            .await
            .unwrap();

        assert_eq!(repo.count_by_feed(feed_id).await.unwrap(), 1);
        let updated = repo
            .find_by_link(feed_id, "https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, original.id);
        assert_eq!(updated.title, "Edited");
        assert_eq!(updated.description, "Edited description");
        assert_eq!(updated.published_at, second_date);
        assert_eq!(updated.created_at, original.created_at);
        assert!(updated.updated_at >= original.updated_at);
    }

    #[tokio::test]
    async fn test_same_link_in_different_feeds() {
        let (db, feed_id) = setup().await;
        let other = FeedRepository::new(&db)
            .create(&NewFeed {
                name: "other".to_string(),
                url: "https://example.org/rss".to_string(),
            })
            .await
            .unwrap();
        let repo = ArticleRepository::new(&db);
        let now = Utc::now();

        repo.upsert(feed_id, &item("A", "https://shared/link", now)).await.unwrap();
        repo.upsert(other.id, &item("B", "https://shared/link", now)).await.unwrap();

        assert_eq!(repo.count_by_feed(feed_id).await.unwrap(), 1);
        assert_eq!(repo.count_by_feed(other.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_by_feed_newest_first() {
        let (db, feed_id) = setup().await;
        let repo = ArticleRepository::new(&db);
        let now = Utc::now();

        repo.upsert(feed_id, &item("old", "https://e/1", now - Duration::days(2)))
            .await
            .unwrap();
        repo.upsert(feed_id, &item("new", "https://e/2", now)).await.unwrap();
        repo.upsert(feed_id, &item("mid", "https://e/3", now - Duration::days(1)))
            .await
            .unwrap();

        let latest = repo.list_by_feed(feed_id, 2).await.unwrap();
        let titles: Vec<_> = latest.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "mid"]);
    }

    #[tokio::test]
    async fn test_articles_removed_with_feed() {
        let (db, feed_id) = setup().await;
        let repo = ArticleRepository::new(&db);
        repo.upsert(feed_id, &item("x", "https://e/x", Utc::now())).await.unwrap();

        assert!(FeedRepository::new(&db).delete_by_name("news").await.unwrap());
        assert_eq!(repo.count_by_feed(feed_id).await.unwrap(), 0);
    }
}
