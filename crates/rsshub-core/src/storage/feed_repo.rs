use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::retry::{execute_with_retry, query_with_retry};
use super::Database;
use crate::feed::{Feed, NewFeed};
use crate::{Error, Result};

/// Repository for feed CRUD operations
pub struct FeedRepository<'a> {
    db: &'a Database,
}

#[derive(FromRow)]
struct FeedRow {
    id: String,
    name: String,
    url: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: Uuid::parse_str(&row.id).unwrap_or_default(),
            name: row.name,
            url: row.url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl<'a> FeedRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Register a new feed. Names are unique.
    pub async fn create(&self, new_feed: &NewFeed) -> Result<Feed> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let inserted = sqlx::query(
            r#"
            INSERT INTO feeds (id, name, url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&new_feed.name)
        .bind(&new_feed.url)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(Error::FeedExists(new_feed.name.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        self.find_by_id(id)
            .await?
            .ok_or_else(|| Error::FeedNotFound(id.to_string()))
    }

    /// Find a feed by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Feed>> {
        let row: Option<FeedRow> = sqlx::query_as(
            r#"
            SELECT id, name, url, created_at, updated_at
            FROM feeds
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(Feed::from))
    }

    /// Find a feed by its unique name
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Feed>> {
        let row: Option<FeedRow> = sqlx::query_as(
            r#"
            SELECT id, name, url, created_at, updated_at
            FROM feeds
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(Feed::from))
    }

    /// List feeds, most recently added first
    pub async fn list(&self, limit: Option<u32>) -> Result<Vec<Feed>> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map_or(-1, i64::from);

        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
            SELECT id, name, url, created_at, updated_at
            FROM feeds
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Feeds most in need of a refresh: oldest `updated_at` first, ties by oldest `created_at`
    pub async fn list_stale(&self, limit: usize) -> Result<Vec<Feed>> {
        let pool = self.db.pool().clone();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows: Vec<FeedRow> = query_with_retry(|| {
            let pool = pool.clone();
            async move {
                sqlx::query_as(
                    r#"
                    SELECT id, name, url, created_at, updated_at
                    FROM feeds
                    ORDER BY updated_at ASC, created_at ASC
                    LIMIT ?
                    "#,
                )
                .bind(limit)
                .fetch_all(&pool)
                .await
            }
        })
        .await?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Record a completed poll by bumping `updated_at` to now
    pub async fn mark_polled(&self, id: Uuid) -> Result<()> {
        let pool = self.db.pool().clone();
        let id_str = id.to_string();

        execute_with_retry(|| {
            let pool = pool.clone();
            let id_str = id_str.clone();
            async move {
                sqlx::query("UPDATE feeds SET updated_at = ? WHERE id = ?")
                    .bind(Utc::now())
                    .bind(&id_str)
                    .execute(&pool)
                    .await
                    .map(|_| ())
            }
        })
        .await?;

        Ok(())
    }

    /// Delete a feed (and, by cascade, its articles) by name
    pub async fn delete_by_name(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feeds WHERE name = ?")
            .bind(name)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get total feed count
    pub async fn count(&self) -> Result<u32> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feeds")
            .fetch_one(self.db.pool())
            .await?;

        Ok(count.0 as u32)
    }

    /// Overwrite timestamps, for arranging staleness in tests
    #[cfg(test)]
    pub async fn set_timestamps(
        &self,
        id: Uuid,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE feeds SET created_at = ?, updated_at = ? WHERE id = ?")
            .bind(created_at)
            .bind(updated_at)
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}
