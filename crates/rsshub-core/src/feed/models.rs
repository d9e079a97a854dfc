use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered RSS source. `updated_at` doubles as the staleness signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to register a new feed
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub name: String,
    pub url: String,
}

/// A persisted item, unique per `(feed_id, link)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Item produced by a fetcher, in transit to storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
}

impl Feed {
    /// Time since the feed was last polled (or created)
    pub fn staleness(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }
}
