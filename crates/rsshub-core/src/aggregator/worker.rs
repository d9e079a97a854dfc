use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::handoff::Handoff;
use crate::feed::{Feed, FeedSource};
use crate::storage::FeedStore;
use crate::Error;

/// Counts a worker as live for as long as it is held
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn enter(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(live))
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A pool member: takes one feed at a time off the queue until cancelled
pub(super) struct Worker {
    pub id: usize,
    pub store: Arc<dyn FeedStore>,
    pub source: Arc<dyn FeedSource>,
    pub queue: Arc<Handoff<Feed>>,
    pub cancel: CancellationToken,
    pub live: Arc<AtomicUsize>,
}

impl Worker {
    pub async fn run(self) {
        let _live = LiveGuard::enter(&self.live);
        debug!(worker = self.id, "Worker started");

        loop {
            let feed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                feed = self.queue.recv() => match feed {
                    Some(feed) => feed,
                    None => break,
                },
            };

            self.process_feed(feed).await;
        }

        debug!(worker = self.id, "Worker stopped");
    }

    /// Fetch one feed and persist its items.
    ///
    /// A failed fetch leaves the feed untouched so it stays at the front of the
    /// stale list. Once the fetch succeeds the feed is marked polled even if
    /// some items could not be stored.
    async fn process_feed(&self, feed: Feed) {
        let items = match self.source.fetch(&feed.url, &self.cancel).await {
            Ok(items) => items,
            Err(Error::Cancelled) => {
                debug!(worker = self.id, feed = %feed.name, "Fetch cancelled");
                return;
            }
            Err(e) => {
                warn!(worker = self.id, feed = %feed.name, "Failed to fetch feed: {}", e);
                return;
            }
        };

        let mut stored = 0usize;
        for item in &items {
            match self.store.upsert_article(feed.id, item).await {
                Ok(()) => stored += 1,
                Err(e) => warn!(
                    worker = self.id,
                    feed = %feed.name,
                    link = %item.link,
                    "Failed to store article: {}",
                    e
                ),
            }
        }

        if let Err(e) = self.store.mark_feed_polled(feed.id).await {
            warn!(worker = self.id, feed = %feed.name, "Failed to mark feed polled: {}", e);
            return;
        }

        debug!(
            worker = self.id,
            feed = %feed.name,
            stored,
            total = items.len(),
            "Feed polled"
        );
    }
}
