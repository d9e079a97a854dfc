use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handoff::Handoff;
use super::Inner;
use crate::feed::Feed;
use crate::storage::FeedStore;

/// Tick loop for one armed lifetime. Returns once `root` is cancelled.
pub(super) async fn run(inner: Arc<Inner>, root: CancellationToken) {
    debug!("Scheduler loop started");

    loop {
        // A stop fires the reset signal as well as the root; whichever wakes
        // the wait, the next pass ends here.
        if root.is_cancelled() {
            break;
        }

        let Some(snapshot) = inner.snapshot() else {
            break;
        };

        tokio::select! {
            biased;
            _ = root.cancelled() => break,
            _ = snapshot.reset.cancelled() => {
                debug!("Scheduler wait interrupted, re-reading settings");
                continue;
            }
            _ = tokio::time::sleep(snapshot.interval) => {}
        }

        if !dispatch(inner.store.as_ref(), &snapshot.queue, snapshot.workers, &root).await {
            break;
        }
    }

    info!("Scheduler loop stopped");
}

/// Offer up to `workers` of the stalest feeds to the pool.
///
/// Returns `false` if `root` was cancelled while loading feeds or waiting for
/// a free worker; the remaining feeds are left for a later tick.
async fn dispatch(
    store: &dyn FeedStore,
    queue: &Handoff<Feed>,
    workers: usize,
    root: &CancellationToken,
) -> bool {
    let loaded = tokio::select! {
        biased;
        _ = root.cancelled() => return false,
        loaded = store.list_stale_feeds(workers) => loaded,
    };

    let feeds = match loaded {
        Ok(feeds) => feeds,
        Err(e) => {
            warn!("Failed to load stale feeds: {}", e);
            return true;
        }
    };

    debug!(count = feeds.len(), workers, "Dispatching stale feeds");

    for feed in feeds {
        tokio::select! {
            biased;
            _ = root.cancelled() => return false,
            _ = queue.send(feed) => {}
        }
    }

    true
}
