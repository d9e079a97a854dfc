//! Periodic feed aggregation.
//!
//! The [`Aggregator`] owns a scheduler loop and a resizable pool of workers.
//! Every tick the loop asks the store for as many stale feeds as there are
//! workers and hands them over one by one through an unbuffered queue, so a
//! busy pool slows dispatch down instead of piling work up.
//!
//! All mutable settings live behind one lock. The lock is only held to swap
//! fields and issue task spawns; waits, ticks and I/O run on snapshots.

mod handoff;
mod scheduler;
mod worker;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::duration::format_duration;
use crate::feed::{Feed, FeedSource};
use crate::storage::FeedStore;
use crate::{Error, Result};

use handoff::Handoff;
use worker::Worker;

/// Point-in-time view of the aggregator settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorStatus {
    pub running: bool,
    pub interval: Duration,
    pub workers: usize,
    pub live_workers: usize,
}

/// Scheduler and worker pool supervisor
#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn FeedStore>,
    source: Arc<dyn FeedSource>,
    state: Mutex<AggregatorState>,
    live_workers: Arc<AtomicUsize>,
}

struct AggregatorState {
    interval: Duration,
    workers: usize,
    started: bool,
    /// Scope of the current run; every worker token is a child of it
    root: Option<CancellationToken>,
    /// Fired to interrupt the scheduler wait after an interval change
    reset: CancellationToken,
    /// Created by the first start and reused afterwards
    queue: Option<Arc<Handoff<Feed>>>,
    /// One token per running worker, in spawn order
    worker_tokens: Vec<CancellationToken>,
    tracker: TaskTracker,
    next_worker_id: usize,
}

/// Settings copied out of the lock for one scheduler pass
struct Snapshot {
    interval: Duration,
    reset: CancellationToken,
    queue: Arc<Handoff<Feed>>,
    workers: usize,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Option<Snapshot> {
        let state = self.state();
        Some(Snapshot {
            interval: state.interval,
            reset: state.reset.clone(),
            queue: state.queue.clone()?,
            workers: state.workers,
        })
    }

    fn spawn_worker(
        &self,
        state: &mut AggregatorState,
        root: &CancellationToken,
        queue: &Arc<Handoff<Feed>>,
    ) {
        let token = root.child_token();
        let worker = Worker {
            id: state.next_worker_id,
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            queue: Arc::clone(queue),
            cancel: token.clone(),
            live: Arc::clone(&self.live_workers),
        };
        state.next_worker_id += 1;
        state.tracker.spawn(worker.run());
        state.worker_tokens.push(token);
    }
}

impl Aggregator {
    /// Create a stopped aggregator. `interval` and `workers` must be non-zero.
    pub fn new(
        store: Arc<dyn FeedStore>,
        source: Arc<dyn FeedSource>,
        interval: Duration,
        workers: usize,
    ) -> Result<Self> {
        validate_interval(interval)?;
        validate_workers(workers)?;

        let closed = TaskTracker::new();
        closed.close();

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                source,
                state: Mutex::new(AggregatorState {
                    interval,
                    workers,
                    started: false,
                    root: None,
                    reset: CancellationToken::new(),
                    queue: None,
                    worker_tokens: Vec::new(),
                    tracker: closed,
                    next_worker_id: 0,
                }),
                live_workers: Arc::new(AtomicUsize::new(0)),
            }),
        })
    }

    /// Launch the worker pool and the scheduler loop under a child of `parent`.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// [`Error::AlreadyRunning`] if already started, leaving the running
    /// instance untouched.
    pub fn start(&self, parent: &CancellationToken) -> Result<()> {
        let mut state = self.inner.state();
        if state.started {
            return Err(Error::AlreadyRunning(
                "aggregator is already started".to_string(),
            ));
        }

        let root = parent.child_token();
        let queue = Arc::clone(state.queue.get_or_insert_with(|| Arc::new(Handoff::new())));
        state.reset = CancellationToken::new();
        state.worker_tokens.clear();
        state.tracker = TaskTracker::new();

        for _ in 0..state.workers {
            self.inner.spawn_worker(&mut state, &root, &queue);
        }
        state
            .tracker
            .spawn(scheduler::run(Arc::clone(&self.inner), root.clone()));

        state.root = Some(root);
        state.started = true;

        info!(
            interval = %format_duration(state.interval),
            workers = state.workers,
            "Aggregator started"
        );
        Ok(())
    }

    /// Cancel the scheduler and every worker. A no-op when already stopped.
    ///
    /// Returns without waiting for the tasks; see [`Aggregator::shutdown`].
    pub fn stop(&self) {
        self.halt();
    }

    /// Stop, then wait until the scheduler and all workers have exited
    pub async fn shutdown(&self) {
        self.halt().wait().await;
    }

    /// Mark stopped and fire every captured token outside the lock.
    /// Returns the (closed) tracker of the last run.
    fn halt(&self) -> TaskTracker {
        let (root, reset, worker_tokens, tracker) = {
            let mut state = self.inner.state();
            let tracker = state.tracker.clone();
            if !state.started {
                return tracker;
            }
            state.started = false;
            (
                state.root.take(),
                state.reset.clone(),
                std::mem::take(&mut state.worker_tokens),
                tracker,
            )
        };

        reset.cancel();
        if let Some(root) = root {
            root.cancel();
        }
        for token in worker_tokens {
            token.cancel();
        }
        tracker.close();

        info!("Aggregator stopped");
        tracker
    }

    /// Change the tick interval and return the previous one.
    ///
    /// While running, the scheduler abandons its current wait and starts
    /// waiting again with the new interval.
    pub fn set_interval(&self, interval: Duration) -> Result<Duration> {
        validate_interval(interval)?;

        let mut state = self.inner.state();
        let previous = std::mem::replace(&mut state.interval, interval);
        if state.started {
            let fired = std::mem::replace(&mut state.reset, CancellationToken::new());
            fired.cancel();
        }

        info!(
            old = %format_duration(previous),
            new = %format_duration(interval),
            "Fetch interval changed"
        );
        Ok(previous)
    }

    /// Grow or shrink the worker pool and return the previous size.
    ///
    /// Shrinking cancels the most recently added workers; each finishes at
    /// most its current feed. While stopped only the target size is recorded.
    pub fn resize(&self, workers: usize) -> Result<usize> {
        validate_workers(workers)?;

        let mut state = self.inner.state();
        let previous = state.workers;
        if workers == previous {
            return Ok(previous);
        }

        if state.started {
            let running = state.worker_tokens.len();
            if workers > running {
                if let (Some(root), Some(queue)) = (state.root.clone(), state.queue.clone()) {
                    for _ in running..workers {
                        self.inner.spawn_worker(&mut state, &root, &queue);
                    }
                }
            } else {
                for token in state.worker_tokens.drain(workers..).rev() {
                    token.cancel();
                }
            }
        }
        state.workers = workers;

        info!(old = previous, new = workers, "Worker pool resized");
        Ok(previous)
    }

    pub fn current_interval(&self) -> Duration {
        self.inner.state().interval
    }

    pub fn current_workers(&self) -> usize {
        self.inner.state().workers
    }

    pub fn is_running(&self) -> bool {
        self.inner.state().started
    }

    /// Worker tasks that have not exited yet, including cancelled ones still
    /// finishing a feed
    pub fn live_workers(&self) -> usize {
        self.inner.live_workers.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> AggregatorStatus {
        let state = self.inner.state();
        AggregatorStatus {
            running: state.started,
            interval: state.interval,
            workers: state.workers,
            live_workers: self.live_workers(),
        }
    }
}

fn validate_interval(interval: Duration) -> Result<()> {
    if interval.is_zero() {
        return Err(Error::InvalidArgument(
            "interval must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_workers(workers: usize) -> Result<()> {
    if workers == 0 {
        return Err(Error::InvalidArgument(
            "worker count must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FetchedItem, NewFeed};
    use crate::storage::{ArticleRepository, Database, FeedRepository, SqliteStore};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::AtomicBool;
    use tokio::time::timeout;

    /// Returns the same items on every fetch
    struct StaticSource {
        items: Vec<FetchedItem>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FeedSource for StaticSource {
        async fn fetch(&self, _url: &str, _cancel: &CancellationToken) -> Result<Vec<FetchedItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.items.clone())
        }
    }

    /// Fails every fetch
    #[derive(Default)]
    struct FailingSource {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FeedSource for FailingSource {
        async fn fetch(&self, url: &str, _cancel: &CancellationToken) -> Result<Vec<FetchedItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::FeedParse(format!("HTTP 500 for URL: {}", url)))
        }
    }

    /// Blocks until its token is cancelled
    #[derive(Default)]
    struct HangingSource {
        entered: AtomicBool,
        aborted: AtomicBool,
    }

    #[async_trait::async_trait]
    impl FeedSource for HangingSource {
        async fn fetch(&self, _url: &str, cancel: &CancellationToken) -> Result<Vec<FetchedItem>> {
            self.entered.store(true, Ordering::SeqCst);
            cancel.cancelled().await;
            self.aborted.store(true, Ordering::SeqCst);
            Err(Error::Cancelled)
        }
    }

    /// Never used to fetch; for tests without feeds
    struct IdleSource;

    #[async_trait::async_trait]
    impl FeedSource for IdleSource {
        async fn fetch(&self, _url: &str, _cancel: &CancellationToken) -> Result<Vec<FetchedItem>> {
            Ok(Vec::new())
        }
    }

    async fn store_with_feed() -> (Database, Feed) {
        let db = Database::new_in_memory().await.unwrap();
        let repo = FeedRepository::new(&db);
        let feed = repo
            .create(&NewFeed {
                name: "blog".to_string(),
                url: "https://example.com/blog.xml".to_string(),
            })
            .await
            .unwrap();
        let past = Utc::now() - chrono::Duration::days(1);
        repo.set_timestamps(feed.id, past, past).await.unwrap();
        let feed = repo.find_by_id(feed.id).await.unwrap().unwrap();
        (db, feed)
    }

    fn aggregator(db: &Database, source: Arc<dyn FeedSource>, interval_ms: u64, workers: usize) -> Aggregator {
        Aggregator::new(
            Arc::new(SqliteStore::new(db.clone())),
            source,
            Duration::from_millis(interval_ms),
            workers,
        )
        .unwrap()
    }

    async fn idle_aggregator(workers: usize) -> Aggregator {
        let db = Database::new_in_memory().await.unwrap();
        aggregator(&db, Arc::new(IdleSource), 60_000, workers)
    }

    /// Poll `condition` every few milliseconds until it holds or two seconds pass
    async fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn test_new_rejects_zero_settings() {
        let db = Database::new_in_memory().await.unwrap();
        let store: Arc<dyn FeedStore> = Arc::new(SqliteStore::new(db));

        let zero_workers = Aggregator::new(
            Arc::clone(&store),
            Arc::new(IdleSource),
            Duration::from_secs(1),
            0,
        );
        assert!(matches!(zero_workers, Err(Error::InvalidArgument(_))));

        let zero_interval = Aggregator::new(store, Arc::new(IdleSource), Duration::ZERO, 1);
        assert!(matches!(zero_interval, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_resize_while_running_matches_live_workers() {
        let agg = idle_aggregator(2).await;
        let token = CancellationToken::new();
        agg.start(&token).unwrap();
        assert!(eventually(|| agg.live_workers() == 2).await);

        for target in [5, 1, 3, 3, 1] {
            agg.resize(target).unwrap();
            assert_eq!(agg.current_workers(), target);
            assert!(
                eventually(|| agg.live_workers() == target).await,
                "expected {} live workers, saw {}",
                target,
                agg.live_workers()
            );
        }

        agg.shutdown().await;
        assert_eq!(agg.live_workers(), 0);
    }

    #[tokio::test]
    async fn test_resize_returns_previous_size() {
        let agg = idle_aggregator(3).await;
        assert_eq!(agg.resize(7).unwrap(), 3);
        assert_eq!(agg.resize(7).unwrap(), 7);
        assert_eq!(agg.resize(2).unwrap(), 7);
    }

    #[tokio::test]
    async fn test_resize_zero_rejected() {
        let agg = idle_aggregator(3).await;
        let token = CancellationToken::new();
        agg.start(&token).unwrap();

        assert!(matches!(agg.resize(0), Err(Error::InvalidArgument(_))));
        assert_eq!(agg.current_workers(), 3);

        agg.shutdown().await;
        assert!(matches!(agg.resize(0), Err(Error::InvalidArgument(_))));
        assert_eq!(agg.current_workers(), 3);
    }

    #[tokio::test]
    async fn test_resize_while_stopped_applies_on_start() {
        let agg = idle_aggregator(1).await;
        agg.resize(4).unwrap();
        assert_eq!(agg.live_workers(), 0);

        let token = CancellationToken::new();
        agg.start(&token).unwrap();
        assert!(eventually(|| agg.live_workers() == 4).await);
        agg.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_interval_while_stopped_spawns_nothing() {
        let agg = idle_aggregator(2).await;

        let previous = agg.set_interval(Duration::from_secs(30)).unwrap();
        assert_eq!(previous, Duration::from_secs(60));
        assert_eq!(agg.current_interval(), Duration::from_secs(30));
        assert!(!agg.is_running());
        assert!(agg.inner.state().tracker.is_empty());
        assert_eq!(agg.live_workers(), 0);

        assert!(matches!(
            agg.set_interval(Duration::ZERO),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(agg.current_interval(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_double_start_fails_and_keeps_state() {
        let agg = idle_aggregator(2).await;
        let token = CancellationToken::new();
        agg.start(&token).unwrap();
        assert!(eventually(|| agg.live_workers() == 2).await);

        let err = agg.start(&token).unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning(_)));
        assert!(agg.is_running());
        assert_eq!(agg.current_workers(), 2);
        assert_eq!(agg.current_interval(), Duration::from_secs(60));
        assert_eq!(agg.inner.state().worker_tokens.len(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(agg.live_workers(), 2);
        agg.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_reuses_queue() {
        let agg = idle_aggregator(1).await;
        let token = CancellationToken::new();

        agg.start(&token).unwrap();
        let first = agg.inner.state().queue.clone().unwrap();
        agg.shutdown().await;
        assert!(!agg.is_running());

        // Stopping twice is harmless
        agg.stop();
        agg.shutdown().await;

        agg.start(&token).unwrap();
        let second = agg.inner.state().queue.clone().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(eventually(|| agg.live_workers() == 1).await);
        agg.shutdown().await;
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_tasks() {
        let agg = idle_aggregator(3).await;
        let parent = CancellationToken::new();
        agg.start(&parent).unwrap();
        assert!(eventually(|| agg.live_workers() == 3).await);

        parent.cancel();
        assert!(eventually(|| agg.live_workers() == 0).await);
        agg.shutdown().await;
    }

    #[tokio::test]
    async fn test_end_to_end_persists_items_once() {
        let (db, feed) = store_with_feed().await;
        let items = vec![
            FetchedItem {
                title: "First".to_string(),
                link: "https://example.com/1".to_string(),
                description: "one".to_string(),
                published_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            },
            FetchedItem {
                title: "Second".to_string(),
                link: "https://example.com/2".to_string(),
                description: "two".to_string(),
                published_at: Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap(),
            },
        ];
        let source = Arc::new(StaticSource {
            items,
            calls: AtomicUsize::new(0),
        });
        let agg = aggregator(&db, source.clone(), 50, 2);
        let token = CancellationToken::new();
        agg.start(&token).unwrap();

        // Wait for at least two polls so the upsert path runs twice
        assert!(eventually(|| source.calls.load(Ordering::SeqCst) >= 2).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        agg.shutdown().await;

        let articles = ArticleRepository::new(&db);
        assert_eq!(articles.count_by_feed(feed.id).await.unwrap(), 2);
        let stored = articles.list_by_feed(feed.id, 10).await.unwrap();
        assert_eq!(stored[0].title, "Second");
        assert_eq!(stored[1].title, "First");

        let polled = FeedRepository::new(&db).find_by_id(feed.id).await.unwrap().unwrap();
        assert!(polled.updated_at > feed.updated_at);
    }

    #[tokio::test]
    async fn test_failing_fetch_leaves_feed_stale() {
        let (db, feed) = store_with_feed().await;
        let source = Arc::new(FailingSource::default());
        let agg = aggregator(&db, source.clone(), 30, 2);
        let token = CancellationToken::new();
        agg.start(&token).unwrap();

        assert!(eventually(|| source.calls.load(Ordering::SeqCst) >= 3).await);
        assert_eq!(agg.live_workers(), 2);
        agg.shutdown().await;

        let repo = FeedRepository::new(&db);
        let unchanged = repo.find_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(unchanged.updated_at, feed.updated_at);
        assert_eq!(repo.list_stale(1).await.unwrap()[0].id, feed.id);
        assert_eq!(
            ArticleRepository::new(&db).count_by_feed(feed.id).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_stop_aborts_in_flight_fetch() {
        let (db, feed) = store_with_feed().await;
        let source = Arc::new(HangingSource::default());
        let agg = aggregator(&db, source.clone(), 20, 2);
        let token = CancellationToken::new();
        agg.start(&token).unwrap();

        assert!(eventually(|| source.entered.load(Ordering::SeqCst)).await);

        timeout(Duration::from_secs(1), agg.shutdown())
            .await
            .expect("scheduler and workers should exit after stop");
        assert!(source.aborted.load(Ordering::SeqCst));
        assert_eq!(agg.live_workers(), 0);
        assert!(agg.inner.state().tracker.is_empty());

        let unchanged = FeedRepository::new(&db).find_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(unchanged.updated_at, feed.updated_at);
    }

    #[tokio::test]
    async fn test_shrink_cancels_newest_workers_first() {
        let agg = idle_aggregator(1).await;
        let token = CancellationToken::new();
        agg.start(&token).unwrap();
        agg.resize(3).unwrap();
        let spawned = agg.inner.state().worker_tokens.clone();
        assert_eq!(spawned.len(), 3);

        agg.resize(1).unwrap();
        assert!(!spawned[0].is_cancelled());
        assert!(spawned[1].is_cancelled());
        assert!(spawned[2].is_cancelled());
        assert!(!token.is_cancelled());
        assert!(eventually(|| agg.live_workers() == 1).await);

        agg.shutdown().await;
        assert!(spawned[0].is_cancelled());
    }

    #[tokio::test]
    async fn test_interval_change_interrupts_wait() {
        let (db, feed) = store_with_feed().await;
        let source = Arc::new(StaticSource {
            items: Vec::new(),
            calls: AtomicUsize::new(0),
        });
        let agg = aggregator(&db, source.clone(), 3_600_000, 1);
        let token = CancellationToken::new();
        agg.start(&token).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        let previous = agg.set_interval(Duration::from_millis(20)).unwrap();
        assert_eq!(previous, Duration::from_secs(3600));
        assert!(eventually(|| source.calls.load(Ordering::SeqCst) >= 1).await);
        agg.shutdown().await;

        let polled = FeedRepository::new(&db).find_by_id(feed.id).await.unwrap().unwrap();
        assert!(polled.updated_at > feed.updated_at);
    }

    #[tokio::test]
    async fn test_stop_racing_interval_changes_terminates() {
        let agg = idle_aggregator(2).await;
        let token = CancellationToken::new();

        for round in 0..20u64 {
            agg.start(&token).unwrap();

            let spammer = {
                let agg = agg.clone();
                tokio::spawn(async move {
                    for n in 1..=50u64 {
                        let _ = agg.set_interval(Duration::from_millis(n + round));
                        tokio::task::yield_now().await;
                    }
                })
            };
            tokio::task::yield_now().await;

            timeout(Duration::from_secs(1), agg.shutdown())
                .await
                .expect("scheduler must observe the stop");
            spammer.await.unwrap();
            assert_eq!(agg.live_workers(), 0);
        }
    }
}
