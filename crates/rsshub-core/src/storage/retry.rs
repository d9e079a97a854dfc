//! Retry helpers for SQLite lock contention.
//!
//! Several workers upsert articles and touch feeds at the same time, so a write
//! can hit `SQLITE_BUSY` even with a busy timeout. These helpers retry such
//! transient failures with exponential backoff and give up on anything else.

use std::future::Future;
use std::time::Duration;

/// Maximum number of retry attempts for database operations
pub const MAX_RETRIES: u32 = 5;

/// Check if a SQLite error is transient and should be retried
///
/// Matches the primary codes for busy (5), locked (6) and I/O (10) errors plus
/// their common extended variants (`SQLITE_BUSY_SNAPSHOT`, `SQLITE_IOERR_*`).
fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string());
            matches!(
                code.as_deref(),
                Some("5")      // SQLITE_BUSY
                | Some("6")    // SQLITE_LOCKED
                | Some("10")   // SQLITE_IOERR
                | Some("262")  // SQLITE_LOCKED_SHAREDCACHE
                | Some("517")  // SQLITE_BUSY_RECOVERY
                | Some("1032") // SQLITE_BUSY_SNAPSHOT
                | Some("2314") // SQLITE_IOERR_WRITE
                | Some("5386") // SQLITE_IOERR_LOCK
            )
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Base delay 200ms, doubling each attempt: 200ms, 400ms, 800ms, 1600ms, 3200ms
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(200 * 2u64.pow(attempt.saturating_sub(1)))
}

/// Execute a write operation, retrying transient errors
pub async fn execute_with_retry<F, Fut>(operation: F) -> std::result::Result<(), sqlx::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<(), sqlx::Error>>,
{
    query_with_retry(operation).await
}

/// Execute an operation returning `T`, retrying transient errors
pub async fn query_with_retry<F, Fut, T>(operation: F) -> std::result::Result<T, sqlx::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if is_transient_error(&e) && attempts < MAX_RETRIES => {
                attempts += 1;
                let delay = backoff_delay(attempts);
                tracing::debug!(
                    error = %e,
                    attempt = attempts,
                    max_retries = MAX_RETRIES,
                    delay_ms = delay.as_millis(),
                    "Database busy, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
