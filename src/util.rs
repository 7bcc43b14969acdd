use crate::error::{ArchiveError, ArchiveResult};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

/// Wrap an I/O future with a hard timeout, mapping elapsed timers onto the
/// `Timeout` error kind so callers can tell them apart from backend faults.
pub async fn with_timeout<T, F>(timeout_ms: u64, fut: F) -> ArchiveResult<T>
where
    F: Future<Output = ArchiveResult<T>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(res) => res,
        Err(_) => Err(ArchiveError::Timeout(timeout_ms)),
    }
}

/// Format a timestamp for logging.
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
