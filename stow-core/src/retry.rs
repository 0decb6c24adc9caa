//! Retry policies for idempotent backend reads.
//!
//! Only reads (existence checks, fetches, listings) go through here. Writes
//! and renames are never retried: the store's recovery path for a failed
//! write is the preserved history entry, not a blind second attempt.

use crate::{Result, StowError};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::io;
use std::time::Duration;
use tracing::warn;

/// Categorizes errors as transient (worth retrying) or permanent
pub trait RetryableError {
    /// Returns true if the error is transient and the operation should be retried
    fn is_transient(&self) -> bool;

    /// Returns true if the error is permanent and retries should stop
    fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

impl RetryableError for StowError {
    fn is_transient(&self) -> bool {
        match self {
            StowError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            StowError::Storage(msg) => {
                msg.contains("timed out")
                    || msg.contains("dispatch")
                    || msg.contains("InternalError")
                    || msg.contains("SlowDown")
                    || msg.contains("503")
                    || msg.contains("502")
                    || msg.contains("500")
            }
            _ => false,
        }
    }
}

/// Backoff policy for cloud object storage
pub fn cloud_storage_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(500))
        .with_max_interval(Duration::from_secs(10))
        .with_max_elapsed_time(Some(Duration::from_secs(60)))
        .with_multiplier(1.5)
        .build()
}

/// Run `op`, retrying transient failures according to `policy`
///
/// Permanent errors are returned immediately; once the policy gives up the
/// last transient error is returned.
pub fn retry_transient<T, F>(op_name: &'static str, policy: ExponentialBackoff, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempt = || match op() {
        Ok(value) => Ok(value),
        Err(err) if err.is_transient() => Err(backoff::Error::transient(err)),
        Err(err) => Err(backoff::Error::permanent(err)),
    };
    let notify = |err: StowError, delay: Duration| {
        warn!(
            operation = op_name,
            error = %err,
            retry_in_ms = delay.as_millis() as u64,
            "Transient storage failure, retrying"
        );
    };

    backoff::retry_notify(policy, attempt, notify).map_err(|err| match err {
        backoff::Error::Permanent(err) => err,
        backoff::Error::Transient { err, .. } => err,
    })
}
