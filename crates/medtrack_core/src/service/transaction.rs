//! Transaction scopes and lock-contention retry.
//!
//! # Responsibility
//! - Run mutations inside one `BEGIN IMMEDIATE` transaction that also bumps
//!   the store version.
//! - Run reads inside one deferred transaction so multi-statement reads see a
//!   single committed snapshot.
//! - Retry `SQLITE_BUSY`/`SQLITE_LOCKED` with bounded exponential backoff.
//!
//! # Invariants
//! - A transaction that is dropped before `commit` rolls back entirely.
//! - The published version is only advanced after a successful commit.

use crate::service::error::{TrackerError, TrackerResult};
use crate::service::sync::SyncCoordinator;
use log::warn;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::thread;
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(20);

/// Bounded exponential backoff for lock contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay slept after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Runs `op` until it succeeds, fails with a non-contention error, or the
/// attempt budget is spent (then `TrackerError::LockTimeout`).
pub fn run_with_retry<T>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: impl FnMut() -> TrackerResult<T>,
) -> TrackerResult<T> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Err(err) if err.is_lock_contention() => {
                if attempt >= max_attempts {
                    warn!(
                        "event=tx_retry module=transaction status=exhausted op={} attempts={}",
                        operation, attempt
                    );
                    return Err(TrackerError::LockTimeout { attempts: attempt });
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    "event=tx_retry module=transaction status=busy op={} attempt={} delay_ms={}",
                    operation,
                    attempt,
                    delay.as_millis()
                );
                thread::sleep(delay);
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Runs `f` inside an immediate (write-locking) transaction, bumps the store
/// version in the same transaction, commits, then publishes the version.
///
/// Returns the closure value with the committed version.
pub fn run_write<T>(
    conn: &mut Connection,
    sync: &SyncCoordinator,
    f: impl FnOnce(&Transaction<'_>) -> TrackerResult<T>,
) -> TrackerResult<(T, u64)> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    let version = sync.bump(&tx)?;
    tx.commit()?;
    sync.publish(version);
    Ok((value, version))
}

/// Runs `f` inside a deferred transaction and discards it afterwards.
pub fn run_read<T>(
    conn: &mut Connection,
    f: impl FnOnce(&Transaction<'_>) -> TrackerResult<T>,
) -> TrackerResult<T> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
    let value = f(&tx)?;
    tx.finish()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;
    use std::cell::Cell;

    fn busy() -> TrackerError {
        rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None).into()
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(20));
        assert_eq!(policy.delay_after(2), Duration::from_millis(40));
        assert_eq!(policy.delay_after(4), Duration::from_millis(160));
    }

    #[test]
    fn contention_is_retried_until_success() {
        let calls = Cell::new(0);
        let result = run_with_retry(&fast_policy(5), "test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(busy())
            } else {
                Ok(calls.get())
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn exhausted_attempts_become_lock_timeout() {
        let calls = Cell::new(0);
        let result: TrackerResult<()> = run_with_retry(&fast_policy(3), "test", || {
            calls.set(calls.get() + 1);
            Err(busy())
        });
        assert!(matches!(result, Err(TrackerError::LockTimeout { attempts: 3 })));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: TrackerResult<()> = run_with_retry(&fast_policy(5), "test", || {
            calls.set(calls.get() + 1);
            Err(TrackerError::validation("name", "empty"))
        });
        assert!(matches!(result, Err(TrackerError::Validation { .. })));
        assert_eq!(calls.get(), 1);
    }
}
