//! Change-version coordination for polling consumers.
//!
//! # Responsibility
//! - Stamp every committed mutation with a strictly increasing version.
//! - Answer "has anything changed since `v`?" without loading state.
//!
//! # Invariants
//! - The authoritative version lives in `metadata` and is bumped inside the
//!   mutating transaction, so other processes observe it on commit.
//! - The in-process cache only moves forward (`fetch_max`).

use crate::repo::metadata_repo::SqliteMetadataRepository;
use crate::service::error::TrackerResult;
use rusqlite::Connection;
use std::sync::atomic::{AtomicU64, Ordering};

/// Owner of the store version counter.
#[derive(Debug, Default)]
pub struct SyncCoordinator {
    observed: AtomicU64,
}

impl SyncCoordinator {
    /// Increments the persisted version inside the caller's write transaction.
    ///
    /// The returned value must only be published after commit.
    pub fn bump(&self, conn: &Connection) -> TrackerResult<u64> {
        let repo = SqliteMetadataRepository::try_new(conn)?;
        Ok(repo.bump_version()?)
    }

    /// Reads the committed version and refreshes the cache.
    pub fn read(&self, conn: &Connection) -> TrackerResult<u64> {
        let repo = SqliteMetadataRepository::try_new(conn)?;
        let version = repo.read_version()?;
        self.publish(version);
        Ok(version)
    }

    /// Records a committed version; older values are ignored.
    pub fn publish(&self, version: u64) {
        self.observed.fetch_max(version, Ordering::AcqRel);
    }

    /// Highest version this process has committed or read. Lock-free; may lag
    /// behind writes made by other processes.
    pub fn last_observed(&self) -> u64 {
        self.observed.load(Ordering::Acquire)
    }
}
