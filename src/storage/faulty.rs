//! A [`LedgerStore`] wrapper that injects outages.
//!
//! `FaultyStore` wraps any `Arc<dyn LedgerStore>` and can be switched
//! offline, or told to fail a number of upcoming commits, so tests can
//! check that a failed durable write leaves no trace in the ledger.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use election_ledger::storage::{FaultyStore, MemoryStore};
//!
//! let store = FaultyStore::new(Arc::new(MemoryStore::new()));
//! store.fail_next_commits(1);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::debug;

use super::{EntityKey, LedgerStore, StoreError, WriteBatch};
use crate::types::{EntityKind, Sequence};

/// A [`LedgerStore`] wrapper with switchable failures.
pub struct FaultyStore {
    inner: Arc<dyn LedgerStore>,
    offline: AtomicBool,
    failing_commits: AtomicU64,
    commits: AtomicU64,
}

impl FaultyStore {
    /// Wrap an existing store; pass-through until told otherwise.
    pub fn new(inner: Arc<dyn LedgerStore>) -> Self {
        Self {
            inner,
            offline: AtomicBool::new(false),
            failing_commits: AtomicU64::new(0),
            commits: AtomicU64::new(0),
        }
    }

    /// Fail every read and write while `offline` is true.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `count` commits, then recover.
    pub fn fail_next_commits(&self, count: u64) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Number of commits that reached the inner store.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Offline);
        }
        Ok(())
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl LedgerStore for FaultyStore {
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.check_online()?;
        if self.take_injected_failure() {
            debug!(ops = batch.len(), "injected commit failure");
            return Err(StoreError::Offline);
        }
        self.inner.commit(batch)?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, key: &EntityKey) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_online()?;
        self.inner.get(key)
    }

    fn entities(&self, kind: EntityKind) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        self.check_online()?;
        self.inner.entities(kind)
    }

    fn scan_log(&self, from: Sequence) -> Result<Vec<(Sequence, Vec<u8>)>, StoreError> {
        self.check_online()?;
        self.inner.scan_log(from)
    }
}
