//! Durable storage collaborator for the ledger.
//!
//! The ledger needs three things from a backend: an atomic multi-key write,
//! point lookup of entity slots by id, and an ordered scan of the log by
//! sequence number. [`LedgerStore`] captures exactly that, with three
//! implementations:
//!
//! - [`MemoryStore`]: `RwLock`-guarded maps, for tests and ephemeral ledgers.
//! - [`FileStore`]: an append-only journal, one checksummed batch per line.
//! - [`FaultyStore`]: a wrapper that injects outages for failure testing.

mod error;
mod faulty;
mod file;
mod memory;

use serde::{Deserialize, Serialize};

use crate::types::{EntityKind, Sequence};

pub use error::StoreError;
pub use faulty::FaultyStore;
pub use file::FileStore;
pub use memory::MemoryStore;

pub(crate) use memory::Tables;

/// Address of an entity's durable slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Create or overwrite an entity slot.
    Put { key: EntityKey, value: Vec<u8> },
    /// Remove an entity slot.
    Delete { key: EntityKey },
    /// Append a log entry at the given sequence.
    Append { sequence: Sequence, entry: Vec<u8> },
}

/// A set of writes that becomes durable together or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: EntityKey, value: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Put { key, value });
        self
    }

    pub fn delete(&mut self, key: EntityKey) -> &mut Self {
        self.ops.push(BatchOp::Delete { key });
        self
    }

    pub fn append(&mut self, sequence: Sequence, entry: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Append { sequence, entry });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

impl From<Vec<BatchOp>> for WriteBatch {
    fn from(ops: Vec<BatchOp>) -> Self {
        Self { ops }
    }
}

/// Trait for the ledger's durable substrate.
///
/// All implementations must be `Send + Sync`; the ledger calls them from
/// whichever thread holds its log tail lock.
pub trait LedgerStore: Send + Sync {
    /// Apply every op in the batch atomically.
    ///
    /// On error, none of the batch is visible, now or after a restart.
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Read one entity slot. Returns `None` if absent.
    fn get(&self, key: &EntityKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// List every entity slot of one kind as `(id, value)` pairs.
    fn entities(&self, kind: EntityKind) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Log entries with `sequence >= from`, ascending.
    fn scan_log(&self, from: Sequence) -> Result<Vec<(Sequence, Vec<u8>)>, StoreError>;
}
