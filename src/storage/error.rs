//! Error types for durable storage operations.

/// Errors that can occur while reading or committing to a [`LedgerStore`](super::LedgerStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend cannot be reached.
    #[error("store offline")]
    Offline,

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted data failed its checksum or could not be decoded.
    #[error("corrupt data at offset {offset}: {reason}")]
    Corrupt {
        /// Byte offset of the bad frame in the journal.
        offset: u64,
        /// What failed to verify.
        reason: String,
    },

    /// A batch tried to append a log entry out of order.
    ///
    /// The log only accepts the next sequence number; anything else means two
    /// writers raced past the ledger's tail lock.
    #[error("sequence conflict: expected {expected}, got {found}")]
    SequenceConflict {
        /// The next sequence the store would accept.
        expected: u64,
        /// The sequence the batch carried.
        found: u64,
    },
}
