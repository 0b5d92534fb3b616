//! Error handling for the election ledger

use crate::storage::StoreError;
use crate::types::EntityKind;

/// Result type alias for the election ledger
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the election ledger
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An entity with this id exists, or existed and was deleted
    #[error("{kind} {id} already exists")]
    DuplicateId { kind: EntityKind, id: String },

    /// No live entity with this id
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    /// Unknown voter or wrong credential (deliberately indistinguishable)
    #[error("Authentication failed for voter {voter_id}")]
    AuthenticationFailed { voter_id: String },

    /// The voter has a committed vote
    #[error("Voter {voter_id} has already voted")]
    AlreadyVoted { voter_id: String },

    /// The durable store rejected or could not complete a write
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    /// The caller's deadline elapsed before the commit point
    #[error("Operation {operation} timed out")]
    Timeout { operation: String },

    /// The caller abandoned the operation before the commit point
    #[error("Operation {operation} cancelled")]
    Cancelled { operation: String },

    /// Validation errors
    #[error("Validation failed: {field}")]
    Validation { field: String },

    /// Recorded history does not verify
    #[error("Integrity violation at sequence {sequence}: {message}")]
    Integrity { sequence: u64, message: String },

    /// The durable store failed its own frame checks
    #[error("Corrupt storage at byte {offset}: {reason}")]
    CorruptStorage { offset: u64, reason: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a new duplicate id error
    pub fn duplicate(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::DuplicateId {
            kind,
            id: id.into(),
        }
    }

    /// Create a new not found error
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
        }
    }

    /// Create a new configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// `Timeout` and `StorageUnavailable` never leave a partial commit, so a
    /// retry is safe. A timed-out vote that did land is rejected on retry
    /// with `AlreadyVoted`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::StorageUnavailable { .. })
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt { offset, reason } => Self::CorruptStorage { offset, reason },
            other => Self::storage(other.to_string()),
        }
    }
}

/// Convenience macros for creating specific error types
#[macro_export]
macro_rules! storage_error {
    ($msg:expr) => {
        $crate::Error::storage($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::storage(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::Error::internal($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::internal(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let duplicate = Error::duplicate(EntityKind::Voter, "V1");
        assert!(matches!(duplicate, Error::DuplicateId { .. }));
        assert_eq!(duplicate.to_string(), "voter V1 already exists");

        let missing = Error::not_found(EntityKind::Candidate, "C9");
        assert_eq!(missing.to_string(), "candidate C9 not found");

        let validation_err = Error::validation("name");
        assert!(matches!(validation_err, Error::Validation { .. }));
    }

    #[test]
    fn test_retry_classification() {
        assert!(Error::storage("disk gone").is_retryable());
        assert!(
            Error::Timeout {
                operation: "cast_vote".into()
            }
            .is_retryable()
        );
        assert!(
            !Error::AlreadyVoted {
                voter_id: "V1".into()
            }
            .is_retryable()
        );
        assert!(!Error::duplicate(EntityKind::Voter, "V1").is_retryable());
    }

    #[test]
    fn test_store_error_conversion() {
        let corrupt: Error = StoreError::Corrupt {
            offset: 7,
            reason: "bad checksum".into(),
        }
        .into();
        assert!(matches!(corrupt, Error::CorruptStorage { offset: 7, .. }));
        assert_eq!(
            corrupt.to_string(),
            "Corrupt storage at byte 7: bad checksum"
        );
        assert!(!corrupt.is_retryable());

        let offline: Error = StoreError::Offline.into();
        assert!(matches!(offline, Error::StorageUnavailable { .. }));
    }

    #[test]
    fn test_error_macros() {
        let storage_err = storage_error!("write failed at {}", 3);
        assert!(matches!(storage_err, Error::StorageUnavailable { .. }));

        let internal_err = internal_error!("lock poisoned");
        assert!(matches!(internal_err, Error::Internal { .. }));
    }
}
