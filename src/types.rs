//! # Core Types for the Election Ledger
//!
//! This module defines the records the ledger stores and the projections it
//! hands out. Identity records live in the identity store's current-state
//! maps; every change to them is captured as a [`HistoryRecord`] or a
//! [`VoteEvent`] in the history log.
//!
//! ## Type Categories
//!
//! ### Identifiers
//! - [`VoterId`], [`CandidateId`]: caller-chosen, immutable string keys
//! - [`EntityKind`]: which registry an id belongs to
//!
//! ### Entities
//! - [`Voter`]: a registered voter, including the hashed credential
//! - [`VoterView`]: the public projection of a voter (no credential)
//! - [`Candidate`]: a registered candidate and their running vote count
//!
//! ### Audit trail
//! - [`HistoryRecord`]: one create/update/delete of an entity
//! - [`VoteEvent`]: one committed vote
//! - [`LogEvent`]: either of the above, as stored in the log
//!
//! ### Results
//! - [`VoteReceipt`], [`AuthOutcome`], [`VoteCount`], [`VoteCountChange`], [`Tally`]
//!
//! ## Usage Examples
//!
//! ```rust
//! use election_ledger::types::{Candidate, CandidateId};
//! use chrono::Utc;
//!
//! let candidate = Candidate {
//!     id: CandidateId::new("C1"),
//!     name: "Ayu".to_string(),
//!     visi: "Transparent budgets".to_string(),
//!     misi: "Publish every invoice".to_string(),
//!     vote_count: 0,
//!     last_updated: Utc::now(),
//! };
//!
//! assert_eq!(candidate.id.as_str(), "C1");
//! ```

use crate::crypto::CredentialHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte Blake3 hash
pub type Hash = [u8; 32];

/// Wall-clock instant attached to every mutation
pub type Timestamp = DateTime<Utc>;

/// Position of an entry in the history log.
///
/// Sequence numbers start at 1 and are assigned without gaps; a failed
/// commit never consumes one.
pub type Sequence = u64;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a caller-supplied id
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw id
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the id is empty or whitespace only
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Unique, immutable voter key
    VoterId
);

string_id!(
    /// Unique, immutable candidate key
    CandidateId
);

/// Which registry an entity belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Voter,
    Candidate,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Voter => f.write_str("voter"),
            EntityKind::Candidate => f.write_str("candidate"),
        }
    }
}

/// Kind of mutation captured by a [`HistoryRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// A registered voter
///
/// The credential is a salted keyed hash; it is persisted in the voter's
/// durable slot but never copied into history or public projections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voter {
    pub id: VoterId,
    pub name: String,
    pub email: String,
    pub(crate) credential: CredentialHash,
    /// Flips false to true exactly once, when a vote commits
    pub has_voted: bool,
    pub last_updated: Timestamp,
}

impl Voter {
    /// Public projection without credential material
    pub fn view(&self) -> VoterView {
        VoterView {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            has_voted: self.has_voted,
            last_updated: self.last_updated,
        }
    }
}

/// Public projection of a [`Voter`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterView {
    pub id: VoterId,
    pub name: String,
    pub email: String,
    pub has_voted: bool,
    pub last_updated: Timestamp,
}

/// A registered candidate
///
/// `vote_count` is only ever changed by the voting engine and always equals
/// the number of committed [`VoteEvent`]s naming this candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
    /// Platform statement
    pub visi: String,
    /// Platform detail
    pub misi: String,
    pub vote_count: u64,
    pub last_updated: Timestamp,
}

/// Entity state captured by a [`HistoryRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state")]
pub enum Snapshot {
    Voter(VoterView),
    Candidate(Candidate),
}

impl Snapshot {
    /// Registry the snapshot belongs to
    pub fn kind(&self) -> EntityKind {
        match self {
            Snapshot::Voter(_) => EntityKind::Voter,
            Snapshot::Candidate(_) => EntityKind::Candidate,
        }
    }

    /// Id of the captured entity
    pub fn entity_id(&self) -> &str {
        match self {
            Snapshot::Voter(voter) => voter.id.as_str(),
            Snapshot::Candidate(candidate) => candidate.id.as_str(),
        }
    }
}

/// Immutable audit entry for one identity mutation
///
/// For `Create` and `Update` the snapshot is the state after the operation.
/// For `Delete` (the tombstone) it is the final state that was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub sequence: Sequence,
    pub kind: EntityKind,
    pub entity_id: String,
    pub operation: Operation,
    pub snapshot: Snapshot,
    pub timestamp: Timestamp,
}

/// Immutable record of one voter voting for one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEvent {
    pub sequence: Sequence,
    pub voter_id: VoterId,
    pub candidate_id: CandidateId,
    pub timestamp: Timestamp,
}

/// Payload of one history log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LogEvent {
    History(HistoryRecord),
    Vote(VoteEvent),
}

impl LogEvent {
    /// Build an identity mutation record; the log assigns the sequence.
    pub fn history(operation: Operation, snapshot: Snapshot, timestamp: Timestamp) -> Self {
        LogEvent::History(HistoryRecord {
            sequence: 0,
            kind: snapshot.kind(),
            entity_id: snapshot.entity_id().to_string(),
            operation,
            snapshot,
            timestamp,
        })
    }

    /// Build a vote record; the log assigns the sequence.
    pub fn vote(voter_id: VoterId, candidate_id: CandidateId, timestamp: Timestamp) -> Self {
        LogEvent::Vote(VoteEvent {
            sequence: 0,
            voter_id,
            candidate_id,
            timestamp,
        })
    }

    pub fn sequence(&self) -> Sequence {
        match self {
            LogEvent::History(record) => record.sequence,
            LogEvent::Vote(event) => event.sequence,
        }
    }

    pub(crate) fn set_sequence(&mut self, sequence: Sequence) {
        match self {
            LogEvent::History(record) => record.sequence = sequence,
            LogEvent::Vote(event) => event.sequence = sequence,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            LogEvent::History(record) => record.timestamp,
            LogEvent::Vote(event) => event.timestamp,
        }
    }
}

/// Proof of a committed vote, returned to the voter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    /// Sequence number of the vote's log entry
    pub sequence: Sequence,
    pub voter_id: VoterId,
    pub candidate_id: CandidateId,
    pub timestamp: Timestamp,
    /// Hex-encoded chain hash of the vote's log entry
    pub entry_hash: String,
}

/// Result of a login attempt
///
/// An unknown voter and a wrong credential produce the same shape: an empty
/// name and `success == false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOutcome {
    pub name: String,
    pub success: bool,
}

impl AuthOutcome {
    pub(crate) fn rejected() -> Self {
        Self {
            name: String::new(),
            success: false,
        }
    }
}

/// Committed vote count for one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCount {
    pub candidate_id: CandidateId,
    pub vote_count: u64,
}

/// One step in a candidate's vote count history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCountChange {
    pub sequence: Sequence,
    pub candidate_id: CandidateId,
    pub voter_id: VoterId,
    /// Count after this vote
    pub vote_count: u64,
    pub timestamp: Timestamp,
}

/// All vote counts taken from a single snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Live candidates, in registration order
    pub counts: Vec<VoteCount>,
    /// Sum over live candidates
    pub total_votes: u64,
    /// Last log sequence reflected in the snapshot (0 for an empty log)
    pub as_of_sequence: Sequence,
}
