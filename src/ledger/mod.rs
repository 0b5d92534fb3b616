//! # Ledger Core
//!
//! The synchronous heart of the election ledger. A [`Ledger`] wires five
//! components over one durable [`LedgerStore`]:
//!
//! - [`HistoryLog`]: hash-chained, gapless record of every mutation
//! - [`IdentityStore`]: live voters and candidates
//! - [`AuthenticationGate`]: credential checks
//! - [`VotingEngine`]: the vote transaction
//! - [`QuerySurface`]: read-only views
//!
//! Every mutation takes an [`OperationContext`]. Use
//! [`LedgerService`](crate::LedgerService) for an awaitable surface with
//! per-operation timeouts.
//!
//! ## Example
//!
//! ```rust
//! use election_ledger::Ledger;
//! use election_ledger::ledger::{CandidateDetails, OperationContext, VoterDetails};
//! use election_ledger::types::{CandidateId, VoterId};
//!
//! let ledger = Ledger::for_testing()?;
//! let ctx = OperationContext::unbounded();
//!
//! ledger.identity().register_candidate(
//!     &ctx,
//!     &CandidateId::new("C1"),
//!     CandidateDetails::new("Ayu", "Open data", "Publish budgets"),
//! )?;
//! ledger.identity().register_voter(
//!     &ctx,
//!     &VoterId::new("V1"),
//!     VoterDetails::new("Budi", "budi@example.org", "s3cret"),
//! )?;
//!
//! let receipt = ledger.voting().cast_vote(
//!     &ctx,
//!     &VoterId::new("V1"),
//!     &CandidateId::new("C1"),
//!     "s3cret",
//! )?;
//! assert_eq!(receipt.sequence, 3);
//! assert_eq!(ledger.query().vote_count(&CandidateId::new("C1"))?, 1);
//! # Ok::<(), election_ledger::Error>(())
//! ```

pub mod auth;
pub mod context;
pub mod history;
pub mod identity;
mod locks;
pub mod query;
pub mod voting;

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{LedgerConfig, StorageBackend};
use crate::crypto::CredentialHasher;
use crate::storage::{FileStore, LedgerStore, MemoryStore};
use crate::{Error, Result};

pub use auth::AuthenticationGate;
pub use context::{AbandonSignal, OperationContext};
pub use history::{HistoryLog, IntegrityReport, IntegrityViolation, LogEntry, ViolationKind};
pub use identity::{CandidateDetails, IdentityStore, VoterDetails};
pub use query::QuerySurface;
pub use voting::{VoteStage, VotingEngine};

/// The election ledger
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    history: Arc<HistoryLog>,
    identity: Arc<IdentityStore>,
    auth: AuthenticationGate,
    voting: VotingEngine,
}

impl Ledger {
    /// Open a ledger over `store`, recovering whatever it already holds.
    ///
    /// The history chain is verified and live state is rebuilt before the
    /// ledger accepts any operation.
    pub fn open(store: Arc<dyn LedgerStore>, hasher: CredentialHasher) -> Result<Self> {
        let history = Arc::new(HistoryLog::recover(store.clone())?);
        let identity = Arc::new(IdentityStore::recover(
            store.as_ref(),
            hasher,
            history.clone(),
        )?);
        let auth = AuthenticationGate::new(identity.clone());
        let voting = VotingEngine::new(identity.clone(), history.clone(), auth.clone());

        info!(
            entries = history.len()?,
            next_sequence = history.next_sequence()?,
            "🚀 Ledger opened"
        );

        Ok(Self {
            store,
            history,
            identity,
            auth,
            voting,
        })
    }

    /// Open the store and hasher described by `config`
    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        let hasher = CredentialHasher::from_config(&config.security)?;
        let store: Arc<dyn LedgerStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::File => {
                let path = config.storage.data_path.as_ref().ok_or_else(|| {
                    Error::configuration("file storage requires a data path")
                })?;
                Arc::new(FileStore::open(path, config.storage.sync_writes)?)
            }
        };
        Self::open(store, hasher)
    }

    /// Empty in-memory ledger with a random pepper
    pub fn for_testing() -> Result<Self> {
        Self::open(Arc::new(MemoryStore::new()), CredentialHasher::for_testing())
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    pub fn auth(&self) -> &AuthenticationGate {
        &self.auth
    }

    pub fn voting(&self) -> &VotingEngine {
        &self.voting
    }

    pub fn query(&self) -> QuerySurface<'_> {
        QuerySurface::new(&self.identity, &self.history)
    }

    /// Verify the history chain, then check live state against both the
    /// log and the durable slots.
    ///
    /// Commits wait while this runs, so every violation reported is real.
    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        let report = self.history.verify_with(|entries, report| {
            let violations = self.identity.audit(self.store.as_ref(), entries)?;
            report.violations.extend(violations);
            Ok(())
        })?;

        if !report.is_valid() {
            warn!(violations = report.violations.len(), "🚨 Ledger integrity check failed");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{EntityKey, WriteBatch};
    use crate::types::{CandidateId, EntityKind, VoterId};

    fn overwrite_slot(store: &Arc<dyn LedgerStore>, kind: EntityKind, id: &str, bytes: Vec<u8>) {
        let mut batch = WriteBatch::new();
        batch.put(EntityKey::new(kind, id), bytes);
        store.commit(batch).unwrap();
    }

    fn seed(ledger: &Ledger) {
        let ctx = OperationContext::unbounded();
        ledger
            .identity()
            .register_candidate(
                &ctx,
                &CandidateId::new("C1"),
                CandidateDetails::new("Ayu", "v", "m"),
            )
            .unwrap();
        ledger
            .identity()
            .register_voter(
                &ctx,
                &VoterId::new("V1"),
                VoterDetails::new("Budi", "budi@example.org", "pw"),
            )
            .unwrap();
        ledger
            .voting()
            .cast_vote(&ctx, &VoterId::new("V1"), &CandidateId::new("C1"), "pw")
            .unwrap();
    }

    #[test]
    fn test_reopen_recovers_state() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let hasher = CredentialHasher::new(&[9u8; 32]).unwrap();
        {
            let ledger = Ledger::open(store.clone(), hasher.clone()).unwrap();
            seed(&ledger);
        }

        let ledger = Ledger::open(store, hasher).unwrap();
        let query = ledger.query();
        assert!(query.vote_status(&VoterId::new("V1")).unwrap());
        assert_eq!(query.vote_count(&CandidateId::new("C1")).unwrap(), 1);
        assert_eq!(query.tally().unwrap().as_of_sequence, 3);

        // Credentials survive the restart
        assert!(
            ledger
                .auth()
                .authenticate(&VoterId::new("V1"), "pw")
                .unwrap()
                .success
        );
        assert!(ledger.verify_integrity().unwrap().is_valid());
    }

    #[test]
    fn test_integrity_flags_tampered_slot() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(store.clone(), CredentialHasher::for_testing()).unwrap();
        seed(&ledger);

        let mut forged = ledger.identity().candidate(&CandidateId::new("C1")).unwrap().unwrap();
        forged.vote_count = 100;
        let mut batch = WriteBatch::new();
        batch.put(
            EntityKey::new(EntityKind::Candidate, "C1"),
            serde_json::to_vec(&forged).unwrap(),
        );
        store.commit(batch).unwrap();

        let report = ledger.verify_integrity().unwrap();
        assert!(!report.is_valid());
        assert!(report.violations.iter().any(|v| v.detail.contains("candidate C1")));

        // And a fresh open refuses the inconsistent store
        assert!(matches!(
            Ledger::open(store, CredentialHasher::for_testing()),
            Err(Error::Integrity { .. })
        ));
    }

    #[test]
    fn test_edited_slot_fails_reopen() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let hasher = CredentialHasher::new(&[3u8; 32]).unwrap();
        let ledger = Ledger::open(store.clone(), hasher.clone()).unwrap();
        ledger
            .identity()
            .register_candidate(
                &OperationContext::unbounded(),
                &CandidateId::new("C1"),
                CandidateDetails::new("Ayu", "v", "m"),
            )
            .unwrap();

        // Same count and stamps, different name, no history record
        let mut edited = ledger.identity().candidate(&CandidateId::new("C1")).unwrap().unwrap();
        edited.name = "Mallory".to_string();
        overwrite_slot(
            &store,
            EntityKind::Candidate,
            "C1",
            serde_json::to_vec(&edited).unwrap(),
        );

        let report = ledger.verify_integrity().unwrap();
        assert!(
            report
                .violations
                .iter()
                .any(|v| v.kind == ViolationKind::Diverged && v.detail.contains("candidate C1"))
        );

        match Ledger::open(store, hasher) {
            Err(Error::Integrity { sequence, message }) => {
                assert_eq!(sequence, 1);
                assert!(message.contains("candidate C1"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(reopened) => panic!(
                "reopened with name {}",
                reopened.query().candidate(&CandidateId::new("C1")).unwrap().name
            ),
        }
    }

    #[test]
    fn test_reopen_rebuilds_updates_after_a_vote() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let hasher = CredentialHasher::new(&[5u8; 32]).unwrap();
        let ctx = OperationContext::unbounded();
        let (voter, candidate) = {
            let ledger = Ledger::open(store.clone(), hasher.clone()).unwrap();
            seed(&ledger);
            let voter = ledger
                .identity()
                .update_voter(
                    &ctx,
                    &VoterId::new("V1"),
                    VoterDetails::new("Budi S", "budi.s@example.org", "pw2"),
                )
                .unwrap();
            let candidate = ledger
                .identity()
                .update_candidate(
                    &ctx,
                    &CandidateId::new("C1"),
                    CandidateDetails::new("Ayu L", "v2", "m2"),
                )
                .unwrap();
            (voter, candidate)
        };

        let ledger = Ledger::open(store, hasher).unwrap();
        assert_eq!(ledger.query().voter(&VoterId::new("V1")).unwrap(), voter.view());
        assert_eq!(ledger.query().candidate(&CandidateId::new("C1")).unwrap(), candidate);
        assert_eq!(candidate.vote_count, 1);
        assert!(ledger.auth().authenticate(&VoterId::new("V1"), "pw2").unwrap().success);
        assert!(ledger.verify_integrity().unwrap().is_valid());
    }

    #[test]
    fn test_integrity_reports_undecodable_slot() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(store.clone(), CredentialHasher::for_testing()).unwrap();
        seed(&ledger);

        overwrite_slot(&store, EntityKind::Voter, "V1", b"not json".to_vec());

        let report = ledger.verify_integrity().unwrap();
        let violation = report
            .violations
            .iter()
            .find(|v| v.detail.contains("voter V1"))
            .unwrap();
        assert_eq!(violation.kind, ViolationKind::Undecodable);
        assert_eq!(violation.sequence, 3);
    }

    #[test]
    fn test_from_config_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LedgerConfig::for_testing();
        config.storage.backend = StorageBackend::File;
        config.storage.data_path = Some(dir.path().join("ledger.journal"));

        {
            let ledger = Ledger::from_config(&config).unwrap();
            seed(&ledger);
        }

        let ledger = Ledger::from_config(&config).unwrap();
        assert_eq!(ledger.history().len().unwrap(), 3);
        assert!(ledger.verify_integrity().unwrap().is_valid());

        config.storage.data_path = None;
        assert!(matches!(
            Ledger::from_config(&config),
            Err(Error::Configuration { .. })
        ));
    }
}
