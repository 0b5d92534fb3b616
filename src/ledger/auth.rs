//! Credential checks against the identity store.

use std::sync::Arc;

use tracing::{debug, warn};

use super::identity::IdentityStore;
use crate::Result;
use crate::types::{AuthOutcome, VoterId};

/// Verifies voter credentials.
///
/// Unknown voters and wrong credentials are indistinguishable: both return
/// [`AuthOutcome`] with an empty name, after the same hashing work.
#[derive(Clone)]
pub struct AuthenticationGate {
    identity: Arc<IdentityStore>,
}

impl AuthenticationGate {
    pub(crate) fn new(identity: Arc<IdentityStore>) -> Self {
        Self { identity }
    }

    /// Check a voter's credential. Never mutates anything.
    pub fn authenticate(&self, voter_id: &VoterId, credential: &str) -> Result<AuthOutcome> {
        let stored = {
            let state = self.identity.read_state()?;
            state
                .voters
                .get(voter_id.as_str())
                .map(|voter| (voter.name.clone(), voter.credential.clone()))
        };

        let hasher = self.identity.hasher();
        let outcome = match stored {
            Some((name, hash)) if hasher.verify(&hash, credential) => AuthOutcome {
                name,
                success: true,
            },
            Some(_) => AuthOutcome::rejected(),
            None => {
                hasher.verify_decoy(credential);
                AuthOutcome::rejected()
            }
        };

        if outcome.success {
            debug!(voter_id = %voter_id, "🔓 Voter authenticated");
        } else {
            warn!(voter_id = %voter_id, "🔒 Authentication failed");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ledger;
    use crate::ledger::{OperationContext, VoterDetails};

    fn ledger_with_voter() -> Ledger {
        let ledger = Ledger::for_testing().unwrap();
        ledger
            .identity()
            .register_voter(
                &OperationContext::unbounded(),
                &VoterId::new("V1"),
                VoterDetails::new("Dewi", "dewi@example.org", "correct horse"),
            )
            .unwrap();
        ledger
    }

    #[test]
    fn test_correct_credential() {
        let ledger = ledger_with_voter();
        let outcome = ledger
            .auth()
            .authenticate(&VoterId::new("V1"), "correct horse")
            .unwrap();
        assert_eq!(
            outcome,
            AuthOutcome {
                name: "Dewi".to_string(),
                success: true
            }
        );
    }

    #[test]
    fn test_unknown_and_wrong_look_the_same() {
        let ledger = ledger_with_voter();
        let wrong = ledger
            .auth()
            .authenticate(&VoterId::new("V1"), "battery staple")
            .unwrap();
        let unknown = ledger
            .auth()
            .authenticate(&VoterId::new("nobody"), "correct horse")
            .unwrap();

        assert_eq!(wrong, unknown);
        assert!(!wrong.success);
        assert!(wrong.name.is_empty());
    }

    #[test]
    fn test_authentication_records_nothing() {
        let ledger = ledger_with_voter();
        let before = ledger.history().len().unwrap();

        for attempt in ["a", "b", "correct horse"] {
            ledger
                .auth()
                .authenticate(&VoterId::new("V1"), attempt)
                .unwrap();
        }

        assert_eq!(ledger.history().len().unwrap(), before);
    }
}
