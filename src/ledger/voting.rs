//! # Voting Engine
//!
//! Casting a vote is one serialized transaction per voter:
//!
//! 1. enter the voter's scope
//! 2. authenticate the credential
//! 3. check the voter exists and has not voted
//! 4. enter the candidate's scope and check the candidate exists
//! 5. commit the voter slot, the candidate slot and one [`VoteEvent`] in a
//!    single durable batch
//!
//! Scopes are always taken voter first, then candidate, then the log tail.
//! Any failure before step 5 leaves the ledger untouched.
//!
//! [`VoteEvent`]: crate::types::VoteEvent

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::auth::AuthenticationGate;
use super::history::HistoryLog;
use super::identity::IdentityStore;
use super::locks::enter;
use super::OperationContext;
use crate::crypto::CryptoUtils;
use crate::storage::{EntityKey, WriteBatch};
use crate::types::{Candidate, CandidateId, EntityKind, LogEvent, VoteReceipt, Voter, VoterId};
use crate::{Error, Result};

/// How far a vote got before it committed or was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteStage {
    Received,
    Authenticated,
    EligibilityChecked,
    Committed,
}

impl fmt::Display for VoteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            VoteStage::Received => "received",
            VoteStage::Authenticated => "authenticated",
            VoteStage::EligibilityChecked => "eligibility_checked",
            VoteStage::Committed => "committed",
        };
        f.write_str(stage)
    }
}

/// Casts votes
#[derive(Clone)]
pub struct VotingEngine {
    identity: Arc<IdentityStore>,
    history: Arc<HistoryLog>,
    gate: AuthenticationGate,
}

impl VotingEngine {
    pub(crate) fn new(
        identity: Arc<IdentityStore>,
        history: Arc<HistoryLog>,
        gate: AuthenticationGate,
    ) -> Self {
        Self {
            identity,
            history,
            gate,
        }
    }

    /// Cast one vote for `candidate_id` on behalf of `voter_id`.
    ///
    /// Of any number of concurrent calls for the same voter, at most one
    /// succeeds; the rest fail with [`Error::AlreadyVoted`].
    pub fn cast_vote(
        &self,
        ctx: &OperationContext,
        voter_id: &VoterId,
        candidate_id: &CandidateId,
        credential: &str,
    ) -> Result<VoteReceipt> {
        let mut stage = VoteStage::Received;
        debug!(voter_id = %voter_id, candidate_id = %candidate_id, %stage, "🗳️ Vote received");

        if voter_id.is_blank() {
            return Err(Error::validation("voter id must not be blank"));
        }
        if candidate_id.is_blank() {
            return Err(Error::validation("candidate id must not be blank"));
        }
        ctx.check("cast_vote")?;

        let voter_scope = self.identity.scope(EntityKind::Voter, voter_id.as_str())?;
        let _voter_guard = enter(&voter_scope);

        if !self.gate.authenticate(voter_id, credential)?.success {
            return Err(rejected(
                stage,
                voter_id,
                Error::AuthenticationFailed {
                    voter_id: voter_id.to_string(),
                },
            ));
        }
        stage = VoteStage::Authenticated;

        let voter = self.identity.voter(voter_id)?.ok_or_else(|| {
            rejected(stage, voter_id, Error::not_found(EntityKind::Voter, voter_id.as_str()))
        })?;
        if voter.has_voted {
            return Err(rejected(
                stage,
                voter_id,
                Error::AlreadyVoted {
                    voter_id: voter_id.to_string(),
                },
            ));
        }

        let candidate_scope = self
            .identity
            .scope(EntityKind::Candidate, candidate_id.as_str())?;
        let _candidate_guard = enter(&candidate_scope);

        let candidate = self.identity.candidate(candidate_id)?.ok_or_else(|| {
            rejected(
                stage,
                voter_id,
                Error::not_found(EntityKind::Candidate, candidate_id.as_str()),
            )
        })?;
        stage = VoteStage::EligibilityChecked;

        let now = Utc::now();
        let voter = Voter {
            has_voted: true,
            last_updated: now,
            ..voter
        };
        let candidate = Candidate {
            vote_count: candidate.vote_count + 1,
            last_updated: now,
            ..candidate
        };

        let mut writes = WriteBatch::new();
        writes
            .put(
                EntityKey::new(EntityKind::Voter, voter_id.as_str()),
                serde_json::to_vec(&voter)?,
            )
            .put(
                EntityKey::new(EntityKind::Candidate, candidate_id.as_str()),
                serde_json::to_vec(&candidate)?,
            );
        let event = LogEvent::vote(voter_id.clone(), candidate_id.clone(), now);

        let entries = self
            .history
            .append(ctx, "cast_vote", vec![event], writes, |entries| {
                self.identity.apply(entries, |state| {
                    state.voters.replace(voter_id.as_str(), voter);
                    state.candidates.replace(candidate_id.as_str(), candidate);
                })
            })
            .map_err(|e| rejected(stage, voter_id, e))?;
        stage = VoteStage::Committed;

        let entry = &entries[0];
        info!(
            voter_id = %voter_id,
            candidate_id = %candidate_id,
            sequence = entry.sequence(),
            %stage,
            "✅ Vote committed"
        );

        Ok(VoteReceipt {
            sequence: entry.sequence(),
            voter_id: voter_id.clone(),
            candidate_id: candidate_id.clone(),
            timestamp: now,
            entry_hash: CryptoUtils::hash_to_hex(&entry.entry_hash),
        })
    }
}

fn rejected(stage: VoteStage, voter_id: &VoterId, error: Error) -> Error {
    warn!(voter_id = %voter_id, %stage, error = %error, "❌ Vote rejected");
    error
}
