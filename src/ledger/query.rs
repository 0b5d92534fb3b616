//! Read-only views over live state and history.
//!
//! Every query that returns more than one value reads it under a single
//! state lock, so the answer corresponds to one point in the log.

use super::history::HistoryLog;
use super::identity::IdentityStore;
use crate::types::{
    Candidate, CandidateId, EntityKind, HistoryRecord, Tally, VoteCount, VoteCountChange,
    VoterId, VoterView,
};
use crate::{Error, Result};

/// Stateless query surface borrowed from a [`Ledger`](super::Ledger)
#[derive(Clone, Copy)]
pub struct QuerySurface<'a> {
    identity: &'a IdentityStore,
    history: &'a HistoryLog,
}

impl<'a> QuerySurface<'a> {
    pub(crate) fn new(identity: &'a IdentityStore, history: &'a HistoryLog) -> Self {
        Self { identity, history }
    }

    pub fn voter(&self, id: &VoterId) -> Result<VoterView> {
        self.identity
            .voter(id)?
            .map(|voter| voter.view())
            .ok_or_else(|| Error::not_found(EntityKind::Voter, id.as_str()))
    }

    /// Live voters in registration order
    pub fn voters(&self) -> Result<Vec<VoterView>> {
        let state = self.identity.read_state()?;
        Ok(state.voters.values().map(|voter| voter.view()).collect())
    }

    pub fn candidate(&self, id: &CandidateId) -> Result<Candidate> {
        self.identity
            .candidate(id)?
            .ok_or_else(|| Error::not_found(EntityKind::Candidate, id.as_str()))
    }

    /// Live candidates in registration order
    pub fn candidates(&self) -> Result<Vec<Candidate>> {
        let state = self.identity.read_state()?;
        Ok(state.candidates.values().cloned().collect())
    }

    pub fn vote_count(&self, id: &CandidateId) -> Result<u64> {
        Ok(self.candidate(id)?.vote_count)
    }

    pub fn vote_counts(&self) -> Result<Vec<VoteCount>> {
        Ok(self.tally()?.counts)
    }

    /// Whether the voter has a committed vote
    pub fn vote_status(&self, id: &VoterId) -> Result<bool> {
        Ok(self.voter(id)?.has_voted)
    }

    /// Every history record of one voter, including after deletion.
    ///
    /// An id that was never registered has an empty history.
    pub fn voter_history(&self, id: &VoterId) -> Result<Vec<HistoryRecord>> {
        self.history.history_for(EntityKind::Voter, id.as_str())
    }

    pub fn candidate_history(&self, id: &CandidateId) -> Result<Vec<HistoryRecord>> {
        self.history.history_for(EntityKind::Candidate, id.as_str())
    }

    pub fn all_voter_histories(&self) -> Result<Vec<HistoryRecord>> {
        self.history.all_histories(EntityKind::Voter)
    }

    pub fn all_candidate_histories(&self) -> Result<Vec<HistoryRecord>> {
        self.history.all_histories(EntityKind::Candidate)
    }

    pub fn vote_count_history(&self, id: &CandidateId) -> Result<Vec<VoteCountChange>> {
        self.history.vote_count_history(id)
    }

    pub fn all_vote_count_histories(&self) -> Result<Vec<VoteCountChange>> {
        self.history.all_vote_count_histories()
    }

    /// Counts for every live candidate, from one consistent snapshot
    pub fn tally(&self) -> Result<Tally> {
        let state = self.identity.read_state()?;
        let counts: Vec<VoteCount> = state
            .candidates
            .values()
            .map(|candidate| VoteCount {
                candidate_id: candidate.id.clone(),
                vote_count: candidate.vote_count,
            })
            .collect();
        let total_votes = counts.iter().map(|count| count.vote_count).sum();

        Ok(Tally {
            counts,
            total_votes,
            as_of_sequence: state.applied_sequence,
        })
    }
}
