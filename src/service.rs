//! # Ledger Service
//!
//! Awaitable facade over a shared [`Ledger`]. Every call runs on tokio's
//! blocking pool under a deadline:
//!
//! - if the deadline passes first, the caller gets [`Error::Timeout`]; the
//!   blocking work sees the expired context at its commit point and
//!   abandons unless it already committed
//! - if the returned future is dropped, the blocking work is abandoned and
//!   stops at its commit point with [`Error::Cancelled`]
//!
//! Either way an operation commits completely or not at all.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::LedgerConfig;
use crate::ledger::{
    AbandonSignal, CandidateDetails, Ledger, OperationContext, QuerySurface, VoterDetails,
};
use crate::types::{AuthOutcome, Candidate, CandidateId, VoteReceipt, Voter, VoterId};
use crate::{Error, Result, internal_error};

/// Raises the abandon signal on drop unless disarmed
struct AbandonOnDrop {
    signal: Option<AbandonSignal>,
}

impl AbandonOnDrop {
    fn disarm(mut self) {
        self.signal = None;
    }
}

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        if let Some(signal) = self.signal.take() {
            signal.abandon();
        }
    }
}

/// Async, deadline-bounded access to a [`Ledger`]
#[derive(Clone)]
pub struct LedgerService {
    ledger: Arc<Ledger>,
    timeout: Duration,
}

impl LedgerService {
    pub fn new(ledger: Arc<Ledger>, timeout: Duration) -> Self {
        Self { ledger, timeout }
    }

    /// Open the ledger described by `config`
    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        let ledger = Ledger::from_config(config)?;
        Ok(Self::new(Arc::new(ledger), config.service.operation_timeout()))
    }

    /// Same ledger, different deadline
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            ledger: self.ledger.clone(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Read-only views; queries never block on writers for long
    pub fn query(&self) -> QuerySurface<'_> {
        self.ledger.query()
    }

    async fn run<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Ledger, &OperationContext) -> Result<T> + Send + 'static,
    {
        let (ctx, signal) = OperationContext::with_timeout(self.timeout).abandonable();
        let guard = AbandonOnDrop {
            signal: Some(signal),
        };

        let ledger = self.ledger.clone();
        let task = tokio::task::spawn_blocking(move || work(&ledger, &ctx));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => {
                guard.disarm();
                debug!(operation, ok = result.is_ok(), "operation finished");
                result
            }
            Ok(Err(join_error)) => {
                guard.disarm();
                Err(internal_error!("{} task failed: {}", operation, join_error))
            }
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "⏱️ Operation timed out"
                );
                drop(guard);
                Err(Error::Timeout {
                    operation: operation.to_string(),
                })
            }
        }
    }

    pub async fn register_voter(
        &self,
        id: impl Into<VoterId>,
        name: impl Into<String>,
        email: impl Into<String>,
        credential: impl Into<String>,
    ) -> Result<Voter> {
        let id = id.into();
        let details = VoterDetails::new(name, email, credential);
        self.run("register_voter", move |ledger, ctx| {
            ledger.identity().register_voter(ctx, &id, details)
        })
        .await
    }

    pub async fn update_voter(
        &self,
        id: impl Into<VoterId>,
        name: impl Into<String>,
        email: impl Into<String>,
        credential: impl Into<String>,
    ) -> Result<Voter> {
        let id = id.into();
        let details = VoterDetails::new(name, email, credential);
        self.run("update_voter", move |ledger, ctx| {
            ledger.identity().update_voter(ctx, &id, details)
        })
        .await
    }

    pub async fn delete_voter(&self, id: impl Into<VoterId>) -> Result<()> {
        let id = id.into();
        self.run("delete_voter", move |ledger, ctx| {
            ledger.identity().delete_voter(ctx, &id)
        })
        .await
    }

    pub async fn register_candidate(
        &self,
        id: impl Into<CandidateId>,
        name: impl Into<String>,
        visi: impl Into<String>,
        misi: impl Into<String>,
    ) -> Result<Candidate> {
        let id = id.into();
        let details = CandidateDetails::new(name, visi, misi);
        self.run("register_candidate", move |ledger, ctx| {
            ledger.identity().register_candidate(ctx, &id, details)
        })
        .await
    }

    pub async fn update_candidate(
        &self,
        id: impl Into<CandidateId>,
        name: impl Into<String>,
        visi: impl Into<String>,
        misi: impl Into<String>,
    ) -> Result<Candidate> {
        let id = id.into();
        let details = CandidateDetails::new(name, visi, misi);
        self.run("update_candidate", move |ledger, ctx| {
            ledger.identity().update_candidate(ctx, &id, details)
        })
        .await
    }

    pub async fn delete_candidate(&self, id: impl Into<CandidateId>) -> Result<()> {
        let id = id.into();
        self.run("delete_candidate", move |ledger, ctx| {
            ledger.identity().delete_candidate(ctx, &id)
        })
        .await
    }

    pub async fn authenticate(
        &self,
        voter_id: impl Into<VoterId>,
        credential: impl Into<String>,
    ) -> Result<AuthOutcome> {
        let voter_id = voter_id.into();
        let credential = Zeroizing::new(credential.into());
        self.run("authenticate", move |ledger, _| {
            ledger.auth().authenticate(&voter_id, &credential)
        })
        .await
    }

    pub async fn cast_vote(
        &self,
        voter_id: impl Into<VoterId>,
        candidate_id: impl Into<CandidateId>,
        credential: impl Into<String>,
    ) -> Result<VoteReceipt> {
        let voter_id = voter_id.into();
        let candidate_id = candidate_id.into();
        let credential = Zeroizing::new(credential.into());
        self.run("cast_vote", move |ledger, ctx| {
            ledger
                .voting()
                .cast_vote(ctx, &voter_id, &candidate_id, &credential)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> LedgerService {
        LedgerService::new(
            Arc::new(Ledger::for_testing().unwrap()),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_register_and_vote() {
        let service = service();
        service
            .register_candidate("C1", "Ayu", "visi", "misi")
            .await
            .unwrap();
        service
            .register_voter("V1", "Budi", "budi@example.org", "pw")
            .await
            .unwrap();

        let receipt = service.cast_vote("V1", "C1", "pw").await.unwrap();
        assert_eq!(receipt.sequence, 3);
        assert_eq!(service.query().vote_count(&CandidateId::new("C1")).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let service = service();
        assert!(matches!(
            service.delete_voter("ghost").await,
            Err(Error::NotFound { .. })
        ));
        let outcome = service.authenticate("ghost", "pw").await.unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_zero_timeout_commits_nothing() {
        let service = service().with_timeout(Duration::ZERO);
        let result = service.register_candidate("C1", "Ayu", "visi", "misi").await;
        assert!(matches!(result, Err(Error::Timeout { .. })));

        // Give the blocking task time to reach its commit point
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(service.ledger().history().is_empty().unwrap());
    }
}
