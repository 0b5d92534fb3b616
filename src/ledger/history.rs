//! # History Log
//!
//! Append-only, totally ordered record of every identity mutation and every
//! committed vote. Entries are chained: each carries the Blake3 hash of its
//! predecessor, so any rewrite of recorded history breaks verification.
//!
//! The log tail is a single mutex. Whoever holds it assigns the next
//! sequence numbers, writes the entries together with the caller's entity
//! slots in one [`WriteBatch`], and applies the caller's state change before
//! releasing it. Live state therefore advances in exactly log order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::OperationContext;
use crate::crypto::CryptoUtils;
use crate::storage::{LedgerStore, WriteBatch};
use crate::types::{
    CandidateId, EntityKind, Hash, HistoryRecord, LogEvent, Sequence, VoteCountChange, VoteEvent,
    VoteReceipt,
};
use crate::{Error, Result, internal_error};

/// Predecessor hash of the first entry
pub const GENESIS_HASH: Hash = [0u8; 32];

/// One sealed entry of the history log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub record_id: Uuid,
    pub event: LogEvent,
    pub previous_hash: Hash,
    pub entry_hash: Hash,
}

impl LogEntry {
    fn seal(event: LogEvent, previous_hash: Hash) -> Result<Self> {
        let record_id = Uuid::new_v4();
        let entry_hash = Self::compute_hash(&record_id, &event, &previous_hash)?;
        Ok(Self {
            record_id,
            event,
            previous_hash,
            entry_hash,
        })
    }

    fn compute_hash(record_id: &Uuid, event: &LogEvent, previous_hash: &Hash) -> Result<Hash> {
        let content = serde_json::to_vec(&(record_id, event))?;
        Ok(CryptoUtils::chain_hash(previous_hash, &content))
    }

    pub fn sequence(&self) -> Sequence {
        self.event.sequence()
    }

    /// Check this entry's own hash and its link to `expected_previous`.
    pub fn verify(&self, expected_previous: &Hash) -> std::result::Result<(), ViolationKind> {
        if !CryptoUtils::constant_time_eq(&self.previous_hash, expected_previous) {
            return Err(ViolationKind::BrokenLink);
        }
        let recomputed = Self::compute_hash(&self.record_id, &self.event, &self.previous_hash)
            .map_err(|_| ViolationKind::Undecodable)?;
        if !CryptoUtils::constant_time_eq(&recomputed, &self.entry_hash) {
            return Err(ViolationKind::HashMismatch);
        }
        Ok(())
    }
}

/// What went wrong at one position of the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    /// Entry content does not match its recorded hash
    HashMismatch,
    /// Entry does not point at its predecessor's hash
    BrokenLink,
    /// Sequence numbers skip or repeat
    SequenceGap,
    /// Stored bytes are not a log entry
    Undecodable,
    /// Durable state disagrees with the in-memory ledger
    Diverged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityViolation {
    pub sequence: Sequence,
    pub kind: ViolationKind,
    pub detail: String,
}

/// Integrity report for the history log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub entries_checked: u64,
    pub head_sequence: Sequence,
    /// Hex of the last entry hash
    pub head_hash: String,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Debug)]
struct Tail {
    next_sequence: Sequence,
    last_hash: Hash,
}

/// Committed entries plus lookup indexes. `entries[i]` has sequence `i + 1`.
#[derive(Debug, Default)]
struct LogIndex {
    entries: Vec<LogEntry>,
    by_entity: HashMap<(EntityKind, String), Vec<Sequence>>,
    votes_by_candidate: HashMap<CandidateId, Vec<Sequence>>,
}

impl LogIndex {
    fn push(&mut self, entry: LogEntry) {
        let sequence = entry.sequence();
        match &entry.event {
            LogEvent::History(record) => self
                .by_entity
                .entry((record.kind, record.entity_id.clone()))
                .or_default()
                .push(sequence),
            LogEvent::Vote(vote) => self
                .votes_by_candidate
                .entry(vote.candidate_id.clone())
                .or_default()
                .push(sequence),
        }
        self.entries.push(entry);
    }

    fn get(&self, sequence: Sequence) -> Option<&LogEntry> {
        let position = usize::try_from(sequence.checked_sub(1)?).ok()?;
        self.entries.get(position)
    }

    fn history(&self, sequence: Sequence) -> Option<&HistoryRecord> {
        match &self.get(sequence)?.event {
            LogEvent::History(record) => Some(record),
            LogEvent::Vote(_) => None,
        }
    }

    fn vote(&self, sequence: Sequence) -> Option<&VoteEvent> {
        match &self.get(sequence)?.event {
            LogEvent::Vote(vote) => Some(vote),
            LogEvent::History(_) => None,
        }
    }
}

/// Hash-chained, gapless history log over a [`LedgerStore`]
pub struct HistoryLog {
    store: Arc<dyn LedgerStore>,
    tail: Mutex<Tail>,
    index: RwLock<LogIndex>,
}

impl HistoryLog {
    /// Load and verify every durable entry.
    ///
    /// Fails with [`Error::Integrity`] at the first entry that is out of
    /// sequence, undecodable, or does not chain to its predecessor.
    pub fn recover(store: Arc<dyn LedgerStore>) -> Result<Self> {
        let mut index = LogIndex::default();
        let mut expected = 1;
        let mut previous = GENESIS_HASH;

        for (sequence, bytes) in store.scan_log(1)? {
            let entry = decode_entry(sequence, &bytes)?;
            if sequence != expected || entry.sequence() != sequence {
                return Err(Error::Integrity {
                    sequence,
                    message: format!("expected sequence {expected}"),
                });
            }
            entry.verify(&previous).map_err(|kind| Error::Integrity {
                sequence,
                message: format!("{kind:?}"),
            })?;

            previous = entry.entry_hash;
            index.push(entry);
            expected += 1;
        }

        info!(entries = index.entries.len(), "📜 History log recovered");

        Ok(Self {
            store,
            tail: Mutex::new(Tail {
                next_sequence: expected,
                last_hash: previous,
            }),
            index: RwLock::new(index),
        })
    }

    /// Durably append `events` together with `writes`.
    ///
    /// Sequences are assigned under the tail lock, immediately before the
    /// store commit. The context is checked at that point: an expired or
    /// abandoned operation stops here and leaves nothing behind. If the
    /// store rejects the batch no sequence is consumed. `apply` runs after
    /// the commit and before the tail is released.
    pub(crate) fn append<F>(
        &self,
        ctx: &OperationContext,
        operation: &str,
        events: Vec<LogEvent>,
        mut writes: WriteBatch,
        apply: F,
    ) -> Result<Vec<LogEntry>>
    where
        F: FnOnce(&[LogEntry]) -> Result<()>,
    {
        let mut tail = self.lock_tail()?;

        ctx.check(operation)?;

        let mut next_sequence = tail.next_sequence;
        let mut last_hash = tail.last_hash;
        let mut entries = Vec::with_capacity(events.len());

        for mut event in events {
            event.set_sequence(next_sequence);
            let entry = LogEntry::seal(event, last_hash)?;
            writes.append(next_sequence, serde_json::to_vec(&entry)?);
            last_hash = entry.entry_hash;
            next_sequence += 1;
            entries.push(entry);
        }

        if let Err(e) = self.store.commit(writes) {
            error!(operation, error = %e, "durable commit failed");
            return Err(e.into());
        }

        tail.next_sequence = next_sequence;
        tail.last_hash = last_hash;

        {
            let mut index = self
                .index
                .write()
                .map_err(|_| internal_error!("History index poisoned"))?;
            for entry in &entries {
                index.push(entry.clone());
            }
        }

        if let Err(e) = apply(&entries) {
            // Durable and indexed already; live state catches up on reopen.
            error!(operation, error = %e, "committed entries not applied to live state");
            return Err(e);
        }

        debug!(
            operation,
            first = entries.first().map(LogEntry::sequence),
            count = entries.len(),
            "entries appended"
        );
        Ok(entries)
    }

    fn lock_tail(&self) -> Result<MutexGuard<'_, Tail>> {
        self.tail
            .lock()
            .map_err(|_| internal_error!("History log tail poisoned"))
    }

    fn read_index(&self) -> Result<RwLockReadGuard<'_, LogIndex>> {
        self.index
            .read()
            .map_err(|_| internal_error!("History index poisoned"))
    }

    /// Number of committed entries
    pub fn len(&self) -> Result<usize> {
        Ok(self.read_index()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Sequence the next commit will receive
    pub fn next_sequence(&self) -> Result<Sequence> {
        Ok(self.read_index()?.entries.len() as Sequence + 1)
    }

    pub fn entry(&self, sequence: Sequence) -> Result<Option<LogEntry>> {
        Ok(self.read_index()?.get(sequence).cloned())
    }

    /// Every committed entry, ascending
    pub fn entries(&self) -> Result<Vec<LogEntry>> {
        Ok(self.read_index()?.entries.clone())
    }

    /// History records of one entity, ascending
    pub fn history_for(&self, kind: EntityKind, id: &str) -> Result<Vec<HistoryRecord>> {
        let index = self.read_index()?;
        let Some(sequences) = index.by_entity.get(&(kind, id.to_string())) else {
            return Ok(Vec::new());
        };
        Ok(sequences
            .iter()
            .filter_map(|sequence| index.history(*sequence).cloned())
            .collect())
    }

    /// History records of every entity of one kind, ascending
    pub fn all_histories(&self, kind: EntityKind) -> Result<Vec<HistoryRecord>> {
        Ok(self
            .read_index()?
            .entries
            .iter()
            .filter_map(|entry| match &entry.event {
                LogEvent::History(record) if record.kind == kind => Some(record.clone()),
                _ => None,
            })
            .collect())
    }

    /// Every committed vote, ascending
    pub fn vote_events(&self) -> Result<Vec<VoteEvent>> {
        Ok(self
            .read_index()?
            .entries
            .iter()
            .filter_map(|entry| match &entry.event {
                LogEvent::Vote(vote) => Some(vote.clone()),
                LogEvent::History(_) => None,
            })
            .collect())
    }

    /// Committed votes naming one candidate, ascending
    pub fn vote_events_for(&self, candidate_id: &CandidateId) -> Result<Vec<VoteEvent>> {
        let index = self.read_index()?;
        let Some(sequences) = index.votes_by_candidate.get(candidate_id) else {
            return Ok(Vec::new());
        };
        Ok(sequences
            .iter()
            .filter_map(|sequence| index.vote(*sequence).cloned())
            .collect())
    }

    /// Running vote count of one candidate, one step per vote
    pub fn vote_count_history(&self, candidate_id: &CandidateId) -> Result<Vec<VoteCountChange>> {
        Ok(self
            .vote_events_for(candidate_id)?
            .into_iter()
            .zip(1u64..)
            .map(|(vote, vote_count)| VoteCountChange {
                sequence: vote.sequence,
                candidate_id: vote.candidate_id,
                voter_id: vote.voter_id,
                vote_count,
                timestamp: vote.timestamp,
            })
            .collect())
    }

    /// Running vote counts of every candidate, interleaved in log order
    pub fn all_vote_count_histories(&self) -> Result<Vec<VoteCountChange>> {
        let mut counts: HashMap<CandidateId, u64> = HashMap::new();
        Ok(self
            .vote_events()?
            .into_iter()
            .map(|vote| {
                let count = counts.entry(vote.candidate_id.clone()).or_default();
                *count += 1;
                VoteCountChange {
                    sequence: vote.sequence,
                    candidate_id: vote.candidate_id,
                    voter_id: vote.voter_id,
                    vote_count: *count,
                    timestamp: vote.timestamp,
                }
            })
            .collect())
    }

    /// Hex chain hash of the last committed entry
    pub fn head_hash(&self) -> Result<String> {
        let index = self.read_index()?;
        let head = index
            .entries
            .last()
            .map_or(GENESIS_HASH, |entry| entry.entry_hash);
        Ok(CryptoUtils::hash_to_hex(&head))
    }

    /// Re-read the durable log and verify the whole chain.
    ///
    /// Every stored entry must decode, chain to its predecessor, and match
    /// the entry this process holds for the same sequence. Commits wait
    /// until the check is done.
    pub fn verify_chain(&self) -> Result<IntegrityReport> {
        self.verify_with(|_, _| Ok(()))
    }

    /// Verify the chain, then run `check` over the committed entries.
    ///
    /// The tail is held throughout, so no commit is between its durable
    /// write and its live-state update while `check` runs.
    pub(crate) fn verify_with<F>(&self, check: F) -> Result<IntegrityReport>
    where
        F: FnOnce(&[LogEntry], &mut IntegrityReport) -> Result<()>,
    {
        let _tail = self.lock_tail()?;
        let index = self.read_index()?;
        let mut report = self.verify_durable(&index)?;
        check(&index.entries, &mut report)?;
        Ok(report)
    }

    fn verify_durable(&self, index: &LogIndex) -> Result<IntegrityReport> {
        let durable = self.store.scan_log(1)?;

        let mut violations = Vec::new();
        let mut previous = GENESIS_HASH;
        let mut expected = 1;

        for (sequence, bytes) in &durable {
            let sequence = *sequence;
            if sequence != expected {
                violations.push(IntegrityViolation {
                    sequence,
                    kind: ViolationKind::SequenceGap,
                    detail: format!("expected sequence {expected}"),
                });
                expected = sequence;
            }
            expected += 1;

            let entry = match decode_entry(sequence, bytes) {
                Ok(entry) => entry,
                Err(e) => {
                    violations.push(IntegrityViolation {
                        sequence,
                        kind: ViolationKind::Undecodable,
                        detail: e.to_string(),
                    });
                    continue;
                }
            };

            if let Err(kind) = entry.verify(&previous) {
                violations.push(IntegrityViolation {
                    sequence,
                    kind,
                    detail: "chain verification failed".to_string(),
                });
            }
            if index.get(sequence) != Some(&entry) {
                violations.push(IntegrityViolation {
                    sequence,
                    kind: ViolationKind::Diverged,
                    detail: "durable entry differs from committed entry".to_string(),
                });
            }
            previous = entry.entry_hash;
        }

        if durable.len() != index.entries.len() {
            violations.push(IntegrityViolation {
                sequence: durable.len() as Sequence,
                kind: ViolationKind::Diverged,
                detail: format!(
                    "{} durable entries, {} committed",
                    durable.len(),
                    index.entries.len()
                ),
            });
        }

        let report = IntegrityReport {
            entries_checked: durable.len() as u64,
            head_sequence: index.entries.len() as Sequence,
            head_hash: CryptoUtils::hash_to_hex(&previous),
            violations,
        };

        if report.is_valid() {
            info!(entries = report.entries_checked, "🔍 History chain verified");
        } else {
            warn!(
                violations = report.violations.len(),
                "🚨 History chain verification found violations"
            );
        }
        Ok(report)
    }

    /// Whether a receipt names a committed vote with a matching hash.
    pub fn verify_receipt(&self, receipt: &VoteReceipt) -> Result<bool> {
        let claimed = CryptoUtils::hex_to_hash(&receipt.entry_hash)?;
        let index = self.read_index()?;
        let Some(entry) = index.get(receipt.sequence) else {
            return Ok(false);
        };
        let LogEvent::Vote(vote) = &entry.event else {
            return Ok(false);
        };
        Ok(vote.voter_id == receipt.voter_id
            && vote.candidate_id == receipt.candidate_id
            && vote.timestamp == receipt.timestamp
            && CryptoUtils::constant_time_eq(&entry.entry_hash, &claimed))
    }
}

fn decode_entry(sequence: Sequence, bytes: &[u8]) -> Result<LogEntry> {
    serde_json::from_slice(bytes).map_err(|e| Error::Integrity {
        sequence,
        message: format!("undecodable entry: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{EntityKey, FaultyStore, MemoryStore};
    use crate::types::{Candidate, Operation, Snapshot, Timestamp, VoterId};
    use chrono::Utc;

    fn candidate(id: &str, now: Timestamp) -> Candidate {
        Candidate {
            id: CandidateId::new(id),
            name: format!("Candidate {id}"),
            visi: "visi".to_string(),
            misi: "misi".to_string(),
            vote_count: 0,
            last_updated: now,
        }
    }

    fn create(id: &str) -> LogEvent {
        let now = Utc::now();
        LogEvent::history(Operation::Create, Snapshot::Candidate(candidate(id, now)), now)
    }

    fn vote(voter: &str, candidate: &str) -> LogEvent {
        LogEvent::vote(VoterId::new(voter), CandidateId::new(candidate), Utc::now())
    }

    fn append_one(log: &HistoryLog, event: LogEvent) -> Result<LogEntry> {
        let mut entries = log.append(
            &OperationContext::unbounded(),
            "test",
            vec![event],
            WriteBatch::new(),
            |_| Ok(()),
        )?;
        Ok(entries.remove(0))
    }

    fn fresh() -> (Arc<MemoryStore>, HistoryLog) {
        let store = Arc::new(MemoryStore::new());
        let log = HistoryLog::recover(store.clone()).unwrap();
        (store, log)
    }

    #[test]
    fn test_sequences_are_gapless_from_one() {
        let (_, log) = fresh();
        assert!(log.is_empty().unwrap());
        assert_eq!(log.next_sequence().unwrap(), 1);

        let first = append_one(&log, create("C1")).unwrap();
        let second = append_one(&log, vote("V1", "C1")).unwrap();

        assert_eq!(first.sequence(), 1);
        assert_eq!(second.sequence(), 2);
        assert_eq!(first.previous_hash, GENESIS_HASH);
        assert_eq!(second.previous_hash, first.entry_hash);
        assert_eq!(log.len().unwrap(), 2);
    }

    #[test]
    fn test_failed_commit_consumes_no_sequence() {
        let inner = Arc::new(MemoryStore::new());
        let store = Arc::new(FaultyStore::new(inner));
        let log = HistoryLog::recover(store.clone()).unwrap();

        append_one(&log, create("C1")).unwrap();

        store.fail_next_commits(1);
        let mut applied = false;
        let result = log.append(
            &OperationContext::unbounded(),
            "test",
            vec![create("C2")],
            WriteBatch::new(),
            |_| {
                applied = true;
                Ok(())
            },
        );
        assert!(matches!(result, Err(Error::StorageUnavailable { .. })));
        assert!(!applied);

        let next = append_one(&log, create("C3")).unwrap();
        assert_eq!(next.sequence(), 2);
        assert!(log.verify_chain().unwrap().is_valid());
    }

    #[test]
    fn test_expired_context_stops_before_commit() {
        let (store, log) = fresh();
        let ctx = OperationContext::with_timeout(std::time::Duration::ZERO);

        let mut writes = WriteBatch::new();
        writes.put(EntityKey::new(EntityKind::Candidate, "C1"), b"{}".to_vec());

        let result = log.append(&ctx, "create", vec![create("C1")], writes, |_| Ok(()));
        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert!(store.scan_log(1).unwrap().is_empty());
        assert!(
            store
                .get(&EntityKey::new(EntityKind::Candidate, "C1"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_histories_and_vote_counts() {
        let (_, log) = fresh();
        append_one(&log, create("C1")).unwrap();
        append_one(&log, create("C2")).unwrap();
        append_one(&log, vote("V1", "C1")).unwrap();
        append_one(&log, vote("V2", "C2")).unwrap();
        append_one(&log, vote("V3", "C1")).unwrap();

        let c1 = log.history_for(EntityKind::Candidate, "C1").unwrap();
        assert_eq!(c1.len(), 1);
        assert_eq!(c1[0].sequence, 1);
        assert!(log.history_for(EntityKind::Voter, "C1").unwrap().is_empty());
        assert_eq!(log.all_histories(EntityKind::Candidate).unwrap().len(), 2);

        let c1_counts: Vec<(Sequence, u64)> = log
            .vote_count_history(&CandidateId::new("C1"))
            .unwrap()
            .iter()
            .map(|change| (change.sequence, change.vote_count))
            .collect();
        assert_eq!(c1_counts, vec![(3, 1), (5, 2)]);

        let all: Vec<u64> = log
            .all_vote_count_histories()
            .unwrap()
            .iter()
            .map(|change| change.vote_count)
            .collect();
        assert_eq!(all, vec![1, 1, 2]);
    }

    #[test]
    fn test_recover_rebuilds_tail_and_index() {
        let (store, log) = fresh();
        append_one(&log, create("C1")).unwrap();
        let head = append_one(&log, vote("V1", "C1")).unwrap();
        drop(log);

        let reopened = HistoryLog::recover(store).unwrap();
        assert_eq!(reopened.len().unwrap(), 2);
        assert_eq!(reopened.head_hash().unwrap(), CryptoUtils::hash_to_hex(&head.entry_hash));

        let next = append_one(&reopened, vote("V2", "C1")).unwrap();
        assert_eq!(next.sequence(), 3);
        assert_eq!(next.previous_hash, head.entry_hash);
    }

    #[test]
    fn test_recover_rejects_tampered_entry() {
        let store = Arc::new(MemoryStore::new());
        let log = HistoryLog::recover(store.clone()).unwrap();
        append_one(&log, create("C1")).unwrap();

        // Rewrite history at sequence 2 with an entry that skips the chain
        let mut forged = LogEntry::seal(vote("V1", "C1"), [7u8; 32]).unwrap();
        forged.event.set_sequence(2);
        let mut batch = WriteBatch::new();
        batch.append(2, serde_json::to_vec(&forged).unwrap());
        store.commit(batch).unwrap();

        let err = HistoryLog::recover(store).err().unwrap();
        assert!(matches!(err, Error::Integrity { sequence: 2, .. }));
    }

    #[test]
    fn test_verify_chain_reports_divergence() {
        let (store, log) = fresh();
        append_one(&log, create("C1")).unwrap();
        assert!(log.verify_chain().unwrap().is_valid());

        // An entry written behind the log's back
        let stray = LogEntry::seal(create("C9"), [0u8; 32]).unwrap();
        let mut batch = WriteBatch::new();
        batch.append(2, serde_json::to_vec(&stray).unwrap());
        store.commit(batch).unwrap();

        let report = log.verify_chain().unwrap();
        assert!(!report.is_valid());
        assert!(
            report
                .violations
                .iter()
                .any(|v| v.kind == ViolationKind::Diverged)
        );
    }

    #[test]
    fn test_receipt_verification() {
        let (_, log) = fresh();
        append_one(&log, create("C1")).unwrap();
        let entry = append_one(&log, vote("V1", "C1")).unwrap();
        let LogEvent::Vote(vote_event) = entry.event.clone() else {
            panic!("expected vote");
        };

        let receipt = VoteReceipt {
            sequence: entry.sequence(),
            voter_id: vote_event.voter_id,
            candidate_id: vote_event.candidate_id,
            timestamp: vote_event.timestamp,
            entry_hash: CryptoUtils::hash_to_hex(&entry.entry_hash),
        };
        assert!(log.verify_receipt(&receipt).unwrap());

        let mut forged = receipt.clone();
        forged.candidate_id = CandidateId::new("C2");
        assert!(!log.verify_receipt(&forged).unwrap());

        let mut pointing_at_history = receipt;
        pointing_at_history.sequence = 1;
        assert!(!log.verify_receipt(&pointing_at_history).unwrap());
    }
}
