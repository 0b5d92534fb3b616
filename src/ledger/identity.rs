//! # Identity Store
//!
//! Current state of every live voter and candidate, plus the mutations that
//! change it. Each mutation writes the entity slot and its history record in
//! one durable batch; both land or neither does.
//!
//! Live state sits behind a single `RwLock`. Writers only take it to apply
//! changes that are already durable, so a reader always sees a state that
//! corresponds to some prefix of the history log.
//!
//! The log alone determines every entity's fields except the voter
//! credential. Recovery rebuilds each entity from its latest snapshot plus
//! the votes recorded after it, and refuses a durable slot that says
//! anything else.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use zeroize::Zeroizing;

use super::history::{HistoryLog, IntegrityViolation, LogEntry, ViolationKind};
use super::locks::{LockTable, Scope, enter};
use super::OperationContext;
use crate::crypto::CredentialHasher;
use crate::storage::{EntityKey, LedgerStore, WriteBatch};
use crate::types::{
    Candidate, CandidateId, EntityKind, LogEvent, Operation, Sequence, Snapshot, Voter, VoterId,
    VoterView,
};
use crate::{Error, Result, internal_error};

/// Field values for registering or updating a voter
///
/// The plaintext credential is wiped when the details are dropped.
#[derive(Clone)]
pub struct VoterDetails {
    pub name: String,
    pub email: String,
    pub credential: Zeroizing<String>,
}

impl VoterDetails {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            credential: Zeroizing::new(credential.into()),
        }
    }
}

impl std::fmt::Debug for VoterDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoterDetails")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("credential", &"[REDACTED]")
            .finish()
    }
}

/// Field values for registering or updating a candidate
#[derive(Debug, Clone)]
pub struct CandidateDetails {
    pub name: String,
    pub visi: String,
    pub misi: String,
}

impl CandidateDetails {
    pub fn new(name: impl Into<String>, visi: impl Into<String>, misi: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visi: visi.into(),
            misi: misi.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    position: Sequence,
    value: T,
}

/// Live entities of one kind, iterable in registration order.
#[derive(Debug)]
pub(crate) struct Registry<T> {
    slots: HashMap<String, Slot<T>>,
    order: BTreeMap<Sequence, String>,
    retired: HashSet<String>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            order: BTreeMap::new(),
            retired: HashSet::new(),
        }
    }
}

impl<T: Clone> Registry<T> {
    pub(crate) fn get(&self, id: &str) -> Option<&T> {
        self.slots.get(id).map(|slot| &slot.value)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.slots.get_mut(id).map(|slot| &mut slot.value)
    }

    /// Live now, or live once and deleted since
    pub(crate) fn is_taken(&self, id: &str) -> bool {
        self.slots.contains_key(id) || self.retired.contains(id)
    }

    pub(crate) fn insert(&mut self, position: Sequence, id: &str, value: T) {
        self.order.insert(position, id.to_string());
        self.slots.insert(id.to_string(), Slot { position, value });
    }

    /// Overwrite a live entity in place, keeping its position
    pub(crate) fn replace(&mut self, id: &str, value: T) -> bool {
        match self.slots.get_mut(id) {
            Some(slot) => {
                slot.value = value;
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<T> {
        let slot = self.slots.remove(id)?;
        self.order.remove(&slot.position);
        self.retired.insert(id.to_string());
        Some(slot.value)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Live values in registration order
    pub(crate) fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.order
            .values()
            .filter_map(|id| self.slots.get(id).map(|slot| &slot.value))
    }

    /// `(position, id, value)` in registration order
    fn entries(&self) -> impl Iterator<Item = (Sequence, &str, &T)> + '_ {
        self.order.iter().filter_map(|(position, id)| {
            self.slots
                .get(id)
                .map(|slot| (*position, id.as_str(), &slot.value))
        })
    }

    /// Same retired ids, no live entries
    fn emptied<U>(&self) -> Registry<U> {
        Registry {
            retired: self.retired.clone(),
            ..Registry::default()
        }
    }

    fn record(&mut self, operation: Operation, position: Sequence, id: &str, value: &T) {
        match operation {
            Operation::Create => self.insert(position, id, value.clone()),
            Operation::Update => {
                self.replace(id, value.clone());
            }
            Operation::Delete => {
                self.remove(id);
            }
        }
    }
}

/// An entity kind together with the part of it the log captures
trait Recorded: Clone + PartialEq + DeserializeOwned {
    type Logged: Clone + PartialEq;
    const KIND: EntityKind;

    fn logged(&self) -> Self::Logged;
}

impl Recorded for Voter {
    type Logged = VoterView;
    const KIND: EntityKind = EntityKind::Voter;

    fn logged(&self) -> VoterView {
        self.view()
    }
}

impl Recorded for Candidate {
    type Logged = Candidate;
    const KIND: EntityKind = EntityKind::Candidate;

    fn logged(&self) -> Candidate {
        self.clone()
    }
}

/// Entity state as described by the history log alone.
///
/// A Create or Update snapshot sets an entity's fields. Each later vote
/// marks the voter as voted, adds one to the candidate's count, and moves
/// both `last_updated` stamps to the vote's timestamp.
#[derive(Debug, Default)]
struct Reconstruction {
    voters: Registry<VoterView>,
    candidates: Registry<Candidate>,
    last_touched: HashMap<(EntityKind, String), Sequence>,
    applied_sequence: Sequence,
}

impl Reconstruction {
    fn fold<'a>(entries: impl IntoIterator<Item = &'a LogEntry>) -> Self {
        let mut log = Self::default();
        for entry in entries {
            let sequence = entry.sequence();
            log.applied_sequence = sequence;
            match &entry.event {
                LogEvent::History(record) => {
                    let id = record.entity_id.as_str();
                    match &record.snapshot {
                        Snapshot::Voter(view) => {
                            log.voters.record(record.operation, sequence, id, view)
                        }
                        Snapshot::Candidate(candidate) => {
                            log.candidates.record(record.operation, sequence, id, candidate)
                        }
                    }
                    log.touch(record.kind, id, sequence);
                }
                LogEvent::Vote(vote) => {
                    if let Some(voter) = log.voters.get_mut(vote.voter_id.as_str()) {
                        voter.has_voted = true;
                        voter.last_updated = vote.timestamp;
                    }
                    if let Some(candidate) = log.candidates.get_mut(vote.candidate_id.as_str()) {
                        candidate.vote_count += 1;
                        candidate.last_updated = vote.timestamp;
                    }
                    log.touch(EntityKind::Voter, vote.voter_id.as_str(), sequence);
                    log.touch(EntityKind::Candidate, vote.candidate_id.as_str(), sequence);
                }
            }
        }
        log
    }

    fn touch(&mut self, kind: EntityKind, id: &str, sequence: Sequence) {
        self.last_touched.insert((kind, id.to_string()), sequence);
    }

    /// Sequence of the last entry that changed this entity
    fn last_touched(&self, kind: EntityKind, id: &str) -> Sequence {
        self.last_touched
            .get(&(kind, id.to_string()))
            .copied()
            .unwrap_or(self.applied_sequence)
    }
}

/// Load the durable slot of every entity the log holds live.
fn load_registry<T: Recorded>(
    store: &dyn LedgerStore,
    expected: &Registry<T::Logged>,
    log: &Reconstruction,
) -> Result<Registry<T>> {
    let mut registry: Registry<T> = expected.emptied();
    for (position, id, logged) in expected.entries() {
        let sequence = log.last_touched(T::KIND, id);
        let bytes = store
            .get(&EntityKey::new(T::KIND, id))?
            .ok_or_else(|| Error::Integrity {
                sequence,
                message: format!("{} {id} has no durable slot", T::KIND),
            })?;
        let value: T = decode_slot(sequence, &bytes)?;
        if value.logged() != *logged {
            return Err(Error::Integrity {
                sequence,
                message: format!("{} {id} slot disagrees with its history", T::KIND),
            });
        }
        registry.insert(position, id, value);
    }

    let durable = store.entities(T::KIND)?.len();
    if durable != registry.len() {
        return Err(Error::Integrity {
            sequence: log.applied_sequence,
            message: format!(
                "{durable} durable {} slots, {} live in log",
                T::KIND,
                registry.len()
            ),
        });
    }
    Ok(registry)
}

/// Compare one live registry with the log and with the durable slots.
fn audit_registry<T: Recorded>(
    store: &dyn LedgerStore,
    expected: &Registry<T::Logged>,
    live: &Registry<T>,
    log: &Reconstruction,
    violations: &mut Vec<IntegrityViolation>,
) -> Result<()> {
    let kind = T::KIND;
    let mut flag = |sequence: Sequence, violation: ViolationKind, detail: String| {
        violations.push(IntegrityViolation {
            sequence,
            kind: violation,
            detail,
        })
    };

    for (_, id, logged) in expected.entries() {
        let sequence = log.last_touched(kind, id);
        match live.get(id) {
            Some(value) if value.logged() == *logged => {}
            Some(_) => flag(
                sequence,
                ViolationKind::Diverged,
                format!("{kind} {id} differs from its history"),
            ),
            None => flag(
                sequence,
                ViolationKind::Diverged,
                format!("{kind} {id} is live in the log but missing"),
            ),
        }
    }

    for (_, id, value) in live.entries() {
        let sequence = log.last_touched(kind, id);
        if expected.get(id).is_none() {
            flag(
                sequence,
                ViolationKind::Diverged,
                format!("{kind} {id} is live but not in the log"),
            );
        }
        match store.get(&EntityKey::new(kind, id))? {
            None => flag(
                sequence,
                ViolationKind::Diverged,
                format!("{kind} {id} has no durable slot"),
            ),
            Some(bytes) => match serde_json::from_slice::<T>(&bytes) {
                Ok(durable) if durable == *value => {}
                Ok(_) => flag(
                    sequence,
                    ViolationKind::Diverged,
                    format!("{kind} {id} differs from its durable slot"),
                ),
                Err(e) => flag(
                    sequence,
                    ViolationKind::Undecodable,
                    format!("{kind} {id} slot: {e}"),
                ),
            },
        }
    }

    let durable = store.entities(kind)?.len();
    if durable != live.len() {
        flag(
            log.applied_sequence,
            ViolationKind::Diverged,
            format!("{durable} durable {kind} slots, {} live", live.len()),
        );
    }
    Ok(())
}

/// Everything the ledger holds in memory about live entities
#[derive(Debug, Default)]
pub(crate) struct LiveState {
    pub(crate) voters: Registry<Voter>,
    pub(crate) candidates: Registry<Candidate>,
    /// Last log sequence applied to this state
    pub(crate) applied_sequence: Sequence,
}

/// Registry of voters and candidates
pub struct IdentityStore {
    state: RwLock<LiveState>,
    locks: LockTable,
    hasher: CredentialHasher,
    history: Arc<HistoryLog>,
}

impl IdentityStore {
    /// Rebuild live state from a recovered log and the durable entity slots.
    ///
    /// Registration order, retired ids and every field except the voter
    /// credential come from the log. Each slot must agree with that, or
    /// recovery fails with [`Error::Integrity`].
    pub(crate) fn recover(
        store: &dyn LedgerStore,
        hasher: CredentialHasher,
        history: Arc<HistoryLog>,
    ) -> Result<Self> {
        let log = Reconstruction::fold(&history.entries()?);
        let state = LiveState {
            voters: load_registry::<Voter>(store, &log.voters, &log)?,
            candidates: load_registry::<Candidate>(store, &log.candidates, &log)?,
            applied_sequence: log.applied_sequence,
        };

        info!(
            voters = state.voters.len(),
            candidates = state.candidates.len(),
            "🗂️ Identity store recovered"
        );

        Ok(Self {
            state: RwLock::new(state),
            locks: LockTable::default(),
            hasher,
            history,
        })
    }

    /// Compare live state with `entries` and with the durable slots.
    ///
    /// Only meaningful while no commit is in flight; callers hold the log
    /// tail.
    pub(crate) fn audit(
        &self,
        store: &dyn LedgerStore,
        entries: &[LogEntry],
    ) -> Result<Vec<IntegrityViolation>> {
        let log = Reconstruction::fold(entries);
        let state = self.read_state()?;
        let mut violations = Vec::new();

        if state.applied_sequence != log.applied_sequence {
            violations.push(IntegrityViolation {
                sequence: state.applied_sequence,
                kind: ViolationKind::Diverged,
                detail: format!(
                    "live state applied through {}, log holds {}",
                    state.applied_sequence, log.applied_sequence
                ),
            });
        }
        audit_registry::<Voter>(store, &log.voters, &state.voters, &log, &mut violations)?;
        audit_registry::<Candidate>(
            store,
            &log.candidates,
            &state.candidates,
            &log,
            &mut violations,
        )?;
        Ok(violations)
    }

    pub(crate) fn hasher(&self) -> &CredentialHasher {
        &self.hasher
    }

    pub(crate) fn scope(&self, kind: EntityKind, id: &str) -> Result<Scope> {
        self.locks.scope(kind, id)
    }

    pub(crate) fn read_state(&self) -> Result<RwLockReadGuard<'_, LiveState>> {
        self.state
            .read()
            .map_err(|_| internal_error!("Identity state poisoned"))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, LiveState>> {
        self.state
            .write()
            .map_err(|_| internal_error!("Identity state poisoned"))
    }

    /// Apply a durable change to live state. Only called under the log tail.
    pub(crate) fn apply<F>(&self, entries: &[LogEntry], change: F) -> Result<()>
    where
        F: FnOnce(&mut LiveState),
    {
        let mut state = self.write_state()?;
        change(&mut state);
        if let Some(last) = entries.last() {
            state.applied_sequence = last.sequence();
        }
        Ok(())
    }

    pub fn voter(&self, id: &VoterId) -> Result<Option<Voter>> {
        Ok(self.read_state()?.voters.get(id.as_str()).cloned())
    }

    pub fn candidate(&self, id: &CandidateId) -> Result<Option<Candidate>> {
        Ok(self.read_state()?.candidates.get(id.as_str()).cloned())
    }

    /// Register a new voter. `has_voted` starts false.
    pub fn register_voter(
        &self,
        ctx: &OperationContext,
        id: &VoterId,
        details: VoterDetails,
    ) -> Result<Voter> {
        validate_voter(id, &details)?;
        ctx.check("register_voter")?;

        let scope = self.scope(EntityKind::Voter, id.as_str())?;
        let _guard = enter(&scope);

        if self.read_state()?.voters.is_taken(id.as_str()) {
            warn!(voter_id = %id, "voter id already used");
            return Err(Error::duplicate(EntityKind::Voter, id.as_str()));
        }

        let now = Utc::now();
        let voter = Voter {
            id: id.clone(),
            name: details.name,
            email: details.email,
            credential: self.hasher.hash(&details.credential),
            has_voted: false,
            last_updated: now,
        };

        let entries = self.commit_voter(
            ctx,
            "register_voter",
            Operation::Create,
            &voter,
            |state, entries| {
                state
                    .voters
                    .insert(entries[0].sequence(), id.as_str(), voter.clone());
            },
        )?;

        info!(voter_id = %id, sequence = entries[0].sequence(), "🧾 Voter registered");
        Ok(voter)
    }

    /// Replace a voter's name, email and credential.
    ///
    /// `has_voted` is carried over unchanged.
    pub fn update_voter(
        &self,
        ctx: &OperationContext,
        id: &VoterId,
        details: VoterDetails,
    ) -> Result<Voter> {
        validate_voter(id, &details)?;
        ctx.check("update_voter")?;

        let scope = self.scope(EntityKind::Voter, id.as_str())?;
        let _guard = enter(&scope);

        let current = self
            .voter(id)?
            .ok_or_else(|| Error::not_found(EntityKind::Voter, id.as_str()))?;

        let voter = Voter {
            name: details.name,
            email: details.email,
            credential: self.hasher.hash(&details.credential),
            last_updated: Utc::now(),
            ..current
        };

        let entries =
            self.commit_voter(ctx, "update_voter", Operation::Update, &voter, |state, _| {
                state.voters.replace(id.as_str(), voter.clone());
            })?;

        info!(voter_id = %id, sequence = entries[0].sequence(), "✏️ Voter updated");
        Ok(voter)
    }

    /// Remove a voter. The id stays retired.
    pub fn delete_voter(&self, ctx: &OperationContext, id: &VoterId) -> Result<()> {
        if id.is_blank() {
            return Err(Error::validation("voter id must not be blank"));
        }
        ctx.check("delete_voter")?;

        let scope = self.scope(EntityKind::Voter, id.as_str())?;
        let _guard = enter(&scope);

        let current = self
            .voter(id)?
            .ok_or_else(|| Error::not_found(EntityKind::Voter, id.as_str()))?;

        let entries =
            self.commit_voter(ctx, "delete_voter", Operation::Delete, &current, |state, _| {
                state.voters.remove(id.as_str());
            })?;

        info!(voter_id = %id, sequence = entries[0].sequence(), "🗑️ Voter deleted");
        Ok(())
    }

    /// Register a new candidate. `vote_count` starts at zero.
    pub fn register_candidate(
        &self,
        ctx: &OperationContext,
        id: &CandidateId,
        details: CandidateDetails,
    ) -> Result<Candidate> {
        validate_candidate(id, &details)?;
        ctx.check("register_candidate")?;

        let scope = self.scope(EntityKind::Candidate, id.as_str())?;
        let _guard = enter(&scope);

        if self.read_state()?.candidates.is_taken(id.as_str()) {
            warn!(candidate_id = %id, "candidate id already used");
            return Err(Error::duplicate(EntityKind::Candidate, id.as_str()));
        }

        let candidate = Candidate {
            id: id.clone(),
            name: details.name,
            visi: details.visi,
            misi: details.misi,
            vote_count: 0,
            last_updated: Utc::now(),
        };

        let entries = self.commit_candidate(
            ctx,
            "register_candidate",
            Operation::Create,
            &candidate,
            |state, entries| {
                state
                    .candidates
                    .insert(entries[0].sequence(), id.as_str(), candidate.clone());
            },
        )?;

        info!(candidate_id = %id, sequence = entries[0].sequence(), "🧾 Candidate registered");
        Ok(candidate)
    }

    /// Replace a candidate's name and platform.
    ///
    /// `vote_count` is carried over unchanged.
    pub fn update_candidate(
        &self,
        ctx: &OperationContext,
        id: &CandidateId,
        details: CandidateDetails,
    ) -> Result<Candidate> {
        validate_candidate(id, &details)?;
        ctx.check("update_candidate")?;

        let scope = self.scope(EntityKind::Candidate, id.as_str())?;
        let _guard = enter(&scope);

        let current = self
            .candidate(id)?
            .ok_or_else(|| Error::not_found(EntityKind::Candidate, id.as_str()))?;

        let candidate = Candidate {
            name: details.name,
            visi: details.visi,
            misi: details.misi,
            last_updated: Utc::now(),
            ..current
        };

        let entries = self.commit_candidate(
            ctx,
            "update_candidate",
            Operation::Update,
            &candidate,
            |state, _| {
                state.candidates.replace(id.as_str(), candidate.clone());
            },
        )?;

        info!(candidate_id = %id, sequence = entries[0].sequence(), "✏️ Candidate updated");
        Ok(candidate)
    }

    /// Remove a candidate. The id stays retired; votes already cast for it
    /// remain in the log.
    pub fn delete_candidate(&self, ctx: &OperationContext, id: &CandidateId) -> Result<()> {
        if id.is_blank() {
            return Err(Error::validation("candidate id must not be blank"));
        }
        ctx.check("delete_candidate")?;

        let scope = self.scope(EntityKind::Candidate, id.as_str())?;
        let _guard = enter(&scope);

        let current = self
            .candidate(id)?
            .ok_or_else(|| Error::not_found(EntityKind::Candidate, id.as_str()))?;

        let entries = self.commit_candidate(
            ctx,
            "delete_candidate",
            Operation::Delete,
            &current,
            |state, _| {
                state.candidates.remove(id.as_str());
            },
        )?;

        info!(candidate_id = %id, sequence = entries[0].sequence(), "🗑️ Candidate deleted");
        Ok(())
    }

    fn commit_voter<F>(
        &self,
        ctx: &OperationContext,
        operation: &str,
        kind: Operation,
        voter: &Voter,
        change: F,
    ) -> Result<Vec<LogEntry>>
    where
        F: FnOnce(&mut LiveState, &[LogEntry]),
    {
        let key = EntityKey::new(EntityKind::Voter, voter.id.as_str());
        let timestamp = if kind == Operation::Delete {
            Utc::now()
        } else {
            voter.last_updated
        };
        let event = LogEvent::history(kind, Snapshot::Voter(voter.view()), timestamp);
        self.commit_entity(ctx, operation, key, kind, voter, event, change)
    }

    fn commit_candidate<F>(
        &self,
        ctx: &OperationContext,
        operation: &str,
        kind: Operation,
        candidate: &Candidate,
        change: F,
    ) -> Result<Vec<LogEntry>>
    where
        F: FnOnce(&mut LiveState, &[LogEntry]),
    {
        let key = EntityKey::new(EntityKind::Candidate, candidate.id.as_str());
        let timestamp = if kind == Operation::Delete {
            Utc::now()
        } else {
            candidate.last_updated
        };
        let event = LogEvent::history(kind, Snapshot::Candidate(candidate.clone()), timestamp);
        self.commit_entity(ctx, operation, key, kind, candidate, event, change)
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_entity<T, F>(
        &self,
        ctx: &OperationContext,
        operation: &str,
        key: EntityKey,
        kind: Operation,
        value: &T,
        event: LogEvent,
        change: F,
    ) -> Result<Vec<LogEntry>>
    where
        T: Serialize,
        F: FnOnce(&mut LiveState, &[LogEntry]),
    {
        let mut writes = WriteBatch::new();
        match kind {
            Operation::Create | Operation::Update => {
                writes.put(key, serde_json::to_vec(value)?);
            }
            Operation::Delete => {
                writes.delete(key);
            }
        }

        self.history
            .append(ctx, operation, vec![event], writes, |entries| {
                self.apply(entries, |state| change(state, entries))
            })
    }
}

fn decode_slot<T: DeserializeOwned>(sequence: Sequence, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Integrity {
        sequence,
        message: format!("undecodable entity slot: {e}"),
    })
}

fn validate_voter(id: &VoterId, details: &VoterDetails) -> Result<()> {
    if id.is_blank() {
        return Err(Error::validation("voter id must not be blank"));
    }
    if details.name.trim().is_empty() {
        return Err(Error::validation("voter name must not be blank"));
    }
    if details.credential.is_empty() {
        return Err(Error::validation("voter credential must not be empty"));
    }
    Ok(())
}

fn validate_candidate(id: &CandidateId, details: &CandidateDetails) -> Result<()> {
    if id.is_blank() {
        return Err(Error::validation("candidate id must not be blank"));
    }
    if details.name.trim().is_empty() {
        return Err(Error::validation("candidate name must not be blank"));
    }
    Ok(())
}
