//! In-memory ledger storage backend.

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::debug;

use super::{BatchOp, EntityKey, LedgerStore, StoreError, WriteBatch};
use crate::types::{EntityKind, Sequence};

/// Entity slots and log entries, shared by the memory and file backends.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    entities: BTreeMap<EntityKey, Vec<u8>>,
    log: BTreeMap<Sequence, Vec<u8>>,
}

impl Tables {
    /// Check that the batch can be applied in full.
    ///
    /// Appends must continue the log without gaps, in ascending order.
    pub(crate) fn validate(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut expected = self.next_sequence();
        for op in batch.ops() {
            if let BatchOp::Append { sequence, .. } = op {
                if *sequence != expected {
                    return Err(StoreError::SequenceConflict {
                        expected,
                        found: *sequence,
                    });
                }
                expected += 1;
            }
        }
        Ok(())
    }

    /// Apply a batch that already passed [`validate`](Self::validate).
    pub(crate) fn apply(&mut self, batch: WriteBatch) {
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    self.entities.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    self.entities.remove(&key);
                }
                BatchOp::Append { sequence, entry } => {
                    self.log.insert(sequence, entry);
                }
            }
        }
    }

    pub(crate) fn next_sequence(&self) -> Sequence {
        self.log.keys().next_back().map_or(1, |last| last + 1)
    }

    pub(crate) fn get(&self, key: &EntityKey) -> Option<Vec<u8>> {
        self.entities.get(key).cloned()
    }

    pub(crate) fn entities(&self, kind: EntityKind) -> Vec<(String, Vec<u8>)> {
        self.entities
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .map(|(key, value)| (key.id.clone(), value.clone()))
            .collect()
    }

    pub(crate) fn scan_log(&self, from: Sequence) -> Vec<(Sequence, Vec<u8>)> {
        self.log
            .range(from..)
            .map(|(sequence, entry)| (*sequence, entry.clone()))
            .collect()
    }
}

/// In-memory ledger store backed by `RwLock<BTreeMap>`s.
///
/// Nothing survives the process; useful for tests and throwaway ledgers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Offline)
    }
}

impl LedgerStore for MemoryStore {
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| StoreError::Offline)?;
        tables.validate(&batch)?;
        debug!(ops = batch.len(), "committing batch to memory");
        tables.apply(batch);
        Ok(())
    }

    fn get(&self, key: &EntityKey) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read()?.get(key))
    }

    fn entities(&self, kind: EntityKind) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        Ok(self.read()?.entities(kind))
    }

    fn scan_log(&self, from: Sequence) -> Result<Vec<(Sequence, Vec<u8>)>, StoreError> {
        Ok(self.read()?.scan_log(from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voter_key(id: &str) -> EntityKey {
        EntityKey::new(EntityKind::Voter, id)
    }

    #[test]
    fn test_commit_put_and_append() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .put(voter_key("V1"), b"voter".to_vec())
            .append(1, b"entry-1".to_vec());

        store.commit(batch).unwrap();

        assert_eq!(store.get(&voter_key("V1")).unwrap(), Some(b"voter".to_vec()));
        assert_eq!(store.scan_log(1).unwrap(), vec![(1, b"entry-1".to_vec())]);
    }

    #[test]
    fn test_out_of_order_append_rejected_whole() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .put(voter_key("V1"), b"voter".to_vec())
            .append(2, b"skips one".to_vec());

        let err = store.commit(batch).unwrap_err();
        assert!(matches!(
            err,
            StoreError::SequenceConflict {
                expected: 1,
                found: 2
            }
        ));

        // Nothing from the rejected batch is visible
        assert_eq!(store.get(&voter_key("V1")).unwrap(), None);
        assert!(store.scan_log(0).unwrap().is_empty());
    }

    #[test]
    fn test_delete_and_entities_by_kind() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .put(voter_key("V1"), b"a".to_vec())
            .put(voter_key("V2"), b"b".to_vec())
            .put(EntityKey::new(EntityKind::Candidate, "C1"), b"c".to_vec());
        store.commit(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.delete(voter_key("V1"));
        store.commit(batch).unwrap();

        let voters = store.entities(EntityKind::Voter).unwrap();
        assert_eq!(voters, vec![("V2".to_string(), b"b".to_vec())]);
        assert_eq!(store.entities(EntityKind::Candidate).unwrap().len(), 1);
    }

    #[test]
    fn test_scan_log_from_offset() {
        let store = MemoryStore::new();
        for sequence in 1..=3 {
            let mut batch = WriteBatch::new();
            batch.append(sequence, vec![sequence as u8]);
            store.commit(batch).unwrap();
        }

        let tail: Vec<Sequence> = store.scan_log(2).unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(tail, vec![2, 3]);
    }
}
