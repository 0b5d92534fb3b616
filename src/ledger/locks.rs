//! Per-entity exclusive access scopes.
//!
//! Each voter and candidate id gets its own mutex. Multi-entity operations
//! take scopes in a fixed order: voter, then candidate, then the log tail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::storage::EntityKey;
use crate::types::EntityKind;
use crate::{Result, internal_error};

/// Exclusive scope for one entity id.
pub(crate) type Scope = Arc<Mutex<()>>;

/// Lazily populated table of entity scopes.
///
/// Scopes are never removed: ids are never reused, so the table is bounded
/// by the number of ids ever seen.
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    scopes: Mutex<HashMap<EntityKey, Scope>>,
}

impl LockTable {
    pub(crate) fn scope(&self, kind: EntityKind, id: &str) -> Result<Scope> {
        let mut scopes = self
            .scopes
            .lock()
            .map_err(|_| internal_error!("Lock table poisoned"))?;
        Ok(scopes
            .entry(EntityKey::new(kind, id))
            .or_default()
            .clone())
    }
}

/// Enter a scope.
///
/// The guarded value is `()`, so a panic in an earlier holder cannot leave
/// anything half-written behind it; poisoning is ignored.
pub(crate) fn enter(scope: &Scope) -> MutexGuard<'_, ()> {
    scope.lock().unwrap_or_else(PoisonError::into_inner)
}
