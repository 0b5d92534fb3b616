//! Caller deadline and abandonment for a single ledger operation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Limits attached to one operation.
///
/// Every mutating call checks its context on entry and again at the commit
/// point, under the log tail lock. Past that point a commit cannot be
/// withdrawn; an operation that misses its deadline before it has
/// no effect.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    deadline: Option<Instant>,
    abandoned: Option<Arc<AtomicBool>>,
}

impl OperationContext {
    /// No deadline, cannot be abandoned.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            abandoned: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Attach an abandonment flag and return the handle that raises it.
    pub fn abandonable(mut self) -> (Self, AbandonSignal) {
        let flag = Arc::new(AtomicBool::new(false));
        self.abandoned = Some(flag.clone());
        (self, AbandonSignal { flag })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Fail if the caller gave up or the deadline passed.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_abandoned() {
            return Err(Error::Cancelled {
                operation: operation.to_string(),
            });
        }
        if self.is_expired() {
            return Err(Error::Timeout {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}

/// Raises the abandonment flag of an [`OperationContext`].
#[derive(Debug, Clone)]
pub struct AbandonSignal {
    flag: Arc<AtomicBool>,
}

impl AbandonSignal {
    pub fn abandon(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}
