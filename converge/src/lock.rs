//! Serialization of multi-call sequences
//!
//! Some remote resources share mutable state on the control plane (for
//! example the ordered rule list of a security policy), so the calls that
//! touch them must not interleave. The driver acquires an [`ActionLock`]
//! keyed by resource kind around such sequences. Operations on one handle
//! must additionally never be issued concurrently by the same caller; that
//! discipline is the caller's responsibility.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// Held for the duration of a serialized sequence; releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ActionGuard {
    _guard: Option<OwnedMutexGuard<()>>,
}

impl ActionGuard {
    /// Guard that holds nothing, for locks that do not serialize.
    pub fn unlocked() -> Self {
        Self { _guard: None }
    }
}

#[async_trait]
pub trait ActionLock: Send + Sync {
    async fn acquire(&self, key: &str) -> ActionGuard;
}

/// One async mutex per key, created on first use.
#[derive(Default)]
pub struct KeyedLock {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}

#[async_trait]
impl ActionLock for KeyedLock {
    async fn acquire(&self, key: &str) -> ActionGuard {
        let slot = self.slot(key);
        tracing::trace!("Acquiring action lock {}", key);
        ActionGuard {
            _guard: Some(slot.lock_owned().await),
        }
    }
}

/// Lock that never blocks. For tests and for callers that serialize externally.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLock;

#[async_trait]
impl ActionLock for NoopLock {
    async fn acquire(&self, _key: &str) -> ActionGuard {
        ActionGuard::unlocked()
    }
}
