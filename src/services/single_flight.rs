use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// One key's lock and the number of callers holding or awaiting it.
#[derive(Default)]
struct Slot {
    lock: Arc<tokio::sync::Mutex<()>>,
    users: usize,
}

type LockMap = Mutex<HashMap<String, Slot>>;

/// A map of per-key async locks.
///
/// Concurrent misses on the same cache key serialize behind one lock, so the
/// first caller computes and the rest find its result on their second cache
/// read. Entries are removed once no caller holds or awaits them, including
/// callers whose wait was cancelled.
#[derive(Default, Clone)]
pub struct KeyedLocks {
    locks: Arc<LockMap>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = locks.entry(key.to_owned()).or_default();
            slot.users += 1;
            slot.lock.clone()
        };
        // Built before waiting so that dropping this future mid-wait still
        // releases the slot.
        let mut guard = KeyGuard {
            key: key.to_owned(),
            guard: None,
            locks: self.locks.clone(),
        };
        guard.guard = Some(lock.lock_owned().await);
        guard
    }

    /// Number of keys currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct KeyGuard {
    key: String,
    /// Empty while waiting, and for good if the wait was cancelled.
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = locks.get_mut(&self.key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                locks.remove(&self.key);
            }
        }
    }
}
