//! Per-key async mutual exclusion.
//!
//! At most one guard per key is live at a time. Slots are created on demand
//! and removed when the last holder or waiter goes away, including when a
//! waiting future is dropped before it acquires the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type SlotMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Map of per-key async mutexes.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    slots: SlotMap,
}

/// Exclusive access to one key; released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    // Field order matters: the mutex guard must drop before the slot reference.
    _guard: OwnedMutexGuard<()>,
    _slot: SlotRef,
}

#[derive(Debug)]
struct SlotRef {
    key: String,
    mutex: Arc<AsyncMutex<()>>,
    slots: SlotMap,
}

impl Drop for SlotRef {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here: nobody else holds or waits.
        if Arc::strong_count(&self.mutex) == 2 {
            slots.remove(&self.key);
        }
    }
}

impl KeyGuard {
    /// The key this guard holds.
    #[must_use]
    pub fn key(&self) -> &str {
        &self._slot.key
    }
}

impl KeyedLocks {
    /// Create an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let slot = self.slot(key);
        let guard = Arc::clone(&slot.mutex).lock_owned().await;
        KeyGuard { _guard: guard, _slot: slot }
    }

    /// Acquire several keys at once, in sorted order so that overlapping
    /// multi-key acquisitions cannot deadlock.
    pub async fn lock_many<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Vec<KeyGuard> {
        let mut keys: Vec<&str> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Number of keys with a live slot.
    #[must_use]
    pub fn active(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn slot(&self, key: &str) -> SlotRef {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mutex = Arc::clone(slots.entry(key.to_string()).or_default());
        SlotRef { key: key.to_string(), mutex, slots: Arc::clone(&self.slots) }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_slot_removed_after_release() {
        let locks = KeyedLocks::new();
        {
            let guard = locks.lock("a").await;
            assert_eq!(guard.key(), "a");
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = KeyedLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("paper").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_leak() {
        let locks = KeyedLocks::new();
        let held = locks.lock("a").await;

        let waiter = tokio::time::timeout(Duration::from_millis(10), locks.lock("a")).await;
        assert!(waiter.is_err());

        drop(held);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_lock_many_dedups_keys() {
        let locks = KeyedLocks::new();
        let guards = locks.lock_many(["b", "a", "b"]).await;
        assert_eq!(guards.len(), 2);
        drop(guards);
        assert_eq!(locks.active(), 0);
    }
}
