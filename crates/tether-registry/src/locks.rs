//! Per-key async locks.
//!
//! Serializes registry mutations at the granularity of one registration
//! (or one endpoint for registrations). Entries exist only while someone
//! holds or waits on them.
//!
//! # Blocking Lock Usage
//!
//! The table itself uses `parking_lot::Mutex`: it is only held to clone or
//! drop an entry, never across `.await` points. The per-key locks are
//! `tokio::sync::Mutex` because they are held across store calls.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Table<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

/// Table of async mutexes keyed by `K`
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash + Clone> {
    table: Table<K>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Empty table
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &K) -> KeyGuard<K> {
        let entry = {
            let mut table = self.table.lock();
            Arc::clone(
                table
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let guard = entry.lock_owned().await;
        KeyGuard {
            guard: Some(guard),
            key: key.clone(),
            table: Arc::clone(&self.table),
        }
    }

    /// Number of keys currently held or awaited
    pub fn active_keys(&self) -> usize {
        self.table.lock().len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one key; released on drop
pub struct KeyGuard<K: Eq + Hash + Clone> {
    guard: Option<OwnedMutexGuard<()>>,
    key: K,
    table: Table<K>,
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        // Release before checking so our own reference is not counted.
        self.guard.take();
        let unused = table
            .get(&self.key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1);
        if unused {
            table.remove(&self.key);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_entries_pruned_after_release() {
        let locks: KeyedLocks<String> = KeyedLocks::new();
        {
            let _a = locks.lock(&"a".to_string()).await;
            let _b = locks.lock(&"b".to_string()).await;
            assert_eq!(locks.active_keys(), 2);
        }
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::<u32>::new());
        let guard = locks.lock(&1).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock(&1).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender acquires after release")
            .expect("task completes");
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::<u32>::new();
        let _one = locks.lock(&1).await;
        let two = tokio::time::timeout(Duration::from_millis(100), locks.lock(&2)).await;
        assert!(two.is_ok());
    }
}
