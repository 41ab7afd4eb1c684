//! Keyed lock - Serialize operations against the same remote object
//!
//! Some APIs misbehave when two mutations of the same object race (e.g.,
//! authorizing two rules on one security group at once). `KeyedMutex` hands
//! out one async mutex per key, created on first use and dropped again once
//! nobody holds or waits for it.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use log::trace;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A set of async mutexes addressed by key
#[derive(Debug)]
pub struct KeyedMutex<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone + std::fmt::Debug> KeyedMutex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: K) -> KeyedGuard<'_, K> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        trace!("Waiting for lock on {:?}", key);
        let pending = PendingLock {
            owner: self,
            key: &key,
            armed: true,
        };
        let guard = mutex.lock_owned().await;
        pending.disarm();
        trace!("Acquired lock on {:?}", key);

        KeyedGuard {
            owner: self,
            key,
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or waited on
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash> KeyedMutex<K> {
    /// Drop the entry for `key` if only the map still references its mutex
    fn prune(&self, key: &K) {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Prunes the entry when a `lock()` future is dropped before acquiring
struct PendingLock<'a, 'k, K: Eq + Hash> {
    owner: &'a KeyedMutex<K>,
    key: &'k K,
    armed: bool,
}

impl<K: Eq + Hash> PendingLock<'_, '_, K> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<K: Eq + Hash> Drop for PendingLock<'_, '_, K> {
    fn drop(&mut self) {
        if self.armed {
            self.owner.prune(self.key);
        }
    }
}

/// Exclusive access to one key; released on drop
#[derive(Debug)]
pub struct KeyedGuard<'a, K: Eq + Hash> {
    owner: &'a KeyedMutex<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash> KeyedGuard<'_, K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.owner.prune(&self.key);
    }
}
