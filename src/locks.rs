//! Striped async locks
//!
//! A fixed number of stripes, each holding a weak reference to a
//! `tokio::sync::Mutex`. A stripe's mutex is created on first use and
//! dropped once the last holder releases it. Keys that hash to the same
//! stripe share a mutex.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::OwnedMutexGuard;

pub const DEFAULT_STRIPES: usize = 64;

#[derive(Debug)]
pub struct StripedLocks {
    stripes: Vec<Mutex<Weak<tokio::sync::Mutex<()>>>>,
}

impl Default for StripedLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

impl StripedLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(Weak::new())).collect(),
        }
    }

    fn index<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// The mutex guarding `key`'s stripe
    pub fn lock_for<K: Hash + ?Sized>(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
        let mut slot = match self.stripes[self.index(key)].lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = slot.upgrade() {
            return existing;
        }
        let fresh = Arc::new(tokio::sync::Mutex::new(()));
        *slot = Arc::downgrade(&fresh);
        fresh
    }

    /// Wait for and hold `key`'s stripe
    pub async fn acquire<K: Hash + ?Sized>(&self, key: &K) -> OwnedMutexGuard<()> {
        self.lock_for(key).lock_owned().await
    }
}
