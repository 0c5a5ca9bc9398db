//! Per-key async ordering locks.
//!
//! The upsert-then-persist sequence suspends on I/O, so two back-to-back
//! events for the same chat could interleave and corrupt the
//! create-vs-update decision. Holding the chat's lock across that sequence
//! serializes it per chat while leaving different chats fully concurrent.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::OwnedMutexGuard;

#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting behind earlier holders.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let Ok(mut locks) = self.locks.lock() else {
                // Poisoned registry: fall back to a fresh lock rather than
                // stalling the event. Ordering degrades, processing does not.
                return Arc::new(tokio::sync::Mutex::new(())).lock_owned().await;
            };
            // Drop entries nobody is waiting on, so the map tracks live
            // chats instead of growing forever.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        entry.lock_owned().await
    }
}
