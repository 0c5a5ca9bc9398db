//! Short-lived record of processed event identifiers.
//!
//! The transport delivers at-least-once; this guard absorbs re-delivery
//! within a fixed window. Entries expire individually by timestamp with a
//! periodic sweep, so a sweep never opens a gap that lets a fresh
//! duplicate through.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use {tokio_util::sync::CancellationToken, tracing::debug};

/// How long a seen event identifier suppresses re-processing.
pub const DEDUP_TTL: Duration = Duration::from_secs(5 * 60);

/// Atomic seen-set for event identifiers, shared by every in-flight handler.
#[derive(Clone)]
pub struct DedupGuard {
    seen: Arc<Mutex<HashMap<String, Instant>>>,
    ttl: Duration,
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new(DEDUP_TTL)
    }
}

impl DedupGuard {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Check-and-mark in one step. Returns `true` exactly once per
    /// identifier within the TTL window.
    #[must_use]
    pub fn should_process(&self, event_id: &str) -> bool {
        let Ok(mut seen) = self.seen.lock() else {
            return true;
        };
        let now = Instant::now();
        match seen.get(event_id) {
            Some(at) if now.duration_since(*at) < self.ttl => false,
            _ => {
                seen.insert(event_id.to_string(), now);
                true
            },
        }
    }

    /// Drop expired entries. Called by the sweep loop; harmless to call at
    /// any time.
    pub fn sweep(&self) {
        if let Ok(mut seen) = self.seen.lock() {
            let now = Instant::now();
            let before = seen.len();
            seen.retain(|_, at| now.duration_since(*at) < self.ttl);
            if before != seen.len() {
                debug!(removed = before - seen.len(), "dedup sweep");
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodic sweep task; runs until cancelled.
pub async fn run_sweep_loop(guard: DedupGuard, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => guard.sweep(),
            _ = cancel.cancelled() => break,
        }
    }
}
