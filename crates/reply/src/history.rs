//! Bounded per-identity conversation history for AI context.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use crate::generator::HistoryTurn;

/// Maximum exchanges (user + assistant pairs) kept per identity.
pub const MAX_TURNS: usize = 10;

/// Process-wide history ring keyed by `(tenant, identity)`. Purely an AI
/// context window; the message archive in the store is the real record.
#[derive(Clone, Default)]
pub struct HistoryStore {
    inner: Arc<Mutex<HashMap<(String, String), VecDeque<HistoryTurn>>>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, tenant_id: &str, identity: &str, turn: HistoryTurn) {
        if let Ok(mut inner) = self.inner.lock() {
            let ring = inner
                .entry((tenant_id.to_string(), identity.to_string()))
                .or_default();
            if ring.len() >= MAX_TURNS * 2 {
                ring.pop_front();
            }
            ring.push_back(turn);
        }
    }

    pub fn push_user(&self, tenant_id: &str, identity: &str, content: &str) {
        self.push(tenant_id, identity, HistoryTurn {
            role: "user".into(),
            content: content.into(),
        });
    }

    pub fn push_assistant(&self, tenant_id: &str, identity: &str, content: &str) {
        self.push(tenant_id, identity, HistoryTurn {
            role: "assistant".into(),
            content: content.into(),
        });
    }

    #[must_use]
    pub fn turns(&self, tenant_id: &str, identity: &str) -> Vec<HistoryTurn> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| {
                inner
                    .get(&(tenant_id.to_string(), identity.to_string()))
                    .map(|r| r.iter().cloned().collect())
            })
            .unwrap_or_default()
    }

    pub fn clear_tenant(&self, tenant_id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.retain(|(t, _), _| t != tenant_id);
        }
    }
}
