//! In-memory store, used by unit tests across the workspace and as the
//! fallback when no database is configured. Mirrors the SQLite upsert
//! semantics exactly.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use {anyhow::Result, async_trait::async_trait};

use pesan_transport::CredentialStore;

use crate::{
    AutoReplyRule, Conversation, ConversationStore, ConversationUpsert, MessageStore, NewMessage,
    NewSale, RuleStore, SaleStore,
};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Default)]
struct Inner {
    conversations: HashMap<(String, String), Conversation>,
    messages: Vec<NewMessage>,
    sales: Vec<NewSale>,
    rules: Vec<AutoReplyRule>,
    credentials: HashMap<(String, String), Vec<u8>>,
}

/// Everything behind one mutex; fine for tests and small installs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an auto-reply rule (tests and fallback config only; production
    /// rules come from the relational store).
    pub fn add_rule(&self, tenant_id: &str, keyword: &str, response: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.rules.push(AutoReplyRule {
                tenant_id: tenant_id.into(),
                keyword: keyword.into(),
                response: response.into(),
            });
        }
    }

    /// Attach a CRM label to a stored conversation.
    pub fn set_label(&self, tenant_id: &str, chat_id: &str, label: &str) {
        if let Ok(mut inner) = self.inner.lock()
            && let Some(conv) = inner
                .conversations
                .get_mut(&(tenant_id.to_string(), chat_id.to_string()))
        {
            conv.label = Some(label.into());
        }
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().map(|i| i.messages.len()).unwrap_or(0)
    }

    pub fn sales(&self) -> Vec<NewSale> {
        self.inner.lock().map(|i| i.sales.clone()).unwrap_or_default()
    }

    pub fn conversation(&self, tenant_id: &str, chat_id: &str) -> Option<Conversation> {
        self.inner
            .lock()
            .ok()?
            .conversations
            .get(&(tenant_id.to_string(), chat_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn upsert(&self, conv: ConversationUpsert) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        let key = (conv.tenant_id.clone(), conv.chat_id.clone());
        let now = now_ms();
        match inner.conversations.get_mut(&key) {
            Some(existing) => {
                if !conv.display_name.is_empty() {
                    existing.display_name = Some(conv.display_name);
                }
                if !conv.avatar_url.is_empty() {
                    existing.avatar_url = Some(conv.avatar_url);
                }
                existing.updated_at = now;
            },
            None => {
                inner.conversations.insert(key, Conversation {
                    tenant_id: conv.tenant_id,
                    chat_id: conv.chat_id,
                    display_name: (!conv.display_name.is_empty()).then_some(conv.display_name),
                    avatar_url: (!conv.avatar_url.is_empty()).then_some(conv.avatar_url),
                    label: None,
                    created_at: now,
                    updated_at: now,
                });
            },
        }
        Ok(())
    }

    async fn list(&self, tenant_id: &str, label: Option<&str>) -> Result<Vec<Conversation>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(inner
            .conversations
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .filter(|c| label.is_none() || c.label.as_deref() == label)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, msg: NewMessage) -> Result<()> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?
            .messages
            .push(msg);
        Ok(())
    }
}

#[async_trait]
impl SaleStore for MemoryStore {
    async fn create(&self, sale: NewSale) -> Result<()> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?
            .sales
            .push(sale);
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn list(&self, tenant_id: &str) -> Result<Vec<AutoReplyRule>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(inner
            .rules
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self, tenant_id: &str, slot: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?
            .credentials
            .get(&(tenant_id.to_string(), slot.to_string()))
            .cloned())
    }

    async fn save(&self, tenant_id: &str, slot: &str, blob: &[u8]) -> Result<()> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?
            .credentials
            .insert((tenant_id.to_string(), slot.to_string()), blob.to_vec());
        Ok(())
    }

    async fn delete_tenant(&self, tenant_id: &str) -> Result<()> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?
            .credentials
            .retain(|(t, _), _| t != tenant_id);
        Ok(())
    }

    async fn tenants(&self) -> Result<Vec<String>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        let mut ids: Vec<String> = inner.credentials.keys().map(|(t, _)| t.clone()).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
