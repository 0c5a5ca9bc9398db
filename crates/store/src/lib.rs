//! Persistence contract for the gateway core.
//!
//! Components talk to narrow async traits ([`ConversationStore`],
//! [`MessageStore`], [`SaleStore`], [`RuleStore`]); the SQLite
//! implementation backs them all with one pool. The relational store is the
//! source of truth; in-memory caches elsewhere are optimizations only.

pub mod memory;
pub mod sqlite;
pub mod types;

use {anyhow::Result, async_trait::async_trait};

pub use {
    memory::MemoryStore,
    sqlite::{SqliteCredentialStore, SqliteStore},
    types::{AutoReplyRule, Conversation, ConversationUpsert, NewMessage, NewSale},
};

/// Run database migrations. Call once at startup before constructing stores.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Conversation records, one per (tenant, chat).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert-if-absent; on conflict only non-empty display/avatar fields
    /// overwrite what is already stored.
    async fn upsert(&self, conv: ConversationUpsert) -> Result<()>;

    /// List conversations for a tenant, optionally filtered by CRM label.
    async fn list(&self, tenant_id: &str, label: Option<&str>) -> Result<Vec<Conversation>>;
}

/// Append-only message archive.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, msg: NewMessage) -> Result<()>;
}

/// Sales ledger. Callers resolve identities to the addressable namespace
/// before recording.
#[async_trait]
pub trait SaleStore: Send + Sync {
    async fn create(&self, sale: NewSale) -> Result<()>;
}

/// Per-tenant auto-reply rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list(&self, tenant_id: &str) -> Result<Vec<AutoReplyRule>>;
}
