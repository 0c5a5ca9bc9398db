//! SQLite-backed store implementations.

use std::time::{SystemTime, UNIX_EPOCH};

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

#[derive(sqlx::FromRow)]
struct ConversationRow {
    tenant_id: String,
    chat_id: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
    label: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl From<ConversationRow> for Conversation {
    fn from(r: ConversationRow) -> Self {
        Self {
            tenant_id: r.tenant_id,
            chat_id: r.chat_id,
            display_name: r.display_name,
            avatar_url: r.avatar_url,
            label: r.label,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    tenant_id: String,
    keyword: String,
    response: String,
}

/// One pool, all store traits.
#[derive(Clone)]
pub struct SqliteStore {
    pool: sqlx::SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn upsert(&self, conv: ConversationUpsert) -> Result<()> {
        let now = now_ms();
        sqlx::query(
            r#"INSERT INTO conversations (tenant_id, chat_id, display_name, avatar_url, created_at, updated_at)
               VALUES (?, ?, NULLIF(?, ''), NULLIF(?, ''), ?, ?)
               ON CONFLICT(tenant_id, chat_id) DO UPDATE SET
                 display_name = COALESCE(NULLIF(excluded.display_name, ''), conversations.display_name),
                 avatar_url   = COALESCE(NULLIF(excluded.avatar_url, ''), conversations.avatar_url),
                 updated_at   = excluded.updated_at"#,
        )
        .bind(&conv.tenant_id)
        .bind(&conv.chat_id)
        .bind(&conv.display_name)
        .bind(&conv.avatar_url)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, tenant_id: &str, label: Option<&str>) -> Result<Vec<Conversation>> {
        let rows = match label {
            Some(label) => {
                sqlx::query_as::<_, ConversationRow>(
                    "SELECT tenant_id, chat_id, display_name, avatar_url, label, created_at, updated_at \
                     FROM conversations WHERE tenant_id = ? AND label = ? ORDER BY updated_at DESC",
                )
                .bind(tenant_id)
                .bind(label)
                .fetch_all(&self.pool)
                .await?
            },
            None => {
                sqlx::query_as::<_, ConversationRow>(
                    "SELECT tenant_id, chat_id, display_name, avatar_url, label, created_at, updated_at \
                     FROM conversations WHERE tenant_id = ? ORDER BY updated_at DESC",
                )
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await?
            },
        };
        Ok(rows.into_iter().map(Conversation::from).collect())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert(&self, msg: NewMessage) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO messages
               (tenant_id, event_id, chat_id, sender_id, body, content_kind, media_url, self_sent, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&msg.tenant_id)
        .bind(&msg.event_id)
        .bind(&msg.chat_id)
        .bind(&msg.sender_id)
        .bind(&msg.body)
        .bind(&msg.content_kind)
        .bind(&msg.media_url)
        .bind(msg.self_sent)
        .bind(msg.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SaleStore for SqliteStore {
    async fn create(&self, sale: NewSale) -> Result<()> {
        sqlx::query(
            "INSERT INTO sales (tenant_id, contact_id, item, amount, paid, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&sale.tenant_id)
        .bind(&sale.contact_id)
        .bind(&sale.item)
        .bind(sale.amount)
        .bind(sale.paid)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RuleStore for SqliteStore {
    async fn list(&self, tenant_id: &str) -> Result<Vec<AutoReplyRule>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            "SELECT tenant_id, keyword, response FROM auto_reply_rules WHERE tenant_id = ? ORDER BY id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| AutoReplyRule {
                tenant_id: r.tenant_id,
                keyword: r.keyword,
                response: r.response,
            })
            .collect())
    }
}

/// SQLite-backed credential blobs, keyed by `(tenant_id, slot)`.
#[derive(Clone)]
pub struct SqliteCredentialStore {
    pool: sqlx::SqlitePool,
}

impl SqliteCredentialStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn load(&self, tenant_id: &str, slot: &str) -> Result<Option<Vec<u8>>> {
        let blob = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT blob FROM transport_credentials WHERE tenant_id = ? AND slot = ?",
        )
        .bind(tenant_id)
        .bind(slot)
        .fetch_optional(&self.pool)
        .await?;
        Ok(blob)
    }

    async fn save(&self, tenant_id: &str, slot: &str, blob: &[u8]) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO transport_credentials (tenant_id, slot, blob, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(tenant_id, slot) DO UPDATE SET
                 blob = excluded.blob, updated_at = excluded.updated_at"#,
        )
        .bind(tenant_id)
        .bind(slot)
        .bind(blob)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_tenant(&self, tenant_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM transport_credentials WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn tenants(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT tenant_id FROM transport_credentials ORDER BY tenant_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
