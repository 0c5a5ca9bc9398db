use serde::Serialize;

/// A persisted conversation (one chat for one tenant).
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub tenant_id: String,
    pub chat_id: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub label: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Write payload for [`crate::ConversationStore::upsert`]. Empty strings in
/// `display_name`/`avatar_url` mean "no new information".
#[derive(Debug, Clone)]
pub struct ConversationUpsert {
    pub tenant_id: String,
    pub chat_id: String,
    pub display_name: String,
    pub avatar_url: String,
}

/// Write payload for the message archive.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub tenant_id: String,
    pub event_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub body: String,
    pub content_kind: String,
    pub media_url: Option<String>,
    pub self_sent: bool,
    pub created_at: i64,
}

/// Write payload for the sales ledger.
#[derive(Debug, Clone)]
pub struct NewSale {
    pub tenant_id: String,
    /// Addressable contact identity.
    pub contact_id: String,
    pub item: String,
    pub amount: i64,
    pub paid: bool,
}

/// A keyword → response pair.
#[derive(Debug, Clone, Serialize)]
pub struct AutoReplyRule {
    pub tenant_id: String,
    pub keyword: String,
    pub response: String,
}
