use serde::{Deserialize, Serialize};

/// Direct (one-to-one) vs. group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Direct,
    Group,
}

/// Content classification of a transport message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
    Video,
    Document,
}

impl ContentKind {
    /// Anything that carries a media payload rather than plain text.
    #[must_use]
    pub fn is_media(self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// Whether the event was received from a contact or sent from the tenant's
/// own device (the transport echoes self-sent messages back).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Received,
    SelfSent,
}

impl Direction {
    #[must_use]
    pub fn is_self_sent(self) -> bool {
        matches!(self, Self::SelfSent)
    }
}

/// A raw message event as delivered by the transport, before identity
/// resolution. Tenant scoping comes from the connection the event arrived on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Transport-assigned unique event identifier (dedup key).
    pub event_id: String,
    /// Chat the message belongs to (may be a linked identity).
    pub chat_id: String,
    /// Sender identity (may be a linked identity).
    pub sender_id: String,
    /// Transport-provided display name, when available.
    pub push_name: Option<String>,
    pub body: String,
    pub content_kind: ContentKind,
    pub chat_kind: ChatKind,
    pub direction: Direction,
    /// Reference to the media payload, for non-text content.
    pub media_url: Option<String>,
    /// System-tagged events (group notifications, protocol messages) are
    /// never eligible for auto replies.
    pub system: bool,
    /// Transport timestamp, unix millis.
    pub timestamp: i64,
}

/// A fully resolved message as published to subscribers and webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub tenant_id: String,
    pub event_id: String,
    /// Addressable chat identity after resolution.
    pub chat_id: String,
    /// Addressable sender identity after resolution.
    pub sender_id: String,
    pub display_name: String,
    pub body: String,
    pub content_kind: ContentKind,
    pub chat_kind: ChatKind,
    pub direction: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub timestamp: i64,
}

/// How a broadcast selects its recipients. A manual list always overrides
/// label-based selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecipientCriterion {
    /// Every conversation persisted for the tenant.
    All,
    /// Conversations carrying the given CRM label.
    Label { label: String },
    /// Explicit newline- or comma-separated identity list.
    Manual { list: String },
}
