use {
    pesan_common::MessageEvent,
    serde::{Deserialize, Serialize},
};

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloseReason {
    /// The tenant unpaired the device. Terminal, credentials are invalid.
    LoggedOut,
    /// Anything recoverable (network drop, server restart).
    Recoverable { detail: String },
}

impl CloseReason {
    #[must_use]
    pub fn is_logged_out(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }

    #[must_use]
    pub fn recoverable(detail: impl Into<String>) -> Self {
        Self::Recoverable {
            detail: detail.into(),
        }
    }
}

/// A contact record pushed by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactUpdate {
    /// Stable, addressable identity.
    pub identity: String,
    pub name: Option<String>,
    /// Alternate identity the transport may use for the same contact.
    pub linked_identity: Option<String>,
}

/// Events delivered on a connection's event channel.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A pairing code to present to the tenant.
    Qr { code: String },
    /// Connection authenticated and live.
    Ready { phone_number: Option<String> },
    /// Refreshed credential blob to persist for the next connect.
    CredentialsUpdate { blob: Vec<u8> },
    /// Connection closed; see the reason for whether reconnect makes sense.
    Closed { reason: CloseReason },
    /// Contact book sync from the transport.
    ContactsUpserted { contacts: Vec<ContactUpdate> },
    /// An inbound or self-sent message.
    Message(Box<MessageEvent>),
    /// Group subject lookup result.
    GroupMetadata { chat_id: String, subject: String },
}
