//! Transport collaborator contract.
//!
//! The wire protocol lives in an external library; this crate defines the
//! seam the session layer talks through: connect, an event stream per
//! connection, and the send/logout operations on a live handle.

pub mod credentials;
pub mod event;
pub mod ident;
pub mod sidecar;

use std::sync::Arc;

use {anyhow::Result, async_trait::async_trait, tokio::sync::mpsc};

pub use {
    credentials::CredentialStore,
    event::{CloseReason, ContactUpdate, TransportEvent},
    sidecar::SidecarTransport,
};

/// Default capacity of the per-connection event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Presence states the transport can signal to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Composing,
    Paused,
}

/// Factory for live connections, one per tenant.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection for a tenant. `credentials` is the opaque blob from
    /// a previous pairing, or `None` to start a fresh pairing flow.
    ///
    /// Events for the connection arrive on the returned receiver until the
    /// transport emits [`TransportEvent::Closed`].
    async fn connect(
        &self,
        tenant_id: &str,
        credentials: Option<Vec<u8>>,
    ) -> Result<(Arc<dyn TransportHandle>, mpsc::Receiver<TransportEvent>)>;
}

/// Operations on a live connection.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<()>;
    async fn send_image(&self, to: &str, url: &str, caption: &str) -> Result<()>;
    /// Signal a presence state ("composing") to a peer. No-op by default.
    async fn send_presence(&self, _to: &str, _state: PresenceState) -> Result<()> {
        Ok(())
    }
    /// Terminate the pairing on the remote side and close the connection.
    async fn logout(&self) -> Result<()>;
}
