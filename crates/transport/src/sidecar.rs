//! WebSocket client for the wire-protocol sidecar.
//!
//! The actual messaging protocol runs in a separate sidecar process; this
//! module speaks newline-free JSON frames to it over one WebSocket per
//! tenant and translates those frames into [`TransportEvent`]s. Credential
//! blobs cross the socket base64-encoded.

use std::sync::Arc;

use {
    anyhow::{Context, Result, anyhow},
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    futures::{SinkExt, StreamExt},
    pesan_common::MessageEvent,
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
    tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage},
    tracing::{debug, warn},
};

use crate::{
    CloseReason, ContactUpdate, EVENT_CHANNEL_CAPACITY, PresenceState, Transport, TransportEvent,
    TransportHandle,
};

/// Outbound command frames, client → sidecar.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Command {
    /// First frame on every connection; restores a pairing when credentials
    /// are present, starts a fresh pairing flow otherwise.
    Init { credentials: Option<String> },
    SendText { to: String, body: String },
    SendImage { to: String, url: String, caption: String },
    Presence { to: String, state: String },
    Logout,
}

/// Inbound frames, sidecar → client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    Qr { code: String },
    Ready { phone_number: Option<String> },
    /// Refreshed credential blob, base64.
    Credentials { blob: String },
    Contacts { contacts: Vec<ContactUpdate> },
    Message { message: MessageEvent },
    GroupMetadata { chat_id: String, subject: String },
    Closed { logged_out: bool, detail: Option<String> },
}

impl Frame {
    fn into_event(self) -> Option<TransportEvent> {
        match self {
            Self::Qr { code } => Some(TransportEvent::Qr { code }),
            Self::Ready { phone_number } => Some(TransportEvent::Ready { phone_number }),
            Self::Credentials { blob } => match BASE64.decode(&blob) {
                Ok(blob) => Some(TransportEvent::CredentialsUpdate { blob }),
                Err(e) => {
                    warn!(error = %e, "discarding undecodable credential frame");
                    None
                },
            },
            Self::Contacts { contacts } => Some(TransportEvent::ContactsUpserted { contacts }),
            Self::Message { message } => Some(TransportEvent::Message(Box::new(message))),
            Self::GroupMetadata { chat_id, subject } => {
                Some(TransportEvent::GroupMetadata { chat_id, subject })
            },
            Self::Closed { logged_out, detail } => {
                let reason = if logged_out {
                    CloseReason::LoggedOut
                } else {
                    CloseReason::recoverable(detail.unwrap_or_else(|| "connection closed".into()))
                };
                Some(TransportEvent::Closed { reason })
            },
        }
    }
}

/// [`Transport`] implementation backed by a sidecar process.
pub struct SidecarTransport {
    base_url: String,
}

impl SidecarTransport {
    /// `base_url` is the sidecar's WebSocket root, e.g. `ws://127.0.0.1:3012`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Transport for SidecarTransport {
    async fn connect(
        &self,
        tenant_id: &str,
        credentials: Option<Vec<u8>>,
    ) -> Result<(Arc<dyn TransportHandle>, mpsc::Receiver<TransportEvent>)> {
        let url = format!(
            "{}/session/{tenant_id}",
            self.base_url.trim_end_matches('/')
        );
        let (socket, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("sidecar connect failed: {url}"))?;
        debug!(tenant_id, url, "sidecar socket open");
        let (mut writer, mut reader) = socket.split();

        let init = Command::Init {
            credentials: credentials.map(|blob| BASE64.encode(blob)),
        };
        writer
            .send(WsMessage::text(serde_json::to_string(&init)?))
            .await
            .context("sidecar init frame rejected")?;

        // Commands funnel through a channel so the handle stays cheap to
        // clone and never touches the socket directly.
        let (command_tx, mut command_rx) = mpsc::channel::<Command>(16);
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                let text = match serde_json::to_string(&command) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "unserializable sidecar command dropped");
                        continue;
                    },
                };
                if writer.send(WsMessage::text(text)).await.is_err() {
                    break;
                }
            }
        });

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let event = match serde_json::from_str::<Frame>(&text) {
                    Ok(frame) => frame.into_event(),
                    Err(e) => {
                        warn!(error = %e, "undecodable sidecar frame skipped");
                        None
                    },
                };
                let Some(event) = event else { continue };
                let closing = matches!(event, TransportEvent::Closed { .. });
                if event_tx.send(event).await.is_err() || closing {
                    return;
                }
            }
            // Socket died without a Closed frame.
            let _ = event_tx
                .send(TransportEvent::Closed {
                    reason: CloseReason::recoverable("sidecar socket dropped"),
                })
                .await;
        });

        Ok((Arc::new(SidecarHandle { commands: command_tx }), event_rx))
    }
}

struct SidecarHandle {
    commands: mpsc::Sender<Command>,
}

impl SidecarHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("sidecar connection closed"))
    }
}

#[async_trait]
impl TransportHandle for SidecarHandle {
    async fn send_text(&self, to: &str, body: &str) -> Result<()> {
        self.send(Command::SendText {
            to: to.into(),
            body: body.into(),
        })
        .await
    }

    async fn send_image(&self, to: &str, url: &str, caption: &str) -> Result<()> {
        self.send(Command::SendImage {
            to: to.into(),
            url: url.into(),
            caption: caption.into(),
        })
        .await
    }

    async fn send_presence(&self, to: &str, state: PresenceState) -> Result<()> {
        let state = match state {
            PresenceState::Composing => "composing",
            PresenceState::Paused => "paused",
        };
        self.send(Command::Presence {
            to: to.into(),
            state: state.into(),
        })
        .await
    }

    async fn logout(&self) -> Result<()> {
        self.send(Command::Logout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_frame_decodes_into_event() {
        let raw = r#"{
            "type": "message",
            "message": {
                "event_id": "ABC123",
                "chat_id": "628111@c.us",
                "sender_id": "628111@c.us",
                "push_name": "Budi",
                "body": "halo",
                "content_kind": "text",
                "chat_kind": "direct",
                "direction": "received",
                "media_url": null,
                "system": false,
                "timestamp": 1700000000000
            }
        }"#;
        let frame: Frame = serde_json::from_str(raw).unwrap();
        let Some(TransportEvent::Message(event)) = frame.into_event() else {
            panic!("expected a message event");
        };
        assert_eq!(event.event_id, "ABC123");
        assert_eq!(event.body, "halo");
    }

    #[test]
    fn credentials_frame_round_trips_base64() {
        let raw = format!(
            r#"{{"type": "credentials", "blob": "{}"}}"#,
            BASE64.encode(b"opaque-creds")
        );
        let frame: Frame = serde_json::from_str(&raw).unwrap();
        let Some(TransportEvent::CredentialsUpdate { blob }) = frame.into_event() else {
            panic!("expected a credentials event");
        };
        assert_eq!(blob, b"opaque-creds");
    }

    #[test]
    fn undecodable_credentials_are_dropped() {
        let frame: Frame =
            serde_json::from_str(r#"{"type": "credentials", "blob": "!!"}"#).unwrap();
        assert!(frame.into_event().is_none());
    }

    #[test]
    fn closed_frame_maps_logout_to_terminal_reason() {
        let frame: Frame =
            serde_json::from_str(r#"{"type": "closed", "logged_out": true, "detail": null}"#)
                .unwrap();
        let Some(TransportEvent::Closed { reason }) = frame.into_event() else {
            panic!("expected a closed event");
        };
        assert!(reason.is_logged_out());

        let frame: Frame = serde_json::from_str(
            r#"{"type": "closed", "logged_out": false, "detail": "stream errored"}"#,
        )
        .unwrap();
        let Some(TransportEvent::Closed { reason }) = frame.into_event() else {
            panic!("expected a closed event");
        };
        assert_eq!(reason, CloseReason::recoverable("stream errored"));
    }

    #[test]
    fn init_command_carries_base64_credentials() {
        let json = serde_json::to_string(&Command::Init {
            credentials: Some(BASE64.encode(b"blob")),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"init","credentials":"YmxvYg=="}"#);

        let json = serde_json::to_string(&Command::Presence {
            to: "628@c.us".into(),
            state: "composing".into(),
        })
        .unwrap();
        assert!(json.contains(r#""state":"composing""#));
    }
}
