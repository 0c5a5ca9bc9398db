//! The session registry and per-tenant connection loop.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    pesan_pipeline::{EventSink, GatewayEvent, MessageIngestionPipeline, TenantLink},
    pesan_transport::{CredentialStore, Transport, TransportEvent, credentials::PRIMARY_SLOT},
};

use crate::{Error, Result, SessionState};

/// Pause before re-establishing a connection after a recoverable closure.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Reconnect delay with jitter so tenants don't stampede the transport
/// after a shared outage.
fn reconnect_delay() -> Duration {
    RECONNECT_DELAY + Duration::from_millis(rand::random_range(0..1000))
}

struct Session {
    state: SessionState,
    link: Option<Arc<TenantLink>>,
    pending_qr: Option<String>,
    cancel: CancellationToken,
}

/// What the event loop should do after handling one event.
enum Flow {
    Continue,
    Reconnect,
    LoggedOut,
}

/// Owns every live session, exactly one per tenant. Cheap to clone; all
/// clones share the same registry.
#[derive(Clone)]
pub struct SessionRegistry {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    pipeline: Arc<MessageIngestionPipeline>,
    sink: Arc<dyn EventSink>,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionRegistry {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        pipeline: Arc<MessageIngestionPipeline>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            transport,
            credentials,
            pipeline,
            sink,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start (or return) the session for a tenant. Idempotent: a tenant
    /// that already has a session gets its current state back with no new
    /// transport connect.
    pub fn activate(&self, tenant_id: &str, webhook_url: Option<&str>) -> SessionState {
        {
            let Ok(mut sessions) = self.sessions.write() else {
                return SessionState::Disconnected;
            };
            if let Some(existing) = sessions.get(tenant_id) {
                debug!(tenant_id, state = %existing.state, "activate on existing session");
                return existing.state;
            }
            let cancel = CancellationToken::new();
            sessions.insert(tenant_id.to_string(), Session {
                state: SessionState::Connecting,
                link: None,
                pending_qr: None,
                cancel: cancel.clone(),
            });
        }

        if let Some(url) = webhook_url {
            self.pipeline.set_webhook(tenant_id, url);
        }

        info!(tenant_id, "starting session");
        let registry = self.clone();
        let tenant = tenant_id.to_string();
        let cancel = self.cancel_token(tenant_id);
        tokio::spawn(async move {
            registry.run_connection(tenant, cancel).await;
        });

        SessionState::Connecting
    }

    /// Force-logout and remove the tenant's session, wiping persisted
    /// credentials. Fails with [`Error::NotFound`] (and touches nothing)
    /// when no session exists.
    pub async fn deactivate(&self, tenant_id: &str) -> Result<()> {
        let session = {
            let Ok(mut sessions) = self.sessions.write() else {
                return Err(Error::not_found(tenant_id));
            };
            sessions
                .remove(tenant_id)
                .ok_or_else(|| Error::not_found(tenant_id))?
        };

        info!(tenant_id, "deactivating session");
        // Pending delayed replies and broadcast loops die with this token.
        session.cancel.cancel();

        if let Some(link) = &session.link
            && let Err(e) = link.handle.logout().await
        {
            warn!(tenant_id, error = %e, "transport logout failed");
        }
        if let Err(e) = self.credentials.delete_tenant(tenant_id).await {
            warn!(tenant_id, error = %e, "credential wipe failed");
        }
        self.pipeline.clear_webhook(tenant_id);
        self.pipeline.clear_history(tenant_id);
        self.emit_status(tenant_id, SessionState::Disconnected).await;
        Ok(())
    }

    /// Foreground text send over the tenant's live connection. The
    /// recipient may be a linked identity; it is resolved to its
    /// addressable form first. The outbound counter is not touched here:
    /// the transport echoes every send back as a self-sent event and
    /// ingestion counts that echo, same as the reply and broadcast paths.
    pub async fn send_text(&self, tenant_id: &str, to: &str, body: &str) -> Result<()> {
        let link = self
            .link(tenant_id)
            .ok_or_else(|| Error::not_found(tenant_id))?;
        let recipient = self.pipeline.identity().resolve_addressable(tenant_id, to);
        link.handle
            .send_text(&recipient, body)
            .await
            .map_err(Error::transport)?;
        Ok(())
    }

    /// Current state, `Disconnected` when no session exists.
    #[must_use]
    pub fn status_of(&self, tenant_id: &str) -> SessionState {
        self.sessions
            .read()
            .ok()
            .and_then(|s| s.get(tenant_id).map(|s| s.state))
            .unwrap_or(SessionState::Disconnected)
    }

    /// Pending pairing code, if the session is waiting for a scan.
    #[must_use]
    pub fn qr_code(&self, tenant_id: &str) -> Option<String> {
        self.sessions
            .read()
            .ok()
            .and_then(|s| s.get(tenant_id)?.pending_qr.clone())
    }

    /// The live link for a tenant, for foreground sends and broadcasts.
    #[must_use]
    pub fn link(&self, tenant_id: &str) -> Option<Arc<TenantLink>> {
        self.sessions
            .read()
            .ok()
            .and_then(|s| s.get(tenant_id)?.link.clone())
    }

    /// Re-activate every tenant with persisted credentials. Tenants are
    /// independent; one failing changes nothing for the others. Returns how
    /// many activations were started.
    pub async fn recover_all(&self) -> usize {
        let tenants = match self.credentials.tenants().await {
            Ok(tenants) => tenants,
            Err(e) => {
                warn!(error = %e, "credential scan failed, recovering nothing");
                return 0;
            },
        };
        let count = tenants.len();
        for tenant_id in tenants {
            info!(tenant_id, "recovering session from persisted credentials");
            self.activate(&tenant_id, None);
        }
        count
    }

    fn cancel_token(&self, tenant_id: &str) -> CancellationToken {
        self.sessions
            .read()
            .ok()
            .and_then(|s| s.get(tenant_id).map(|s| s.cancel.clone()))
            .unwrap_or_default()
    }

    fn set_state(&self, tenant_id: &str, state: SessionState) {
        if let Ok(mut sessions) = self.sessions.write()
            && let Some(session) = sessions.get_mut(tenant_id)
        {
            session.state = state;
        }
    }

    async fn emit_status(&self, tenant_id: &str, state: SessionState) {
        self.sink
            .emit(GatewayEvent::ConnectionStatus {
                tenant_id: tenant_id.to_string(),
                status: state.as_str().to_string(),
            })
            .await;
    }

    async fn transition(&self, tenant_id: &str, state: SessionState) {
        self.set_state(tenant_id, state);
        self.emit_status(tenant_id, state).await;
    }

    /// The per-tenant connection loop: connect, drain events, reconnect on
    /// recoverable closure, tear down on logout.
    async fn run_connection(self, tenant_id: String, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            self.transition(&tenant_id, SessionState::Connecting).await;

            let creds = match self.credentials.load(&tenant_id, PRIMARY_SLOT).await {
                Ok(creds) => creds,
                Err(e) => {
                    warn!(tenant_id, error = %e, "credential load failed, pairing fresh");
                    None
                },
            };

            let (handle, mut events) = match self.transport.connect(&tenant_id, creds).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(tenant_id, error = %e, "transport connect failed");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(reconnect_delay()) => continue,
                    }
                },
            };

            let link = Arc::new(TenantLink {
                tenant_id: tenant_id.clone(),
                handle,
                cancel: cancel.clone(),
            });
            if let Ok(mut sessions) = self.sessions.write()
                && let Some(session) = sessions.get_mut(&tenant_id)
            {
                session.link = Some(Arc::clone(&link));
            }

            let flow = loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    event = events.recv() => event,
                };
                // A closed channel without a Closed event is a transport
                // bug; treat it as a recoverable drop.
                let Some(event) = event else {
                    break Flow::Reconnect;
                };
                match self.handle_event(&tenant_id, &link, event).await {
                    Flow::Continue => {},
                    flow => break flow,
                }
            };

            match flow {
                Flow::LoggedOut => {
                    info!(tenant_id, "tenant logged out, removing session");
                    if let Ok(mut sessions) = self.sessions.write() {
                        sessions.remove(&tenant_id);
                    }
                    if let Err(e) = self.credentials.delete_tenant(&tenant_id).await {
                        warn!(tenant_id, error = %e, "credential wipe failed");
                    }
                    self.pipeline.clear_webhook(&tenant_id);
                    self.pipeline.clear_history(&tenant_id);
                    self.emit_status(&tenant_id, SessionState::Disconnected).await;
                    return;
                },
                Flow::Reconnect | Flow::Continue => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(reconnect_delay()) => {}
                    }
                },
            }
        }
    }

    async fn handle_event(
        &self,
        tenant_id: &str,
        link: &Arc<TenantLink>,
        event: TransportEvent,
    ) -> Flow {
        match event {
            TransportEvent::Qr { code } => {
                debug!(tenant_id, "pairing code received");
                if let Ok(mut sessions) = self.sessions.write()
                    && let Some(session) = sessions.get_mut(tenant_id)
                {
                    session.pending_qr = Some(code.clone());
                }
                self.sink
                    .emit(GatewayEvent::Qr {
                        tenant_id: tenant_id.to_string(),
                        code,
                    })
                    .await;
                self.transition(tenant_id, SessionState::AwaitingPairing).await;
                Flow::Continue
            },
            TransportEvent::Ready { phone_number } => {
                info!(tenant_id, ?phone_number, "session connected");
                if let Ok(mut sessions) = self.sessions.write()
                    && let Some(session) = sessions.get_mut(tenant_id)
                {
                    session.pending_qr = None;
                }
                self.transition(tenant_id, SessionState::Connected).await;
                Flow::Continue
            },
            TransportEvent::CredentialsUpdate { blob } => {
                if let Err(e) = self.credentials.save(tenant_id, PRIMARY_SLOT, &blob).await {
                    warn!(tenant_id, error = %e, "credential save failed");
                }
                Flow::Continue
            },
            TransportEvent::ContactsUpserted { contacts } => {
                self.pipeline.identity().record_contacts(tenant_id, &contacts);
                Flow::Continue
            },
            TransportEvent::Message(event) => {
                self.pipeline.ingest(link, *event);
                Flow::Continue
            },
            TransportEvent::GroupMetadata { chat_id, subject } => {
                self.pipeline
                    .update_group_subject(tenant_id, &chat_id, &subject)
                    .await;
                Flow::Continue
            },
            TransportEvent::Closed { reason } => {
                if reason.is_logged_out() {
                    Flow::LoggedOut
                } else {
                    warn!(tenant_id, ?reason, "connection closed, will reconnect");
                    Flow::Reconnect
                }
            },
        }
    }
}
