//! The per-event ingestion pipeline.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use {
    anyhow::Result,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use {
    pesan_common::{ChatKind, ContentKind, Direction, MessageEvent, NormalizedMessage},
    pesan_identity::IdentityResolver,
    pesan_reply::{ReplyAction, ReplyArbitrator, ReplyDecision, ReplySource},
    pesan_stats::StatsAggregator,
    pesan_store::{ConversationStore, ConversationUpsert, MessageStore, NewMessage, NewSale, SaleStore},
    pesan_transport::{PresenceState, TransportHandle},
};

use crate::{
    dedup::DedupGuard,
    keyed_lock::KeyedLocks,
    sink::{EventSink, GatewayEvent},
    webhook::{HttpWebhookSender, WebhookSender},
};

/// Typing-simulation delay before a rule-based auto-reply.
pub const AUTO_REPLY_DELAY: Duration = Duration::from_secs(1);
/// Typing-simulation delay before an AI reply.
pub const AI_REPLY_DELAY: Duration = Duration::from_secs(2);

/// One tenant's live connection as the pipeline sees it: the send handle
/// plus the session's cancellation token, so delayed replies die with the
/// session instead of firing on a closed connection.
pub struct TenantLink {
    pub tenant_id: String,
    pub handle: Arc<dyn TransportHandle>,
    pub cancel: CancellationToken,
}

/// Orchestrates dedup, classification, stats, persistence, arbitration and
/// publication for every inbound or self-sent event. Cheap to clone; every
/// field is shared state.
#[derive(Clone)]
pub struct MessageIngestionPipeline {
    dedup: DedupGuard,
    chat_locks: KeyedLocks,
    identity: IdentityResolver,
    stats: StatsAggregator,
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    sales: Arc<dyn SaleStore>,
    arbitrator: Arc<ReplyArbitrator>,
    sink: Arc<dyn EventSink>,
    webhook_sender: Arc<dyn WebhookSender>,
    webhooks: Arc<RwLock<HashMap<String, String>>>,
}

impl MessageIngestionPipeline {
    /// Fails only when the webhook HTTP client cannot be built; the caller
    /// is the composition root, which should bail on that.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: IdentityResolver,
        stats: StatsAggregator,
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        sales: Arc<dyn SaleStore>,
        arbitrator: Arc<ReplyArbitrator>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        Ok(Self {
            dedup: DedupGuard::default(),
            chat_locks: KeyedLocks::new(),
            identity,
            stats,
            conversations,
            messages,
            sales,
            arbitrator,
            sink,
            webhook_sender: Arc::new(HttpWebhookSender::new()?),
            webhooks: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Swap the webhook delivery implementation (tests).
    pub fn with_webhook_sender(mut self, sender: Arc<dyn WebhookSender>) -> Self {
        self.webhook_sender = sender;
        self
    }

    pub fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn dedup(&self) -> &DedupGuard {
        &self.dedup
    }

    /// Register the tenant's outbound webhook; received events get forwarded
    /// there until cleared.
    pub fn set_webhook(&self, tenant_id: &str, url: &str) {
        if let Ok(mut hooks) = self.webhooks.write() {
            hooks.insert(tenant_id.to_string(), url.to_string());
        }
    }

    pub fn clear_webhook(&self, tenant_id: &str) {
        if let Ok(mut hooks) = self.webhooks.write() {
            hooks.remove(tenant_id);
        }
    }

    /// Drop the tenant's in-memory AI conversation history. Called on
    /// session teardown so a departed tenant leaves nothing cached.
    pub fn clear_history(&self, tenant_id: &str) {
        self.arbitrator.history().clear_tenant(tenant_id);
    }

    /// Process one transport message event. Dedup and the stats counters
    /// settle before this returns; persistence, arbitration and publication
    /// continue on a spawned task, so a slow step for one chat (an AI
    /// generation, a stalled store) never holds up the tenant's event loop
    /// or the other chats behind it.
    pub fn ingest(&self, link: &Arc<TenantLink>, event: MessageEvent) {
        if !self.dedup.should_process(&event.event_id) {
            // Re-delivery is expected under at-least-once; not an error.
            debug!(tenant_id = %link.tenant_id, event_id = %event.event_id, "duplicate event dropped");
            return;
        }
        let tenant_id = link.tenant_id.as_str();

        // Stats move first: the event was observed, whatever happens to the
        // persistence attempts below.
        match event.direction {
            Direction::Received => self.stats.record_inbound(tenant_id),
            Direction::SelfSent => self.stats.record_outbound(tenant_id),
        }
        if event.content_kind.is_media() {
            self.stats.record_media(tenant_id);
        }

        let pipeline = self.clone();
        let link = Arc::clone(link);
        tokio::spawn(async move {
            pipeline.process(&link, event).await;
        });
    }

    async fn process(&self, link: &Arc<TenantLink>, event: MessageEvent) {
        let tenant_id = link.tenant_id.as_str();
        let chat_id = self.identity.resolve_addressable(tenant_id, &event.chat_id);
        let sender_id = self.identity.resolve_addressable(tenant_id, &event.sender_id);
        let display_name =
            self.identity
                .resolve_display(tenant_id, &event.sender_id, event.push_name.as_deref());

        // Steps that suspend on I/O run under the chat's ordering lock so a
        // burst for one chat cannot corrupt the create-vs-update decision.
        {
            let _guard = self.chat_locks.acquire(&format!("{tenant_id}/{chat_id}")).await;

            let chat_display = match event.chat_kind {
                ChatKind::Direct => display_name.clone(),
                // Group subjects arrive separately via group metadata.
                ChatKind::Group => String::new(),
            };
            if let Err(e) = self
                .conversations
                .upsert(ConversationUpsert {
                    tenant_id: tenant_id.to_string(),
                    chat_id: chat_id.clone(),
                    display_name: chat_display,
                    avatar_url: String::new(),
                })
                .await
            {
                warn!(tenant_id, chat_id, error = %e, "conversation upsert failed");
            }

            if let Err(e) = self
                .messages
                .insert(NewMessage {
                    tenant_id: tenant_id.to_string(),
                    event_id: event.event_id.clone(),
                    chat_id: chat_id.clone(),
                    sender_id: sender_id.clone(),
                    body: event.body.clone(),
                    content_kind: content_kind_tag(event.content_kind).to_string(),
                    media_url: event.media_url.clone(),
                    self_sent: event.direction.is_self_sent(),
                    created_at: event.timestamp,
                })
                .await
            {
                warn!(tenant_id, chat_id, error = %e, "message persist failed");
            }

            if reply_eligible(&event) {
                let decision = self
                    .arbitrator
                    .arbitrate(tenant_id, &chat_id, &sender_id, &event.body, &display_name)
                    .await;
                if let Some(decision) = decision {
                    spawn_reply(link, chat_id.clone(), decision);
                }
            }
        }

        let payload = NormalizedMessage {
            tenant_id: tenant_id.to_string(),
            event_id: event.event_id,
            chat_id,
            sender_id,
            display_name,
            body: event.body,
            content_kind: event.content_kind,
            chat_kind: event.chat_kind,
            direction: event.direction,
            media_url: event.media_url,
            timestamp: event.timestamp,
        };

        self.sink
            .emit(GatewayEvent::Message {
                payload: payload.clone(),
            })
            .await;
        self.sink
            .emit(GatewayEvent::StatsUpdate {
                tenant_id: tenant_id.to_string(),
                stats: self.stats.snapshot(tenant_id),
            })
            .await;

        // Self-sent events never leave through webhooks.
        if payload.direction == Direction::Received
            && let Some(url) = self.webhook_url(tenant_id)
        {
            let sender = Arc::clone(&self.webhook_sender);
            tokio::spawn(async move {
                if let Err(e) = sender.deliver(&url, &payload).await {
                    warn!(url, error = %e, "webhook delivery failed");
                }
            });
        }
    }

    /// Update a group chat's subject as its conversation display name.
    pub async fn update_group_subject(&self, tenant_id: &str, chat_id: &str, subject: &str) {
        let _guard = self.chat_locks.acquire(&format!("{tenant_id}/{chat_id}")).await;
        if let Err(e) = self
            .conversations
            .upsert(ConversationUpsert {
                tenant_id: tenant_id.to_string(),
                chat_id: chat_id.to_string(),
                display_name: subject.to_string(),
                avatar_url: String::new(),
            })
            .await
        {
            warn!(tenant_id, chat_id, error = %e, "group subject upsert failed");
        }
    }

    /// Record a sale against a contact. Foreground operation: failures
    /// surface to the caller. The identity is resolved to its addressable
    /// form before anything hits the ledger.
    pub async fn record_sale(
        &self,
        tenant_id: &str,
        contact_identity: &str,
        item: &str,
        amount: i64,
        paid: bool,
    ) -> Result<()> {
        let contact_id = self.identity.resolve_addressable(tenant_id, contact_identity);
        self.sales
            .create(NewSale {
                tenant_id: tenant_id.to_string(),
                contact_id,
                item: item.to_string(),
                amount,
                paid,
            })
            .await?;
        self.stats.record_invoice_issued(tenant_id);
        if paid {
            self.stats.record_invoice_paid(tenant_id);
        }
        Ok(())
    }

    fn webhook_url(&self, tenant_id: &str) -> Option<String> {
        self.webhooks.read().ok()?.get(tenant_id).cloned()
    }
}

/// Only inbound, direct, non-media, non-system text is eligible for an
/// automated response.
fn reply_eligible(event: &MessageEvent) -> bool {
    event.direction == Direction::Received
        && event.chat_kind == ChatKind::Direct
        && event.content_kind == ContentKind::Text
        && !event.system
}

fn content_kind_tag(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Text => "text",
        ContentKind::Image => "image",
        ContentKind::Video => "video",
        ContentKind::Document => "document",
    }
}

/// Fire-and-forget delayed reply. Ingestion never blocks on the send; the
/// session's cancellation token aborts a pending reply instead of letting
/// it hit a closed connection.
fn spawn_reply(link: &Arc<TenantLink>, chat_id: String, decision: ReplyDecision) {
    let link = Arc::clone(link);
    tokio::spawn(async move {
        let delay = match decision.source {
            ReplySource::Rule => AUTO_REPLY_DELAY,
            ReplySource::Ai => AI_REPLY_DELAY,
        };
        if decision.source == ReplySource::Rule
            && let Err(e) = link.handle.send_presence(&chat_id, PresenceState::Composing).await
        {
            debug!(chat_id, error = %e, "presence signal failed");
        }

        tokio::select! {
            biased;
            _ = link.cancel.cancelled() => {
                debug!(tenant_id = %link.tenant_id, chat_id, "session closed, pending reply dropped");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let result = match decision.action {
            ReplyAction::SendText { body } => link.handle.send_text(&chat_id, &body).await,
            ReplyAction::SendImage { url, caption } => {
                match link.handle.send_image(&chat_id, &url, &caption).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        warn!(chat_id, error = %e, "image send failed, falling back to text");
                        let note = format!("{caption}\n\n(gambar gagal dikirim: {url})");
                        link.handle.send_text(&chat_id, note.trim()).await
                    },
                }
            },
        };
        if let Err(e) = result {
            // Background path: degrade silently, the session stays up.
            warn!(tenant_id = %link.tenant_id, chat_id, error = %e, "reply send failed");
        }
    });
}

#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        async_trait::async_trait,
        pesan_reply::TenantReplyConfig,
        pesan_store::MemoryStore,
        std::sync::Mutex,
    };

    #[derive(Default)]
    pub(crate) struct FakeHandle {
        pub sent: Mutex<Vec<(String, String)>>,
        pub attempted: Mutex<Vec<String>>,
        pub presences: Mutex<Vec<String>>,
        pub fail_images: bool,
        pub fail_sends_to: Option<String>,
    }

    #[async_trait]
    impl TransportHandle for FakeHandle {
        async fn send_text(&self, to: &str, body: &str) -> Result<()> {
            self.attempted.lock().unwrap().push(to.to_string());
            if self.fail_sends_to.as_deref() == Some(to) {
                anyhow::bail!("send rejected for {to}");
            }
            self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
            Ok(())
        }

        async fn send_image(&self, to: &str, url: &str, caption: &str) -> Result<()> {
            if self.fail_images {
                anyhow::bail!("image upload refused");
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), format!("[img {url}] {caption}")));
            Ok(())
        }

        async fn send_presence(&self, to: &str, _state: PresenceState) -> Result<()> {
            self.presences.lock().unwrap().push(to.to_string());
            Ok(())
        }

        async fn logout(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<GatewayEvent>>,
    }

    #[async_trait]
    impl EventSink for CollectingSink {
        async fn emit(&self, event: GatewayEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[derive(Default)]
    struct CapturingWebhook {
        posts: Mutex<Vec<(String, NormalizedMessage)>>,
    }

    #[async_trait]
    impl WebhookSender for CapturingWebhook {
        async fn deliver(&self, url: &str, payload: &NormalizedMessage) -> Result<()> {
            self.posts.lock().unwrap().push((url.to_string(), payload.clone()));
            Ok(())
        }
    }

    /// Store whose writes always fail, for the degrade-gracefully paths.
    struct BrokenStore;

    #[async_trait]
    impl ConversationStore for BrokenStore {
        async fn upsert(&self, _conv: ConversationUpsert) -> Result<()> {
            anyhow::bail!("disk full")
        }
        async fn list(
            &self,
            _tenant_id: &str,
            _label: Option<&str>,
        ) -> Result<Vec<pesan_store::Conversation>> {
            anyhow::bail!("disk full")
        }
    }

    #[async_trait]
    impl MessageStore for BrokenStore {
        async fn insert(&self, _msg: NewMessage) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    struct Fixture {
        pipeline: Arc<MessageIngestionPipeline>,
        link: Arc<TenantLink>,
        handle: Arc<FakeHandle>,
        sink: Arc<CollectingSink>,
        webhook: Arc<CapturingWebhook>,
        store: MemoryStore,
    }

    fn fixture_with(store: MemoryStore, handle: FakeHandle) -> Fixture {
        let identity = IdentityResolver::new();
        let stats = StatsAggregator::new();
        let arbitrator = Arc::new(ReplyArbitrator::new(
            Arc::new(store.clone()),
            None,
            stats.clone(),
        ));
        let sink = Arc::new(CollectingSink::default());
        let webhook = Arc::new(CapturingWebhook::default());
        let pipeline = Arc::new(
            MessageIngestionPipeline::new(
                identity,
                stats,
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                arbitrator,
                sink.clone(),
            )
            .unwrap()
            .with_webhook_sender(webhook.clone()),
        );
        let handle = Arc::new(handle);
        let link = Arc::new(TenantLink {
            tenant_id: "shop-1".into(),
            handle: handle.clone(),
            cancel: CancellationToken::new(),
        });
        Fixture {
            pipeline,
            link,
            handle,
            sink,
            webhook,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryStore::new(), FakeHandle::default())
    }

    fn text_event(event_id: &str, body: &str) -> MessageEvent {
        MessageEvent {
            event_id: event_id.into(),
            chat_id: "628111@c.us".into(),
            sender_id: "628111@c.us".into(),
            push_name: Some("Budi".into()),
            body: body.into(),
            content_kind: ContentKind::Text,
            chat_kind: ChatKind::Direct,
            direction: Direction::Received,
            media_url: None,
            system: false,
            timestamp: 1_700_000_000_000,
        }
    }

    /// Let spawned reply tasks get past their typing delay. Call only from
    /// `start_paused` tests so the sleep advances the clock instead of
    /// waiting it out.
    pub(crate) async fn drain_timers() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_event_processed_once() {
        let f = fixture();
        f.pipeline.ingest(&f.link, text_event("ABC123", "halo"));
        f.pipeline.ingest(&f.link, text_event("ABC123", "halo"));
        drain_timers().await;

        assert_eq!(f.pipeline.stats().snapshot("shop-1").inbound, 1);
        assert_eq!(f.store.message_count(), 1);
        // Only one message event was published.
        let events = f.sink.events.lock().unwrap();
        let published = events
            .iter()
            .filter(|e| matches!(e, GatewayEvent::Message { .. }))
            .count();
        assert_eq!(published, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn self_sent_counts_outbound_and_skips_webhook() {
        let f = fixture();
        f.pipeline.set_webhook("shop-1", "https://hook.example/in");

        let mut event = text_event("E1", "pesanan dikirim");
        event.direction = Direction::SelfSent;
        f.pipeline.ingest(&f.link, event);
        f.pipeline.ingest(&f.link, text_event("E2", "terima kasih"));
        drain_timers().await;

        let snap = f.pipeline.stats().snapshot("shop-1");
        assert_eq!(snap.outbound, 1);
        assert_eq!(snap.inbound, 1);

        let posts = f.webhook.posts.lock().unwrap();
        assert_eq!(posts.len(), 1, "only the received event is forwarded");
        assert_eq!(posts[0].1.event_id, "E2");
    }

    #[tokio::test(start_paused = true)]
    async fn media_event_bumps_media_counter_and_never_replies() {
        let store = MemoryStore::new();
        store.add_rule("shop-1", "foto", "ini fotonya");
        let f = fixture_with(store, FakeHandle::default());

        let mut event = text_event("M1", "foto produk");
        event.content_kind = ContentKind::Image;
        event.media_url = Some("https://cdn/x.jpg".into());
        f.pipeline.ingest(&f.link, event);
        drain_timers().await;

        assert_eq!(f.pipeline.stats().snapshot("shop-1").media, 1);
        assert!(f.handle.sent.lock().unwrap().is_empty(), "media is not reply-eligible");
    }

    #[tokio::test(start_paused = true)]
    async fn group_and_system_messages_are_not_reply_eligible() {
        let store = MemoryStore::new();
        store.add_rule("shop-1", "harga", "Cek web ya");
        let f = fixture_with(store, FakeHandle::default());

        let mut group = text_event("G1", "harga?");
        group.chat_kind = ChatKind::Group;
        group.chat_id = "12345@g.us".into();
        f.pipeline.ingest(&f.link, group);

        let mut system = text_event("S1", "harga?");
        system.system = true;
        f.pipeline.ingest(&f.link, system);
        drain_timers().await;

        assert!(f.handle.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_reply_sends_after_composing_and_delay() {
        let store = MemoryStore::new();
        store.add_rule("shop-1", "harga", "Cek web ya");
        let f = fixture_with(store, FakeHandle::default());

        f.pipeline.ingest(&f.link, text_event("R1", "berapa harga baju ini"));
        drain_timers().await;

        let sent = f.handle.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &[("628111@c.us".to_string(), "Cek web ya".to_string())]);
        assert_eq!(f.handle.presences.lock().unwrap().as_slice(), &["628111@c.us".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_session_drops_pending_reply() {
        let store = MemoryStore::new();
        store.add_rule("shop-1", "harga", "Cek web ya");
        let f = fixture_with(store, FakeHandle::default());

        f.pipeline.ingest(&f.link, text_event("C1", "harga?"));
        // Deactivation happens before the typing delay elapses.
        f.link.cancel.cancel();
        drain_timers().await;

        assert!(f.handle.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn linked_chat_identity_is_stored_addressable() {
        let f = fixture();
        f.pipeline
            .identity()
            .record_contact("shop-1", "6281234@c.us", Some("Budi"), Some("999@lid"));

        let mut event = text_event("L1", "halo");
        event.chat_id = "999@lid".into();
        event.sender_id = "999@lid".into();
        f.pipeline.ingest(&f.link, event);
        drain_timers().await;

        assert!(f.store.conversation("shop-1", "6281234@c.us").is_some());
        assert!(f.store.conversation("shop-1", "999@lid").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_failure_still_counts_and_publishes() {
        let identity = IdentityResolver::new();
        let stats = StatsAggregator::new();
        let arbitrator = Arc::new(ReplyArbitrator::new(
            Arc::new(MemoryStore::new()),
            None,
            stats.clone(),
        ));
        let sink = Arc::new(CollectingSink::default());
        let pipeline = MessageIngestionPipeline::new(
            identity,
            stats,
            Arc::new(BrokenStore),
            Arc::new(BrokenStore),
            Arc::new(MemoryStore::new()),
            arbitrator,
            sink.clone(),
        ).unwrap();
        let link = Arc::new(TenantLink {
            tenant_id: "shop-1".into(),
            handle: Arc::new(FakeHandle::default()),
            cancel: CancellationToken::new(),
        });

        pipeline.ingest(&link, text_event("P1", "halo"));
        drain_timers().await;

        assert_eq!(pipeline.stats().snapshot("shop-1").inbound, 1);
        let events = sink.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, GatewayEvent::Message { .. })));
    }

    #[tokio::test]
    async fn sale_against_linked_identity_lands_on_stable() {
        let f = fixture();
        f.pipeline
            .identity()
            .record_contact("shop-1", "6281234@c.us", None, Some("999@lid"));

        f.pipeline
            .record_sale("shop-1", "999@lid", "baju", 150_000, true)
            .await
            .unwrap();

        let sales = f.store.sales();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].contact_id, "6281234@c.us");

        let snap = f.pipeline.stats().snapshot("shop-1");
        assert_eq!(snap.invoices_issued, 1);
        assert_eq!(snap.invoices_paid, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn image_send_failure_falls_back_to_text() {
        use pesan_reply::{GenerationRequest, ReplyGenerator};

        struct ImageGen;

        #[async_trait]
        impl ReplyGenerator for ImageGen {
            async fn generate(&self, _req: GenerationRequest) -> Result<String> {
                Ok("Ini ya [IMAGE: https://cdn/x.jpg]".into())
            }
        }

        let store = MemoryStore::new();
        let identity = IdentityResolver::new();
        let stats = StatsAggregator::new();
        let arbitrator = Arc::new(ReplyArbitrator::new(
            Arc::new(store.clone()),
            Some(Arc::new(ImageGen)),
            stats.clone(),
        ));
        arbitrator.set_tenant_config("shop-1", TenantReplyConfig {
            ai_enabled: true,
            ..Default::default()
        });
        let pipeline = Arc::new(MessageIngestionPipeline::new(
            identity,
            stats,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store),
            arbitrator,
            Arc::new(crate::sink::NullSink),
        ).unwrap());
        let handle = Arc::new(FakeHandle {
            fail_images: true,
            ..Default::default()
        });
        let link = Arc::new(TenantLink {
            tenant_id: "shop-1".into(),
            handle: handle.clone(),
            cancel: CancellationToken::new(),
        });

        pipeline.ingest(&link, text_event("I1", "ada fotonya?"));
        drain_timers().await;

        let sent = handle.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("gambar gagal dikirim"));
        assert!(sent[0].1.contains("https://cdn/x.jpg"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generation_for_one_chat_does_not_stall_other_chats() {
        use {
            pesan_reply::{GenerationRequest, ReplyGenerator},
            tokio::sync::Notify,
        };

        /// Generator that parks until released, standing in for a slow
        /// upstream completion call.
        struct GatedGen {
            release: Arc<Notify>,
        }

        #[async_trait]
        impl ReplyGenerator for GatedGen {
            async fn generate(&self, _req: GenerationRequest) -> Result<String> {
                self.release.notified().await;
                Ok("Sudah saya cek ya".into())
            }
        }

        let release = Arc::new(Notify::new());
        let store = MemoryStore::new();
        store.add_rule("shop-1", "harga", "Cek web ya");
        let identity = IdentityResolver::new();
        let stats = StatsAggregator::new();
        let arbitrator = Arc::new(ReplyArbitrator::new(
            Arc::new(store.clone()),
            Some(Arc::new(GatedGen {
                release: Arc::clone(&release),
            })),
            stats.clone(),
        ));
        arbitrator.set_tenant_config("shop-1", TenantReplyConfig {
            ai_enabled: true,
            ..Default::default()
        });
        let pipeline = Arc::new(MessageIngestionPipeline::new(
            identity,
            stats,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            arbitrator,
            Arc::new(crate::sink::NullSink),
        ).unwrap());
        let handle = Arc::new(FakeHandle::default());
        let link = Arc::new(TenantLink {
            tenant_id: "shop-1".into(),
            handle: handle.clone(),
            cancel: CancellationToken::new(),
        });

        // Chat A misses every rule and parks inside the generator.
        let mut slow = text_event("SLOW1", "ada yang bisa bantu?");
        slow.chat_id = "628111@c.us".into();
        slow.sender_id = "628111@c.us".into();
        pipeline.ingest(&link, slow);

        // Chat B arrives while A's generation is still in flight.
        let mut quick = text_event("QUICK1", "berapa harga baju ini");
        quick.chat_id = "628222@c.us".into();
        quick.sender_id = "628222@c.us".into();
        pipeline.ingest(&link, quick);
        drain_timers().await;

        {
            let sent = handle.sent.lock().unwrap();
            assert_eq!(
                sent.as_slice(),
                &[("628222@c.us".to_string(), "Cek web ya".to_string())],
                "chat B must be answered while chat A's generation is in flight"
            );
        }
        assert_eq!(store.message_count(), 2, "both events persisted");

        release.notify_one();
        drain_timers().await;

        let sent = handle.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], ("628111@c.us".to_string(), "Sudah saya cek ya".to_string()));
    }
}
