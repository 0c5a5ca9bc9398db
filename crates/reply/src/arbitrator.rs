//! The arbitration decision: rule reply, AI reply, or nothing.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tracing::{debug, warn};

use {pesan_stats::StatsAggregator, pesan_store::RuleStore};

use crate::{
    directive::{self, GeneratedReply},
    generator::{GenerationRequest, ReplyGenerator},
    history::HistoryStore,
    rules,
};

/// Cap on the product/knowledge context passed to the generator.
pub const MAX_CONTEXT_CHARS: usize = 5000;

/// Complaint keywords used when a tenant has not configured its own list.
const DEFAULT_COMPLAINT_KEYWORDS: &[&str] = &["komplain", "rusak", "kecewa", "refund", "lama"];

/// What to send, if anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyAction {
    SendText { body: String },
    SendImage { url: String, caption: String },
}

/// Which path produced the action; callers pick the typing delay from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Rule,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyDecision {
    pub action: ReplyAction,
    pub source: ReplySource,
}

/// Per-tenant arbitration settings, managed by the API layer.
#[derive(Debug, Clone)]
pub struct TenantReplyConfig {
    pub ai_enabled: bool,
    pub system_prompt: String,
    pub product_context: String,
    pub complaint_keywords: Vec<String>,
}

impl Default for TenantReplyConfig {
    fn default() -> Self {
        Self {
            ai_enabled: false,
            system_prompt: "You are a helpful shop assistant. Answer briefly.".into(),
            product_context: String::new(),
            complaint_keywords: DEFAULT_COMPLAINT_KEYWORDS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Decides, per inbound direct text message, which automated response to
/// send. Rule matches always beat the AI path; complaint scanning is
/// analytics only and never blocks either.
pub struct ReplyArbitrator {
    rules: Arc<dyn RuleStore>,
    generator: Option<Arc<dyn ReplyGenerator>>,
    stats: StatsAggregator,
    history: HistoryStore,
    configs: RwLock<HashMap<String, TenantReplyConfig>>,
}

impl ReplyArbitrator {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        generator: Option<Arc<dyn ReplyGenerator>>,
        stats: StatsAggregator,
    ) -> Self {
        Self {
            rules,
            generator,
            stats,
            history: HistoryStore::new(),
            configs: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_tenant_config(&self, tenant_id: &str, config: TenantReplyConfig) {
        if let Ok(mut configs) = self.configs.write() {
            configs.insert(tenant_id.to_string(), config);
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    fn tenant_config(&self, tenant_id: &str) -> TenantReplyConfig {
        self.configs
            .read()
            .ok()
            .and_then(|c| c.get(tenant_id).cloned())
            .unwrap_or_default()
    }

    pub async fn arbitrate(
        &self,
        tenant_id: &str,
        chat_id: &str,
        sender_id: &str,
        text: &str,
        sender_name: &str,
    ) -> Option<ReplyDecision> {
        let config = self.tenant_config(tenant_id);

        for keyword in rules::scan_complaints(&config.complaint_keywords, text) {
            self.stats.record_complaint(tenant_id, keyword);
        }

        // Rule replies beat the AI path.
        let tenant_rules = match self.rules.list(tenant_id).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(tenant_id, error = %e, "failed to load auto-reply rules");
                Vec::new()
            },
        };
        if let Some(rule) = rules::match_rule(&tenant_rules, text) {
            debug!(tenant_id, chat_id, keyword = %rule.keyword, "auto-reply rule matched");
            self.stats.record_auto_reply(tenant_id, chat_id, &rule.keyword);
            return Some(ReplyDecision {
                action: ReplyAction::SendText {
                    body: rule.response.clone(),
                },
                source: ReplySource::Rule,
            });
        }

        if !config.ai_enabled {
            return None;
        }
        let generator = self.generator.as_ref()?;

        let request = GenerationRequest {
            system_prompt: config.system_prompt,
            product_context: truncate_chars(&config.product_context, MAX_CONTEXT_CHARS),
            history: self.history.turns(tenant_id, sender_id),
            sender_name: sender_name.to_string(),
            text: text.to_string(),
        };
        let generated = match generator.generate(request).await {
            Ok(text) => text,
            Err(e) => {
                // Generation failure means "no reply produced", nothing
                // user-visible.
                warn!(tenant_id, chat_id, error = %e, "reply generation failed");
                return None;
            },
        };

        self.history.push_user(tenant_id, sender_id, text);
        self.history.push_assistant(tenant_id, sender_id, &generated);
        self.stats.record_ai_reply(tenant_id, chat_id);

        let action = match directive::parse_generated(&generated) {
            GeneratedReply::Text(body) => ReplyAction::SendText { body },
            GeneratedReply::Image { url, caption } => ReplyAction::SendImage { url, caption },
        };
        Some(ReplyDecision {
            action,
            source: ReplySource::Ai,
        })
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        anyhow::Result,
        async_trait::async_trait,
        pesan_stats::ActivityKind,
        pesan_store::MemoryStore,
        std::sync::Mutex,
    };

    struct FixedGenerator {
        output: Result<&'static str, &'static str>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    #[async_trait]
    impl ReplyGenerator for FixedGenerator {
        async fn generate(&self, req: GenerationRequest) -> Result<String> {
            self.seen.lock().unwrap().push(req);
            match self.output {
                Ok(s) => Ok(s.to_string()),
                Err(e) => Err(anyhow::anyhow!(e)),
            }
        }
    }

    fn arbitrator_with(
        store: MemoryStore,
        generator: Option<Arc<dyn ReplyGenerator>>,
    ) -> (ReplyArbitrator, StatsAggregator) {
        let stats = StatsAggregator::new();
        let arb = ReplyArbitrator::new(Arc::new(store), generator, stats.clone());
        (arb, stats)
    }

    #[tokio::test]
    async fn harga_rule_yields_text_and_auto_log_entry() {
        let store = MemoryStore::new();
        store.add_rule("shop-1", "harga", "Cek web ya");
        let (arb, stats) = arbitrator_with(store, None);

        let decision = arb
            .arbitrate("shop-1", "628@stable", "628@stable", "berapa harga baju ini", "Budi")
            .await
            .unwrap();

        assert_eq!(decision.action, ReplyAction::SendText {
            body: "Cek web ya".into()
        });
        assert_eq!(decision.source, ReplySource::Rule);

        let snap = stats.snapshot("shop-1");
        assert_eq!(snap.ai_replies, 0, "AI counter must not move on the rule path");
        assert_eq!(snap.activity.len(), 1);
        assert_eq!(snap.activity[0].kind, ActivityKind::Auto);
    }

    #[tokio::test]
    async fn no_rule_no_ai_means_silence() {
        let (arb, _) = arbitrator_with(MemoryStore::new(), None);
        assert!(arb.arbitrate("t", "c", "c", "halo", "X").await.is_none());
    }

    #[tokio::test]
    async fn ai_disabled_skips_generator() {
        let generator = Arc::new(FixedGenerator {
            output: Ok("should not run"),
            seen: Mutex::new(Vec::new()),
        });
        let (arb, _) = arbitrator_with(MemoryStore::new(), Some(generator.clone()));
        // ai_enabled defaults to false.
        assert!(arb.arbitrate("t", "c", "c", "halo", "X").await.is_none());
        assert!(generator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ai_reply_parses_image_directive_and_counts() {
        let generator = Arc::new(FixedGenerator {
            output: Ok("Ini ya [IMAGE: https://drive.google.com/file/d/xy/view]"),
            seen: Mutex::new(Vec::new()),
        });
        let (arb, stats) = arbitrator_with(MemoryStore::new(), Some(generator));
        arb.set_tenant_config("t", TenantReplyConfig {
            ai_enabled: true,
            ..Default::default()
        });

        let decision = arb.arbitrate("t", "chat", "sender", "ada foto?", "Ani").await.unwrap();
        assert_eq!(decision.source, ReplySource::Ai);
        assert_eq!(decision.action, ReplyAction::SendImage {
            url: "https://drive.google.com/uc?export=download&id=xy".into(),
            caption: "Ini ya".into(),
        });
        assert_eq!(stats.snapshot("t").ai_replies, 1);
        // History recorded both halves of the exchange.
        assert_eq!(arb.history().turns("t", "sender").len(), 2);
    }

    #[tokio::test]
    async fn generation_failure_degrades_to_silence() {
        let generator = Arc::new(FixedGenerator {
            output: Err("model down"),
            seen: Mutex::new(Vec::new()),
        });
        let (arb, stats) = arbitrator_with(MemoryStore::new(), Some(generator));
        arb.set_tenant_config("t", TenantReplyConfig {
            ai_enabled: true,
            ..Default::default()
        });

        assert!(arb.arbitrate("t", "c", "s", "halo", "X").await.is_none());
        assert_eq!(stats.snapshot("t").ai_replies, 0);
        assert!(arb.history().turns("t", "s").is_empty());
    }

    #[tokio::test]
    async fn complaint_scan_never_blocks_reply() {
        let store = MemoryStore::new();
        store.add_rule("t", "rusak", "Maaf kak, kami proses ya");
        let (arb, stats) = arbitrator_with(store, None);

        let decision = arb.arbitrate("t", "c", "s", "barang rusak nih", "X").await.unwrap();
        assert!(matches!(decision.action, ReplyAction::SendText { .. }));

        let snap = stats.snapshot("t");
        assert_eq!(snap.complaints, 1);
        assert_eq!(snap.top_complaints()[0].0, "rusak");
    }

    #[tokio::test]
    async fn product_context_is_truncated() {
        let generator = Arc::new(FixedGenerator {
            output: Ok("ok"),
            seen: Mutex::new(Vec::new()),
        });
        let (arb, _) = arbitrator_with(MemoryStore::new(), Some(generator.clone()));
        arb.set_tenant_config("t", TenantReplyConfig {
            ai_enabled: true,
            product_context: "x".repeat(MAX_CONTEXT_CHARS + 100),
            ..Default::default()
        });

        arb.arbitrate("t", "c", "s", "halo", "X").await.unwrap();
        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen[0].product_context.chars().count(), MAX_CONTEXT_CHARS);
    }
}
