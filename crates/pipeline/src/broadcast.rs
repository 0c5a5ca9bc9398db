//! Throttled fan-out of one message to a computed recipient set.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    tracing::{info, warn},
};

use {
    pesan_common::RecipientCriterion,
    pesan_identity::IdentityResolver,
    pesan_stats::StatsAggregator,
    pesan_store::ConversationStore,
    pesan_transport::ident,
};

use crate::ingest::TenantLink;

/// Fixed pause between consecutive sends, to respect transport rate limits.
pub const BROADCAST_SEND_GAP: Duration = Duration::from_secs(3);

/// Resolves a recipient criterion and drives the background send loop.
/// Jobs are transient: an in-flight loop does not survive a restart.
pub struct BroadcastDispatcher {
    conversations: Arc<dyn ConversationStore>,
    identity: IdentityResolver,
    stats: StatsAggregator,
}

impl BroadcastDispatcher {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        identity: IdentityResolver,
        stats: StatsAggregator,
    ) -> Self {
        Self {
            conversations,
            identity,
            stats,
        }
    }

    /// Resolve recipients and return the accepted count immediately; the
    /// sends proceed sequentially in the background, best effort, no retry.
    pub async fn dispatch(
        &self,
        link: &Arc<TenantLink>,
        criterion: RecipientCriterion,
        body: String,
    ) -> Result<usize> {
        let recipients = self.resolve_recipients(&link.tenant_id, &criterion).await?;
        let accepted = recipients.len();
        info!(tenant_id = %link.tenant_id, accepted, "broadcast accepted");
        self.stats.record_broadcast(&link.tenant_id, accepted);

        let link = Arc::clone(link);
        tokio::spawn(async move {
            for (i, to) in recipients.iter().enumerate() {
                if i > 0 {
                    tokio::select! {
                        biased;
                        _ = link.cancel.cancelled() => break,
                        _ = tokio::time::sleep(BROADCAST_SEND_GAP) => {}
                    }
                }
                if link.cancel.is_cancelled() {
                    break;
                }
                // One failed recipient never aborts the rest of the queue.
                if let Err(e) = link.handle.send_text(to, &body).await {
                    warn!(tenant_id = %link.tenant_id, to, error = %e, "broadcast send failed");
                }
            }
        });

        Ok(accepted)
    }

    async fn resolve_recipients(
        &self,
        tenant_id: &str,
        criterion: &RecipientCriterion,
    ) -> Result<Vec<String>> {
        let recipients = match criterion {
            // A manual list always overrides label selection.
            RecipientCriterion::Manual { list } => list
                .split(['\n', ','])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|id| self.identity.resolve_addressable(tenant_id, id))
                .collect(),
            RecipientCriterion::All => self.conversation_recipients(tenant_id, None).await?,
            RecipientCriterion::Label { label } => {
                self.conversation_recipients(tenant_id, Some(label)).await?
            },
        };

        // Dedup while keeping order, so a contact stored under both a
        // linked and an addressable identity gets one send.
        let mut seen = std::collections::HashSet::new();
        Ok(recipients
            .into_iter()
            .filter(|r: &String| seen.insert(r.clone()))
            .collect())
    }

    async fn conversation_recipients(
        &self,
        tenant_id: &str,
        label: Option<&str>,
    ) -> Result<Vec<String>> {
        let conversations = self.conversations.list(tenant_id, label).await?;
        Ok(conversations
            .into_iter()
            .map(|c| c.chat_id)
            .filter(|id| ident::is_addressable(id))
            .collect())
    }
}
