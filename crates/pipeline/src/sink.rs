//! Publish seam toward the presentation layer.

use {
    async_trait::async_trait,
    serde::Serialize,
};

use {pesan_common::NormalizedMessage, pesan_stats::TenantStats};

/// Events pushed to subscribers (the excluded HTTP/front-end layer).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    Message {
        payload: NormalizedMessage,
    },
    StatsUpdate {
        tenant_id: String,
        stats: TenantStats,
    },
    ConnectionStatus {
        tenant_id: String,
        status: String,
    },
    Qr {
        tenant_id: String,
        code: String,
    },
}

/// Sink for gateway events; the composition root provides the concrete
/// implementation (WebSocket fan-out, test collector, ...).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: GatewayEvent);
}

/// Sink that drops everything; for installs with no subscribers.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: GatewayEvent) {}
}
