//! Message ingestion pipeline: the glue between a live transport
//! connection and everything downstream.
//!
//! Flow per event: dedup → classify → stats → identity resolution →
//! conversation/message persistence → reply arbitration → publish. Stats
//! update before the persistence attempts because the event was observed
//! either way; persistence failures are logged, never fatal to the event.

pub mod broadcast;
pub mod dedup;
pub mod ingest;
pub mod keyed_lock;
pub mod sink;
pub mod webhook;

pub use {
    broadcast::{BROADCAST_SEND_GAP, BroadcastDispatcher},
    dedup::{DEDUP_TTL, DedupGuard},
    ingest::{MessageIngestionPipeline, TenantLink},
    keyed_lock::KeyedLocks,
    sink::{EventSink, GatewayEvent},
    webhook::{HttpWebhookSender, WebhookSender},
};
