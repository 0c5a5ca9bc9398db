//! Per-tenant conversation statistics.
//!
//! Counters are monotone (except an explicit per-tenant reset) and update
//! as soon as an event is observed; persistence failures downstream never
//! roll them back. A bounded activity ring keeps the most recent notable
//! events per tenant. The whole map is periodically flushed to a JSON flat
//! file as a crash-tolerant cache; the relational store stays the authority
//! for analytics.

pub mod flush;

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

pub use flush::run_flush_loop;

/// Cap on the per-tenant activity ring; oldest entries are evicted first.
pub const ACTIVITY_CAP: usize = 50;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// What a ring entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivityKind {
    Auto,
    Ai,
    Broadcast,
    Complaint,
    Invoice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    pub detail: String,
    pub at: i64,
}

/// Counters plus the activity ring for one tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantStats {
    pub inbound: u64,
    pub outbound: u64,
    pub ai_replies: u64,
    pub media: u64,
    pub invoices_issued: u64,
    pub invoices_paid: u64,
    pub complaints: u64,
    /// Complaint keyword → hit count, for the top-complaint view.
    pub complaint_keywords: HashMap<String, u64>,
    pub activity: VecDeque<ActivityEntry>,
}

impl TenantStats {
    fn push_activity(&mut self, kind: ActivityKind, detail: String) {
        if self.activity.len() >= ACTIVITY_CAP {
            self.activity.pop_front();
        }
        self.activity.push_back(ActivityEntry {
            kind,
            detail,
            at: now_ms(),
        });
    }

    /// Complaint keywords sorted by hit count, highest first.
    #[must_use]
    pub fn top_complaints(&self) -> Vec<(String, u64)> {
        let mut v: Vec<_> = self
            .complaint_keywords
            .iter()
            .map(|(k, n)| (k.clone(), *n))
            .collect();
        v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        v
    }
}

/// Process-wide aggregator, keyed by tenant. Cheap to clone and share.
#[derive(Clone, Default)]
pub struct StatsAggregator {
    tenants: Arc<RwLock<HashMap<String, TenantStats>>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tenant(&self, tenant_id: &str, f: impl FnOnce(&mut TenantStats)) {
        if let Ok(mut tenants) = self.tenants.write() {
            f(tenants.entry(tenant_id.to_string()).or_default());
        }
    }

    pub fn record_inbound(&self, tenant_id: &str) {
        self.with_tenant(tenant_id, |s| s.inbound += 1);
    }

    pub fn record_outbound(&self, tenant_id: &str) {
        self.with_tenant(tenant_id, |s| s.outbound += 1);
    }

    pub fn record_media(&self, tenant_id: &str) {
        self.with_tenant(tenant_id, |s| s.media += 1);
    }

    /// An auto-reply fired. No dedicated counter; the ring entry is the
    /// record; outbound increments when the send echoes back through the
    /// pipeline.
    pub fn record_auto_reply(&self, tenant_id: &str, chat_id: &str, keyword: &str) {
        self.with_tenant(tenant_id, |s| {
            s.push_activity(ActivityKind::Auto, format!("{keyword} -> {chat_id}"));
        });
    }

    pub fn record_ai_reply(&self, tenant_id: &str, chat_id: &str) {
        self.with_tenant(tenant_id, |s| {
            s.ai_replies += 1;
            s.push_activity(ActivityKind::Ai, format!("ai -> {chat_id}"));
        });
    }

    pub fn record_complaint(&self, tenant_id: &str, keyword: &str) {
        self.with_tenant(tenant_id, |s| {
            s.complaints += 1;
            *s.complaint_keywords.entry(keyword.to_string()).or_default() += 1;
            s.push_activity(ActivityKind::Complaint, keyword.to_string());
        });
    }

    pub fn record_broadcast(&self, tenant_id: &str, accepted: usize) {
        self.with_tenant(tenant_id, |s| {
            s.push_activity(ActivityKind::Broadcast, format!("{accepted} recipients"));
        });
    }

    pub fn record_invoice_issued(&self, tenant_id: &str) {
        self.with_tenant(tenant_id, |s| {
            s.invoices_issued += 1;
            s.push_activity(ActivityKind::Invoice, "issued".into());
        });
    }

    pub fn record_invoice_paid(&self, tenant_id: &str) {
        self.with_tenant(tenant_id, |s| {
            s.invoices_paid += 1;
            s.push_activity(ActivityKind::Invoice, "paid".into());
        });
    }

    /// Snapshot for one tenant (default/zeroed when nothing recorded yet).
    #[must_use]
    pub fn snapshot(&self, tenant_id: &str) -> TenantStats {
        self.tenants
            .read()
            .ok()
            .and_then(|t| t.get(tenant_id).cloned())
            .unwrap_or_default()
    }

    /// Snapshot of every tenant, for the flat-file flush.
    #[must_use]
    pub fn snapshot_all(&self) -> HashMap<String, TenantStats> {
        self.tenants.read().map(|t| t.clone()).unwrap_or_default()
    }

    /// Explicit per-tenant reset, the one sanctioned non-monotone
    /// operation.
    pub fn reset(&self, tenant_id: &str) {
        if let Ok(mut tenants) = self.tenants.write() {
            tenants.remove(tenant_id);
        }
    }

    /// Replace state wholesale from a loaded flush file.
    pub fn restore(&self, snapshot: HashMap<String, TenantStats>) {
        if let Ok(mut tenants) = self.tenants.write() {
            *tenants = snapshot;
        }
    }
}
