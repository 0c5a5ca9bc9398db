//! Contact identity resolution.
//!
//! The transport can address one human through two namespaces: a stable,
//! phone-linked ("addressable") identity and an ephemeral linked identity.
//! Business logic must operate on the addressable one, so every write path
//! resolves through this cache first. Resolution is best-effort: a miss
//! passes the input through unchanged and downstream consumers tolerate two
//! stored identities for the same contact.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {pesan_transport::ContactUpdate, tracing::debug};

#[derive(Default)]
struct TenantContacts {
    /// linked identity → addressable identity. Never the reverse.
    links: HashMap<String, String>,
    /// addressable identity → best known display name.
    names: HashMap<String, String>,
}

/// Process-wide contact identity cache, keyed by tenant. The relational
/// store stays authoritative; this cache is an optimization fed
/// opportunistically from transport contact events.
#[derive(Clone, Default)]
pub struct IdentityResolver {
    tenants: Arc<RwLock<HashMap<String, TenantContacts>>>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a contact event. A non-empty name overwrites the stored name;
    /// a linked identity registers (or refreshes) the linked→addressable
    /// mapping. Mappings are never actively invalidated.
    pub fn record_contact(
        &self,
        tenant_id: &str,
        identity: &str,
        name: Option<&str>,
        linked_identity: Option<&str>,
    ) {
        let Ok(mut tenants) = self.tenants.write() else {
            return;
        };
        let contacts = tenants.entry(tenant_id.to_string()).or_default();

        if let Some(name) = name
            && !name.is_empty()
        {
            contacts.names.insert(identity.to_string(), name.to_string());
        }

        // Mapping only flows linked → addressable; a self-referential entry
        // would make resolution non-idempotent.
        if let Some(linked) = linked_identity
            && !linked.is_empty()
            && linked != identity
        {
            debug!(tenant_id, linked, identity, "linked identity mapped");
            contacts.links.insert(linked.to_string(), identity.to_string());
        }
    }

    /// Apply a batch of transport contact updates.
    pub fn record_contacts(&self, tenant_id: &str, contacts: &[ContactUpdate]) {
        for c in contacts {
            self.record_contact(
                tenant_id,
                &c.identity,
                c.name.as_deref(),
                c.linked_identity.as_deref(),
            );
        }
    }

    /// Resolve to the addressable identity, or return the input unchanged.
    #[must_use]
    pub fn resolve_addressable(&self, tenant_id: &str, identity: &str) -> String {
        self.tenants
            .read()
            .ok()
            .and_then(|t| t.get(tenant_id)?.links.get(identity).cloned())
            .unwrap_or_else(|| identity.to_string())
    }

    /// Best display name for an identity: stored contact name, then the
    /// transport-provided pushname, then a formatted raw identity.
    #[must_use]
    pub fn resolve_display(
        &self,
        tenant_id: &str,
        identity: &str,
        push_name: Option<&str>,
    ) -> String {
        let addressable = self.resolve_addressable(tenant_id, identity);
        if let Ok(tenants) = self.tenants.read()
            && let Some(contacts) = tenants.get(tenant_id)
            && let Some(name) = contacts.names.get(&addressable)
        {
            return name.clone();
        }
        if let Some(push) = push_name
            && !push.is_empty()
        {
            return push.to_string();
        }
        format_raw_identity(&addressable)
    }
}

/// Human-ish rendering of a raw identity: the part before `@`, with a `+`
/// prefix when it is all digits (phone-shaped).
#[must_use]
pub fn format_raw_identity(identity: &str) -> String {
    let local = identity.split('@').next().unwrap_or(identity);
    if !local.is_empty() && local.chars().all(|c| c.is_ascii_digit()) {
        format!("+{local}")
    } else {
        local.to_string()
    }
}
