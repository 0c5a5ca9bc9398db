use {anyhow::Result, async_trait::async_trait};

/// Persistent storage for opaque transport credential blobs, keyed by
/// `(tenant_id, slot)`. The blob layout is provider-defined; this layer
/// never inspects it.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, tenant_id: &str, slot: &str) -> Result<Option<Vec<u8>>>;
    async fn save(&self, tenant_id: &str, slot: &str, blob: &[u8]) -> Result<()>;
    /// Remove every slot for a tenant (logout / unpair).
    async fn delete_tenant(&self, tenant_id: &str) -> Result<()>;
    /// Tenants that have at least one persisted slot, for startup recovery.
    async fn tenants(&self) -> Result<Vec<String>>;
}

/// The slot the session layer uses for the primary pairing blob.
pub const PRIMARY_SLOT: &str = "creds";
