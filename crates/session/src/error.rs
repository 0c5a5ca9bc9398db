use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by foreground session operations. Background paths
/// (reconnects, event handling) log and degrade instead.
#[derive(Debug, Error)]
pub enum Error {
    /// No session exists for the tenant.
    #[error("no active session for tenant: {tenant_id}")]
    NotFound { tenant_id: String },

    /// The transport rejected a foreground operation.
    #[error("transport operation failed: {source}")]
    Transport {
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    #[must_use]
    pub fn not_found(tenant_id: impl Into<String>) -> Self {
        Self::NotFound {
            tenant_id: tenant_id.into(),
        }
    }

    #[must_use]
    pub fn transport(source: anyhow::Error) -> Self {
        Self::Transport { source }
    }
}
