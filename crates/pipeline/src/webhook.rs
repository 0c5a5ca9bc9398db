//! Outbound webhook forwarding for received messages.

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    tracing::debug,
};

use pesan_common::NormalizedMessage;

/// Delivery seam so tests can capture posts instead of hitting the network.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn deliver(&self, url: &str, payload: &NormalizedMessage) -> Result<()>;
}

/// JSON POST over HTTP with a short timeout; this runs on a background
/// path, so failures are the caller's to log.
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("building webhook HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn deliver(&self, url: &str, payload: &NormalizedMessage) -> Result<()> {
        self.client
            .post(url)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        debug!(url, event_id = %payload.event_id, "webhook delivered");
        Ok(())
    }
}
