//! AI reply generation seam.
//!
//! The arbitrator only sees [`ReplyGenerator`]; the default implementation
//! speaks the OpenAI-compatible chat completions API over `reqwest`.

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// One prior exchange half for the model context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

/// Everything the generator needs for one reply.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    /// Product/knowledge context, already truncated by the caller.
    pub product_context: String,
    pub history: Vec<HistoryTurn>,
    pub sender_name: String,
    pub text: String,
}

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Produce reply text. Failure means "no reply produced"; callers
    /// degrade to silence, never surface this to the contact.
    async fn generate(&self, req: GenerationRequest) -> Result<String>;
}

// ── OpenAI-compatible implementation ────────────────────────────────────────

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Secret<String>,
    model: String,
}

impl OpenAiCompatGenerator {
    pub fn new(base_url: impl Into<String>, api_key: Secret<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ReplyGenerator for OpenAiCompatGenerator {
    async fn generate(&self, req: GenerationRequest) -> Result<String> {
        let system = if req.product_context.is_empty() {
            req.system_prompt.clone()
        } else {
            format!("{}\n\nKnowledge:\n{}", req.system_prompt, req.product_context)
        };
        let user = format!("{}: {}", req.sender_name, req.text);

        let mut messages = vec![ChatMessage {
            role: "system",
            content: &system,
        }];
        messages.extend(req.history.iter().map(|t| ChatMessage {
            role: &t.role,
            content: &t.content,
        }));
        messages.push(ChatMessage {
            role: "user",
            content: &user,
        });

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&ChatRequest {
                model: &self.model,
                messages,
                temperature: 0.7,
            })
            .send()
            .await
            .context("chat completion request failed")?
            .error_for_status()
            .context("chat completion returned error status")?;

        let parsed: ChatResponse = response.json().await.context("invalid chat completion body")?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            anyhow::bail!("model returned empty reply");
        }
        Ok(text)
    }
}
