use std::time::Duration;

use async_trait::async_trait;
use qgpt_types::ChatMessage;
use thiserror::Error;

pub mod http_openai;
pub use http_openai::OpenAiClient;

pub mod offline;
pub use offline::OfflineClient;

pub mod scripted;
pub use scripted::ScriptedClient;

/// Transport and availability failures. These are fatal at the call site
/// unless that call site defines its own fallback.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model API key is missing")]
    MissingApiKey,
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response envelope: {0}")]
    Envelope(String),
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
}

/// Language-model backend used by every agent and by the orchestrator.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send an ordered conversation, get the assistant text back.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;

    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;

    /// True when the backend is a deterministic offline stand-in. Agents then
    /// skip the model and answer with their heuristics.
    fn is_offline(&self) -> bool {
        false
    }
}

/// Runs `chat` under a deadline; expiry comes back as `ModelError::Timeout`.
pub async fn chat_with_timeout(
    client: &dyn ModelClient,
    messages: &[ChatMessage],
    limit: Duration,
) -> Result<String, ModelError> {
    match tokio::time::timeout(limit, client.chat(messages)).await {
        Ok(res) => res,
        Err(_) => Err(ModelError::Timeout(limit)),
    }
}
