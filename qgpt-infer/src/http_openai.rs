use async_trait::async_trait;
use qgpt_types::ChatMessage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ModelClient, ModelError};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Client for an OpenAI-compatible `/chat/completions` + `/embeddings` API.
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    embed_model: String,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            chat_model: DEFAULT_CHAT_MODEL.into(),
            embed_model: DEFAULT_EMBED_MODEL.into(),
            temperature: 0.1,
        }
    }

    pub fn with_models(mut self, chat_model: impl Into<String>, embed_model: impl Into<String>) -> Self {
        self.chat_model = chat_model.into();
        self.embed_model = embed_model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn api_key(&self) -> Result<&str, ModelError> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(ModelError::MissingApiKey),
        }
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<String, ModelError> {
        let key = self.api_key()?;
        let url = format!("{}/{}", self.base_url, path);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(body)
            .send()
            .await
            .map_err(|e| ModelError::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ModelError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let body = ChatRequest {
            model: &self.chat_model,
            temperature: self.temperature,
            messages,
        };
        let text = self.post("chat/completions", &body).await?;
        debug!(model = %self.chat_model, bytes = text.len(), "chat completion received");
        parse_chat_response(&text)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbeddingRequest {
            model: &self.embed_model,
            input: texts,
        };
        let text = self.post("embeddings", &body).await?;
        parse_embedding_response(&text, texts.len())
    }
}

fn parse_chat_response(body: &str) -> Result<String, ModelError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ModelError::Envelope(format!("{e}: {body}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ModelError::Envelope(format!("chat response missing content: {body}")))
}

fn parse_embedding_response(body: &str, expected: usize) -> Result<Vec<Vec<f32>>, ModelError> {
    let mut parsed: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| ModelError::Envelope(format!("{e}: {body}")))?;
    if parsed.data.len() != expected {
        return Err(ModelError::Envelope(format!(
            "expected {expected} embeddings, got {}",
            parsed.data.len()
        )));
    }
    parsed.data.sort_by_key(|row| row.index);
    Ok(parsed.data.into_iter().map(|row| row.embedding).collect())
}
