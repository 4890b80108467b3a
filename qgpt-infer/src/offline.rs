use async_trait::async_trait;
use qgpt_types::ChatMessage;

use crate::{ModelClient, ModelError};

pub const OFFLINE_REPLY: &str = "SQL: SELECT 1 AS answer\nExplanation: offline backend, no model was called.";

/// Deterministic offline backend.
///
/// Reports `is_offline() == true`, so the pipeline runs in dry-run and never
/// calls `chat`. Direct callers get one fixed answer. Embeddings come from
/// the hashed lexical embedder.
pub struct OfflineClient {
    dim: usize,
}

impl OfflineClient {
    pub fn new() -> Self {
        Self {
            dim: qgpt_embed::DEFAULT_DIM,
        }
    }

    pub fn with_dim(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for OfflineClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelClient for OfflineClient {
    async fn chat(&self, _messages: &[ChatMessage]) -> Result<String, ModelError> {
        Ok(OFFLINE_REPLY.to_string())
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        Ok(qgpt_embed::embed_all(texts, self.dim))
    }

    fn is_offline(&self) -> bool {
        true
    }
}
