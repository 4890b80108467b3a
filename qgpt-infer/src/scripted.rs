use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use qgpt_types::ChatMessage;

use crate::{ModelClient, ModelError};

enum Step {
    Reply(String),
    Fail(String),
    Stall(Duration, String),
}

/// Replays canned chat answers in order and records every request.
///
/// Used for replaying captured runs and for driving agents through their
/// repair and fallback paths in tests. Embeddings are computed with the
/// hashed lexical embedder unless overridden.
pub struct ScriptedClient {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    embed_calls: Mutex<Vec<Vec<String>>>,
    vectors: Option<Vec<Vec<f32>>>,
    offline: bool,
}

impl ScriptedClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: Mutex::new(replies.into_iter().map(|r| Step::Reply(r.into())).collect()),
            calls: Mutex::new(Vec::new()),
            embed_calls: Mutex::new(Vec::new()),
            vectors: None,
            offline: false,
        }
    }

    /// Queue a transport failure.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.push(Step::Fail(message.into()));
        self
    }

    /// Queue a reply that only arrives after `delay`.
    pub fn then_stall(self, delay: Duration, reply: impl Into<String>) -> Self {
        self.push(Step::Stall(delay, reply.into()));
        self
    }

    pub fn then_reply(self, reply: impl Into<String>) -> Self {
        self.push(Step::Reply(reply.into()));
        self
    }

    /// Fixed vectors returned by `embed`, ignoring its input.
    pub fn with_vectors(mut self, vectors: Vec<Vec<f32>>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    fn push(&self, step: Step) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push_back(step);
        }
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Last user message of the n-th chat call.
    pub fn prompt(&self, n: usize) -> Option<String> {
        let calls = self.calls.lock().ok()?;
        calls.get(n)?.last().map(|m| m.content.clone())
    }

    pub fn embed_calls(&self) -> Vec<Vec<String>> {
        self.embed_calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let step = self.steps.lock().ok().and_then(|mut s| s.pop_front());
        match step {
            Some(Step::Reply(text)) => Ok(text),
            Some(Step::Fail(message)) => Err(ModelError::Http(message)),
            Some(Step::Stall(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Err(ModelError::Envelope("no scripted reply left".into())),
        }
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        if let Ok(mut calls) = self.embed_calls.lock() {
            calls.push(texts.to_vec());
        }
        match &self.vectors {
            Some(v) => Ok(v.clone()),
            None => Ok(qgpt_embed::embed_all(texts, qgpt_embed::DEFAULT_DIM)),
        }
    }

    fn is_offline(&self) -> bool {
        self.offline
    }
}
