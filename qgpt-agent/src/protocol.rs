use std::sync::Arc;
use std::time::Duration;

use qgpt_infer::{chat_with_timeout, ModelClient, ModelError};
use qgpt_types::{ChatMessage, Exchange, ReplySource};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Recorded in place of a response when the call hit its deadline.
pub const TIMED_OUT: &str = "<timed out>";

/// Outcome of asking the model for JSON.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded<T> {
    /// First answer decoded.
    Parsed(T),
    /// First answer was unusable, the repair answer decoded.
    Repaired(T),
    /// Neither answer decoded.
    Unusable,
}

impl<T> Decoded<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decoded<U> {
        match self {
            Decoded::Parsed(v) => Decoded::Parsed(f(v)),
            Decoded::Repaired(v) => Decoded::Repaired(f(v)),
            Decoded::Unusable => Decoded::Unusable,
        }
    }
}

/// An agent's answer together with how it was obtained.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentReply<T> {
    pub value: T,
    pub source: ReplySource,
    pub exchanges: Vec<Exchange>,
}

impl<T> AgentReply<T> {
    /// Dry-run answer: no model call was made.
    pub fn heuristic(value: T) -> Self {
        Self {
            value,
            source: ReplySource::Heuristic,
            exchanges: Vec::new(),
        }
    }

    /// Turn a protocol outcome into a reply, running `fallback` only when both
    /// answers were unusable.
    pub fn settle(decoded: Decoded<T>, exchanges: Vec<Exchange>, fallback: impl FnOnce() -> T) -> Self {
        let (value, source) = match decoded {
            Decoded::Parsed(v) => (v, ReplySource::Model),
            Decoded::Repaired(v) => (v, ReplySource::Repaired),
            Decoded::Unusable => (fallback(), ReplySource::Fallback),
        };
        Self {
            value,
            source,
            exchanges,
        }
    }
}

/// Shared request/repair machinery.
///
/// At most two model calls per request: the prompt, and one repair request
/// carrying the invalid text. A call that exceeds the deadline counts as an
/// unusable answer, not as an error.
#[derive(Clone)]
pub struct Protocol {
    client: Arc<dyn ModelClient>,
    timeout: Duration,
}

impl Protocol {
    pub fn new(client: Arc<dyn ModelClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn client(&self) -> &dyn ModelClient {
        self.client.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One user-message chat call. `Ok(None)` means the deadline passed.
    pub async fn ask(&self, prompt: &str) -> Result<Option<String>, ModelError> {
        self.ask_messages(&[ChatMessage::user(prompt)]).await
    }

    pub async fn ask_messages(&self, messages: &[ChatMessage]) -> Result<Option<String>, ModelError> {
        match chat_with_timeout(self.client.as_ref(), messages, self.timeout).await {
            Ok(text) => Ok(Some(text)),
            Err(ModelError::Timeout(limit)) => {
                warn!(?limit, "model call timed out");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Ask for JSON of shape `T`; `shape_hint` names the expected keys in the
    /// repair request.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        prompt: String,
        shape_hint: &str,
    ) -> Result<(Decoded<T>, Vec<Exchange>), ModelError> {
        let mut exchanges = Vec::with_capacity(2);

        let first = self.ask(&prompt).await?;
        exchanges.push(Exchange {
            prompt,
            response: first.clone().unwrap_or_else(|| TIMED_OUT.to_string()),
        });
        if let Some(value) = first.as_deref().and_then(decode_json) {
            return Ok((Decoded::Parsed(value), exchanges));
        }

        debug!("model answer was not valid JSON, sending repair request");
        let repair_prompt = format!(
            "Return valid JSON only, with {shape_hint}. You previously responded with invalid JSON:\n{}",
            first.unwrap_or_default()
        );
        let second = self.ask(&repair_prompt).await?;
        exchanges.push(Exchange {
            prompt: repair_prompt,
            response: second.clone().unwrap_or_else(|| TIMED_OUT.to_string()),
        });
        match second.as_deref().and_then(decode_json) {
            Some(value) => Ok((Decoded::Repaired(value), exchanges)),
            None => {
                warn!("repair answer was not valid JSON either");
                Ok((Decoded::Unusable, exchanges))
            }
        }
    }
}

/// Strict decode: surrounding whitespace is tolerated, nothing else.
pub fn decode_json<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_str(raw.trim()).ok()
}

/// `reason` values arrive as whatever the model felt like sending.
pub(crate) fn reason_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qgpt_infer::ScriptedClient;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Shape {
        items: Vec<String>,
    }

    fn protocol(client: ScriptedClient) -> (Arc<ScriptedClient>, Protocol) {
        let client = Arc::new(client);
        let p = Protocol::new(client.clone(), Duration::from_millis(100));
        (client, p)
    }

    #[tokio::test]
    async fn clean_answer_needs_one_call() {
        let (client, p) = protocol(ScriptedClient::new([r#" {"items":["a"]} "#]));
        let (decoded, exchanges) = p.request_json::<Shape>("q".into(), "items").await.unwrap();
        assert_eq!(decoded, Decoded::Parsed(Shape { items: vec!["a".into()] }));
        assert_eq!(exchanges.len(), 1);
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn repair_request_carries_invalid_text() {
        let (client, p) = protocol(ScriptedClient::new(["sure! items: a", r#"{"items":[]}"#]));
        let (decoded, exchanges) = p.request_json::<Shape>("q".into(), "items").await.unwrap();
        assert_eq!(decoded, Decoded::Repaired(Shape { items: vec![] }));
        assert_eq!(exchanges.len(), 2);
        let repair = client.prompt(1).unwrap();
        assert!(repair.contains("Return valid JSON only"));
        assert!(repair.contains("sure! items: a"));
    }

    #[tokio::test]
    async fn wrong_array_type_counts_as_invalid() {
        let (client, p) = protocol(ScriptedClient::new([r#"{"items":"a"}"#, "```json\n{}\n```"]));
        let (decoded, _) = p.request_json::<Shape>("q".into(), "items").await.unwrap();
        assert_eq!(decoded, Decoded::Unusable);
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn timeout_is_treated_as_invalid_output() {
        let client = ScriptedClient::new(Vec::<String>::new())
            .then_stall(Duration::from_secs(5), r#"{"items":[]}"#)
            .then_reply(r#"{"items":["late"]}"#);
        let (_, p) = protocol(client);
        let (decoded, exchanges) = p.request_json::<Shape>("q".into(), "items").await.unwrap();
        assert_eq!(decoded, Decoded::Repaired(Shape { items: vec!["late".into()] }));
        assert_eq!(exchanges[0].response, TIMED_OUT);
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let (_, p) = protocol(ScriptedClient::new(Vec::<String>::new()).then_fail("connection refused"));
        let err = p.request_json::<Shape>("q".into(), "items").await.unwrap_err();
        assert!(matches!(err, ModelError::Http(_)));
    }

    #[test]
    fn settle_runs_fallback_only_when_unusable() {
        let reply = AgentReply::settle(Decoded::Parsed(1), vec![], || panic!("not needed"));
        assert_eq!(reply.source, ReplySource::Model);
        let reply = AgentReply::settle(Decoded::Unusable, vec![], || 7);
        assert_eq!((reply.value, reply.source), (7, ReplySource::Fallback));
    }

    #[test]
    fn reason_accepts_any_json() {
        assert_eq!(reason_text(serde_json::json!("x")), "x");
        assert_eq!(reason_text(serde_json::Value::Null), "");
        assert_eq!(reason_text(serde_json::json!(3)), "3");
    }
}
