use qgpt_infer::ModelError;
use serde::Deserialize;
use tracing::debug;

use crate::heuristics::heuristic_workspaces;
use crate::protocol::{reason_text, AgentReply, Decoded, Protocol};
use crate::{REASON_FALLBACK, REASON_HEURISTIC};

#[derive(Debug, Deserialize)]
struct WorkspaceWire {
    workspaces: Vec<String>,
    #[serde(default)]
    reason: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkspaceChoice {
    pub workspaces: Vec<String>,
    pub reason: String,
}

/// Picks the one or two workspaces a question belongs to.
#[derive(Clone)]
pub struct WorkspaceAgent {
    protocol: Protocol,
}

impl WorkspaceAgent {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    fn prompt(question: &str, candidates: &[String]) -> String {
        format!(
            "You are Intent Agent. Given a user question and available workspaces, select the 1 or 2 most relevant workspaces.\n\
             Respond in strict JSON with keys \"workspaces\" (array of strings) and \"reason\".\n\
             Available workspaces: {}\n\
             Question: {}\n",
            candidates.join(", "),
            question
        )
    }

    /// Names the model returns are passed through as given, not checked
    /// against `candidates`.
    pub async fn select(
        &self,
        question: &str,
        candidates: &[String],
        limit: usize,
        dry_run: bool,
    ) -> Result<AgentReply<WorkspaceChoice>, ModelError> {
        let heuristic = |reason: &str| WorkspaceChoice {
            workspaces: heuristic_workspaces(question, candidates, limit),
            reason: reason.to_string(),
        };
        if dry_run {
            return Ok(AgentReply::heuristic(heuristic(REASON_HEURISTIC)));
        }

        let (decoded, exchanges) = self
            .protocol
            .request_json::<WorkspaceWire>(Self::prompt(question, candidates), "keys \"workspaces\" and \"reason\"")
            .await?;
        let decoded: Decoded<WorkspaceChoice> = decoded.map(|w| WorkspaceChoice {
            workspaces: w.workspaces,
            reason: reason_text(w.reason),
        });
        let reply = AgentReply::settle(decoded, exchanges, || heuristic(REASON_FALLBACK));
        debug!(workspaces = ?reply.value.workspaces, source = reply.source.as_str(), "workspaces selected");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qgpt_infer::ScriptedClient;
    use qgpt_types::ReplySource;
    use std::sync::Arc;
    use std::time::Duration;

    fn agent(client: ScriptedClient) -> (Arc<ScriptedClient>, WorkspaceAgent) {
        let client = Arc::new(client);
        let agent = WorkspaceAgent::new(Protocol::new(client.clone(), Duration::from_secs(1)));
        (client, agent)
    }

    fn cands() -> Vec<String> {
        vec!["Mobility".into(), "Ads".into()]
    }

    #[tokio::test]
    async fn dry_run_never_calls_model() {
        let (client, agent) = agent(ScriptedClient::new(Vec::<String>::new()));
        let reply = agent.select("ride counts", &cands(), 2, true).await.unwrap();
        assert_eq!(reply.value.workspaces, vec!["Mobility"]);
        assert_eq!(reply.value.reason, REASON_HEURISTIC);
        assert_eq!(reply.source, ReplySource::Heuristic);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn model_answer_used_verbatim() {
        let (client, agent) = agent(ScriptedClient::new([r#"{"workspaces":["Ads","Other"],"reason":"clicks"}"#]));
        let reply = agent.select("ride counts", &cands(), 2, false).await.unwrap();
        assert_eq!(reply.value.workspaces, vec!["Ads", "Other"]);
        assert_eq!(reply.value.reason, "clicks");
        let prompt = client.prompt(0).unwrap();
        assert!(prompt.contains("Available workspaces: Mobility, Ads"));
        assert!(prompt.contains("Question: ride counts"));
    }

    #[tokio::test]
    async fn two_bad_answers_fall_back() {
        let (client, agent) = agent(ScriptedClient::new(["nope", r#"{"workspaces":"Ads"}"#]));
        let reply = agent.select("ride counts", &cands(), 2, false).await.unwrap();
        assert_eq!(reply.value.workspaces, vec!["Mobility"]);
        assert_eq!(reply.value.reason, REASON_FALLBACK);
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_eq!(reply.exchanges.len(), 2);
        assert_eq!(client.call_count(), 2);
    }
}
