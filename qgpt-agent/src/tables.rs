use qgpt_infer::ModelError;
use serde::Deserialize;
use tracing::debug;

use crate::heuristics::heuristic_tables;
use crate::protocol::{reason_text, AgentReply, Decoded, Protocol};
use crate::{REASON_FALLBACK, REASON_HEURISTIC};

#[derive(Debug, Deserialize)]
struct TablesWire {
    tables: Vec<String>,
    #[serde(default)]
    reason: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableChoice {
    pub tables: Vec<String>,
    pub reason: String,
}

/// Proposes up to `top_k` tables from the candidates of the chosen workspaces.
#[derive(Clone)]
pub struct TableAgent {
    protocol: Protocol,
}

impl TableAgent {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    fn prompt(question: &str, candidates: &[String], top_k: usize) -> String {
        format!(
            "You are Table Agent. Given a question and candidate tables, pick up to {top_k} tables that best answer it.\n\
             Respond in strict JSON with keys \"tables\" (array of table ids) and \"reason\".\n\
             Question: {question}\n\
             Candidate tables: {}\n",
            candidates.join(", ")
        )
    }

    /// Model answers are intersected with `candidates`, keeping the model's
    /// order. Heuristic answers are candidates by construction.
    pub async fn propose(
        &self,
        question: &str,
        candidates: &[String],
        top_k: usize,
        dry_run: bool,
    ) -> Result<AgentReply<TableChoice>, ModelError> {
        let heuristic = |reason: &str| TableChoice {
            tables: heuristic_tables(question, candidates, top_k),
            reason: reason.to_string(),
        };
        if dry_run {
            return Ok(AgentReply::heuristic(heuristic(REASON_HEURISTIC)));
        }

        let (decoded, exchanges) = self
            .protocol
            .request_json::<TablesWire>(Self::prompt(question, candidates, top_k), "keys \"tables\" and \"reason\"")
            .await?;
        let decoded: Decoded<TableChoice> = decoded.map(|w| {
            let mut tables: Vec<String> = Vec::new();
            for t in w.tables {
                if candidates.contains(&t) && !tables.contains(&t) {
                    tables.push(t);
                }
            }
            TableChoice {
                tables,
                reason: reason_text(w.reason),
            }
        });
        let reply = AgentReply::settle(decoded, exchanges, || heuristic(REASON_FALLBACK));
        debug!(tables = ?reply.value.tables, source = reply.source.as_str(), "tables proposed");
        Ok(reply)
    }
}
