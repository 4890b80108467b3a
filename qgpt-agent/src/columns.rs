use qgpt_infer::ModelError;
use qgpt_types::TableSchema;
use serde::Deserialize;
use tracing::debug;

use crate::heuristics::heuristic_columns;
use crate::protocol::{reason_text, AgentReply, Decoded, Protocol};
use crate::{REASON_FALLBACK, REASON_HEURISTIC};

#[derive(Debug, Deserialize)]
struct ColumnsWire {
    #[serde(default)]
    table_id: Option<String>,
    keep_columns: Vec<String>,
    #[serde(default)]
    reason: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnChoice {
    pub table_id: String,
    pub keep_columns: Vec<String>,
    pub reason: String,
}

/// Chooses which columns of one table go into the generation prompt.
#[derive(Clone)]
pub struct ColumnAgent {
    protocol: Protocol,
}

impl ColumnAgent {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    fn prompt(question: &str, schema: &TableSchema, cap: usize) -> String {
        format!(
            "You are Column Prune Agent. Given a question and table schema, choose the most relevant columns.\n\
             Respond in strict JSON with keys \"table_id\", \"keep_columns\" (array of column names), and \"reason\".\n\
             Table: {}\n\
             Columns: {}\n\
             Question: {question}\n\
             Keep at most {cap} columns.\n",
            schema.table_id,
            schema.column_names().join(", ")
        )
    }

    /// `keep_columns` is always an exact-name subset of `schema`, in
    /// declaration order, at most `cap` long, whatever the model said.
    pub async fn prune(
        &self,
        question: &str,
        schema: &TableSchema,
        cap: usize,
        dry_run: bool,
    ) -> Result<AgentReply<ColumnChoice>, ModelError> {
        let heuristic = |reason: &str| ColumnChoice {
            table_id: schema.table_id.clone(),
            keep_columns: heuristic_columns(question, schema, cap),
            reason: reason.to_string(),
        };
        if dry_run {
            return Ok(AgentReply::heuristic(heuristic(REASON_HEURISTIC)));
        }

        let (decoded, exchanges) = self
            .protocol
            .request_json::<ColumnsWire>(
                Self::prompt(question, schema, cap),
                "keys \"table_id\" and \"keep_columns\"",
            )
            .await?;
        let decoded: Decoded<ColumnChoice> = decoded.map(|w| {
            if let Some(id) = w.table_id.as_deref().filter(|id| *id != schema.table_id) {
                debug!(expected = %schema.table_id, got = id, "column agent answered for another table id");
            }
            ColumnChoice {
                table_id: schema.table_id.clone(),
                keep_columns: schema
                    .pruned(&w.keep_columns, cap)
                    .columns
                    .into_iter()
                    .map(|c| c.name)
                    .collect(),
                reason: reason_text(w.reason),
            }
        });
        let reply = AgentReply::settle(decoded, exchanges, || heuristic(REASON_FALLBACK));
        debug!(
            table = %schema.table_id,
            kept = reply.value.keep_columns.len(),
            source = reply.source.as_str(),
            "columns pruned"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qgpt_infer::ScriptedClient;
    use qgpt_types::{Column, ReplySource};
    use std::sync::Arc;
    use std::time::Duration;

    fn trips() -> TableSchema {
        TableSchema {
            table_id: "mobility.trips".into(),
            description: "One row per trip".into(),
            columns: ["trip_id", "city", "status", "completed_at", "fare_amount"]
                .iter()
                .map(|n| Column {
                    name: n.to_string(),
                    data_type: "text".into(),
                    description: String::new(),
                })
                .collect(),
            partition_info: Some("requested_at".into()),
        }
    }

    fn agent(client: ScriptedClient) -> (Arc<ScriptedClient>, ColumnAgent) {
        let client = Arc::new(client);
        let agent = ColumnAgent::new(Protocol::new(client.clone(), Duration::from_secs(1)));
        (client, agent)
    }

    #[tokio::test]
    async fn model_columns_are_checked_and_capped() {
        let (client, agent) = agent(ScriptedClient::new([
            r#"{"table_id":"mobility.trips","keep_columns":["status","CITY","ghost","trip_id","fare_amount"],"reason":"r"}"#,
        ]));
        let reply = agent.prune("q", &trips(), 2, false).await.unwrap();
        assert_eq!(reply.value.keep_columns, vec!["trip_id", "status"]);
        let prompt = client.prompt(0).unwrap();
        assert!(prompt.contains("Columns: trip_id, city, status, completed_at, fare_amount"));
        assert!(prompt.contains("Keep at most 2 columns."));
    }

    #[tokio::test]
    async fn fallback_uses_token_matching() {
        let (_, agent) = agent(ScriptedClient::new(["{}", "columns: city"]));
        let reply = agent.prune("completed trips by city", &trips(), 15, false).await.unwrap();
        assert_eq!(reply.value.keep_columns, vec!["city", "completed_at"]);
        assert_eq!(reply.value.reason, REASON_FALLBACK);
        assert_eq!(reply.source, ReplySource::Fallback);
    }

    #[tokio::test]
    async fn table_id_always_names_the_input_schema() {
        let (_, agent) = agent(ScriptedClient::new([r#"{"table_id":"other","keep_columns":["city"]}"#]));
        let reply = agent.prune("q", &trips(), 15, false).await.unwrap();
        assert_eq!(reply.value.table_id, "mobility.trips");
        assert_eq!(reply.value.keep_columns, vec!["city"]);
    }
}
