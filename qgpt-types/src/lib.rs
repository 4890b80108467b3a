//! Shared records for the query pipeline.
//!
//! Catalog rows are normalized into these types once, at load time. Everything
//! downstream (agents, validator, orchestrator) works on these and nothing else.

use serde::{Deserialize, Serialize};

/// Named grouping of related tables and curated examples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub table_ids: Vec<String>,
    #[serde(default, alias = "sql_example_ids")]
    pub example_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub partition_info: Option<String>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Copy of this schema holding only the columns named in `keep`.
    ///
    /// Matching is exact. Declaration order of the original is preserved and at
    /// most `cap` columns survive. `self` is left untouched.
    pub fn pruned<S: AsRef<str>>(&self, keep: &[S], cap: usize) -> TableSchema {
        let columns = self
            .columns
            .iter()
            .filter(|c| keep.iter().any(|k| k.as_ref() == c.name))
            .take(cap)
            .cloned()
            .collect();
        TableSchema {
            table_id: self.table_id.clone(),
            description: self.description.clone(),
            columns,
            partition_info: self.partition_info.clone(),
        }
    }
}

/// Curated (description, SQL) pair. Only ever used as prompt context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SqlExample {
    pub id: String,
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub description: String,
    pub sql: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One prompt and the raw text the model sent back for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub prompt: String,
    pub response: String,
}

/// Where a stage's answer came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    /// First model answer decoded cleanly.
    Model,
    /// Decoded after the single repair request.
    Repaired,
    /// Both model answers were unusable; heuristic answer.
    Fallback,
    /// Dry-run: heuristic or stub, no model call made.
    Heuristic,
    /// Caller override, stage skipped.
    Forced,
    /// Input passed through unchanged.
    Passthrough,
    /// Deterministic rule, no model involved (validation, retrieval skip).
    Check,
}

impl ReplySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplySource::Model => "model",
            ReplySource::Repaired => "repaired",
            ReplySource::Fallback => "fallback",
            ReplySource::Heuristic => "heuristic",
            ReplySource::Forced => "forced",
            ReplySource::Passthrough => "passthrough",
            ReplySource::Check => "check",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Enhance,
    Workspaces,
    Tables,
    ColumnPrune,
    FewShot,
    Generation,
    Validation,
    Repair,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Enhance => "enhance",
            Stage::Workspaces => "workspaces",
            Stage::Tables => "tables",
            Stage::ColumnPrune => "column_prune",
            Stage::FewShot => "few_shot",
            Stage::Generation => "generation",
            Stage::Validation => "validation",
            Stage::Repair => "repair",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub stage: Stage,
    pub source: ReplySource,
    #[serde(default)]
    pub exchanges: Vec<Exchange>,
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// Ordered record of every stage of one run.
///
/// Stages that run once per table (column pruning) appear once per table, in
/// the order they ran.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugTrail {
    pub entries: Vec<TraceEntry>,
}

impl DebugTrail {
    pub fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    pub fn first(&self, stage: Stage) -> Option<&TraceEntry> {
        self.entries.iter().find(|e| e.stage == stage)
    }

    pub fn entries_for(&self, stage: Stage) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter().filter(move |e| e.stage == stage)
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.entries.iter().map(|e| e.stage).collect()
    }

    /// Total number of model round-trips recorded.
    pub fn exchange_count(&self) -> usize {
        self.entries.iter().map(|e| e.exchanges.len()).sum()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Builds a report from raw errors, dropping repeats but keeping first-seen order.
    pub fn from_errors(errors: Vec<String>) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(errors.len());
        for e in errors {
            if !unique.contains(&e) {
                unique.push(e);
            }
        }
        Self {
            valid: unique.is_empty(),
            errors: unique,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnhancedQuestion {
    pub question: String,
    pub expanded: String,
}

/// One question as handed to the pipeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(rename = "workspace", default)]
    pub forced_workspace: Option<String>,
    #[serde(rename = "tables", default)]
    pub forced_tables: Vec<String>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }
}

/// Everything a run produced, intermediate artifacts included.
///
/// `validation` reflects the SQL as first generated. When `repaired` is true the
/// final `generated_sql` came from the repair pass and has not been validated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub question: String,
    pub enhanced: EnhancedQuestion,
    pub selected_workspaces: Vec<String>,
    pub proposed_tables: Vec<String>,
    pub confirmed_tables: Vec<String>,
    pub pruned_schemas: Vec<TableSchema>,
    pub few_shot_examples: Vec<String>,
    pub generated_sql: String,
    pub explanation: String,
    pub validation: ValidationReport,
    pub repaired: bool,
    pub debug: DebugTrail,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trips() -> TableSchema {
        TableSchema {
            table_id: "mobility.trips".into(),
            description: "Trips".into(),
            columns: ["trip_id", "city", "status", "fare_amount"]
                .iter()
                .map(|n| Column {
                    name: n.to_string(),
                    data_type: "text".into(),
                    description: String::new(),
                })
                .collect(),
            partition_info: Some("requested_at (daily)".into()),
        }
    }

    #[test]
    fn pruned_keeps_declaration_order_and_metadata() {
        let original = trips();
        let pruned = original.pruned(&["fare_amount", "trip_id", "missing"], 15);
        assert_eq!(pruned.column_names(), vec!["trip_id", "fare_amount"]);
        assert_eq!(pruned.table_id, original.table_id);
        assert_eq!(pruned.partition_info, original.partition_info);
        assert_eq!(original.columns.len(), 4);
    }

    #[test]
    fn pruned_is_case_sensitive_and_capped() {
        let pruned = trips().pruned(&["CITY", "city", "status", "trip_id"], 2);
        assert_eq!(pruned.column_names(), vec!["trip_id", "city"]);
    }

    #[test]
    fn report_dedups_in_order() {
        let r = ValidationReport::from_errors(vec!["b".into(), "a".into(), "b".into()]);
        assert!(!r.valid);
        assert_eq!(r.errors, vec!["b", "a"]);
        assert!(ValidationReport::from_errors(Vec::new()).valid);
    }

    #[test]
    fn workspace_accepts_legacy_example_key() {
        let ws: Workspace = serde_json::from_str(
            r#"{"name":"Ads","table_ids":["ads.impressions"],"sql_example_ids":["ex_ads_ctr"]}"#,
        )
        .unwrap();
        assert_eq!(ws.example_ids, vec!["ex_ads_ctr"]);
        assert!(ws.description.is_empty());
    }

    #[test]
    fn query_request_uses_short_keys() {
        let req: QueryRequest =
            serde_json::from_str(r#"{"question":"q","workspace":"Ads","tables":["a"]}"#).unwrap();
        assert_eq!(req.forced_workspace.as_deref(), Some("Ads"));
        assert_eq!(req.forced_tables, vec!["a"]);
    }

    #[test]
    fn trail_lookup_by_stage() {
        let mut trail = DebugTrail::default();
        for stage in [Stage::Enhance, Stage::ColumnPrune, Stage::ColumnPrune] {
            trail.push(TraceEntry {
                stage,
                source: ReplySource::Heuristic,
                exchanges: vec![],
                detail: serde_json::Value::Null,
            });
        }
        assert_eq!(trail.entries_for(Stage::ColumnPrune).count(), 2);
        assert!(trail.first(Stage::Repair).is_none());
        assert_eq!(trail.stages()[0], Stage::Enhance);
    }
}
