//! Pipeline orchestrator: question in, schema-constrained SQL plus a full
//! audit trail out.
//!
//! Stages run strictly in sequence: enhance, workspaces, tables, column
//! pruning, few-shot retrieval, generation, validation, and at most one
//! repair. Each stage appends to the [`DebugTrail`] in that order.

use std::sync::Arc;
use std::time::Duration;

use qgpt_agent::{
    AgentReply, ColumnAgent, GenerationInput, PromptEnhancer, Protocol, RepairInput, SqlGenerator, TableAgent,
    WorkspaceAgent,
};
use qgpt_infer::{ModelClient, ModelError};
use qgpt_store::{Catalog, VectorIndex};
use qgpt_types::{
    DebugTrail, PipelineResult, QueryRequest, ReplySource, SqlExample, Stage, TableSchema, TraceEntry,
    ValidationReport,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod config;
pub use config::{ModelSettings, PipelineSettings, Settings, SettingsError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{} stage failed: {source}", .stage.as_str())]
    Model {
        stage: Stage,
        #[source]
        source: ModelError,
    },
    #[error("embedding backend returned {got} vectors for {expected} texts")]
    EmbeddingCount { expected: usize, got: usize },
}

fn at(stage: Stage) -> impl FnOnce(ModelError) -> PipelineError {
    move |source| PipelineError::Model { stage, source }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Skip every model call and answer with heuristics and stubs.
    pub dry_run: bool,
    pub table_top_k: usize,
    pub column_cap: usize,
    pub example_top_k: usize,
    pub max_workspaces: usize,
    /// Deadline for each individual model call.
    pub model_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            table_top_k: 3,
            column_cap: 15,
            example_top_k: 5,
            max_workspaces: 2,
            model_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Pipeline {
    catalog: Arc<Catalog>,
    client: Arc<dyn ModelClient>,
    config: PipelineConfig,
    enhancer: PromptEnhancer,
    workspaces: WorkspaceAgent,
    tables: TableAgent,
    columns: ColumnAgent,
    generator: SqlGenerator,
}

fn entry<T>(stage: Stage, reply: &AgentReply<T>, detail: serde_json::Value) -> TraceEntry {
    TraceEntry {
        stage,
        source: reply.source,
        exchanges: reply.exchanges.clone(),
        detail,
    }
}

impl Pipeline {
    pub fn new(catalog: Arc<Catalog>, client: Arc<dyn ModelClient>, config: PipelineConfig) -> Self {
        let protocol = Protocol::new(client.clone(), config.model_timeout);
        Self {
            catalog,
            client,
            config,
            enhancer: PromptEnhancer::new(protocol.clone()),
            workspaces: WorkspaceAgent::new(protocol.clone()),
            tables: TableAgent::new(protocol.clone()),
            columns: ColumnAgent::new(protocol.clone()),
            generator: SqlGenerator::new(protocol),
        }
    }

    /// Pipeline configured from a settings file. `force_dry_run` can only turn
    /// dry-run on, never off.
    pub fn from_settings(settings: &Settings, catalog: Arc<Catalog>, force_dry_run: bool) -> Self {
        let mut config = settings.pipeline_config();
        config.dry_run |= force_dry_run;
        let client = settings.model_client(config.dry_run);
        Self::new(catalog, client, config)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Dry-run when configured so or when the backend is an offline stand-in.
    pub fn dry_run(&self) -> bool {
        self.config.dry_run || self.client.is_offline()
    }

    pub async fn run(&self, request: &QueryRequest) -> Result<PipelineResult, PipelineError> {
        let dry_run = self.dry_run();
        let question = request.question.as_str();
        let mut trail = DebugTrail::default();
        info!(dry_run, "pipeline run started");

        let enhanced = self.enhancer.enhance(question, dry_run).await;
        trail.push(entry(Stage::Enhance, &enhanced, json!({ "expanded": enhanced.value.expanded })));
        let enhanced = enhanced.value;

        let selected_workspaces = self.select_workspaces(request, dry_run, &mut trail).await?;

        let candidates: Vec<String> = self
            .catalog
            .tables_for(&selected_workspaces)
            .into_iter()
            .map(|t| t.table_id.clone())
            .collect();
        let proposed_tables = self.select_tables(request, &candidates, dry_run, &mut trail).await?;
        let confirmed_tables = proposed_tables.clone();

        let pruned_schemas = self.prune_columns(question, &confirmed_tables, dry_run, &mut trail).await?;

        let examples = self.retrieve_examples(question, &selected_workspaces, dry_run, &mut trail).await?;

        let generated = self
            .generator
            .generate(GenerationInput {
                question,
                enhanced_question: &enhanced.expanded,
                pruned_schemas: &pruned_schemas,
                examples: &examples,
                workspaces: &selected_workspaces,
                dry_run,
            })
            .await
            .map_err(at(Stage::Generation))?;
        trail.push(TraceEntry {
            stage: Stage::Generation,
            source: generated.source,
            exchanges: generated.exchange.iter().cloned().collect(),
            detail: json!({ "sql": generated.sql, "explanation": generated.explanation }),
        });

        let validation = qgpt_validator::validate(&generated.sql, &pruned_schemas);
        trail.push(TraceEntry {
            stage: Stage::Validation,
            source: ReplySource::Check,
            exchanges: Vec::new(),
            detail: json!({ "valid": validation.valid, "errors": validation.errors }),
        });

        let mut sql = generated.sql;
        let mut explanation = generated.explanation;
        let mut repaired = false;
        if !validation.valid && !dry_run {
            warn!(errors = ?validation.errors, "generated SQL failed validation, requesting one repair");
            let fixed = self
                .generator
                .repair(RepairInput {
                    sql: &sql,
                    explanation: &explanation,
                    errors: &validation.errors,
                    pruned_schemas: &pruned_schemas,
                    question,
                    dry_run,
                })
                .await
                .map_err(at(Stage::Repair))?;
            trail.push(TraceEntry {
                stage: Stage::Repair,
                source: fixed.source,
                exchanges: fixed.exchange.iter().cloned().collect(),
                detail: json!({ "sql": fixed.sql, "explanation": fixed.explanation }),
            });
            sql = fixed.sql;
            explanation = fixed.explanation;
            repaired = true;
        }

        info!(
            valid = validation.valid,
            repaired,
            model_calls = trail.exchange_count(),
            "pipeline run finished"
        );
        Ok(PipelineResult {
            question: question.to_string(),
            enhanced,
            selected_workspaces,
            proposed_tables,
            confirmed_tables,
            pruned_schemas,
            few_shot_examples: examples.into_iter().map(|ex| ex.id).collect(),
            generated_sql: sql,
            explanation,
            validation,
            repaired,
            debug: trail,
        })
    }

    /// Validates the final SQL of a finished run against its pruned schemas.
    /// `run` never does this for repaired SQL.
    pub fn recheck(&self, result: &PipelineResult) -> ValidationReport {
        qgpt_validator::validate(&result.generated_sql, &result.pruned_schemas)
    }

    async fn select_workspaces(
        &self,
        request: &QueryRequest,
        dry_run: bool,
        trail: &mut DebugTrail,
    ) -> Result<Vec<String>, PipelineError> {
        let forced = request
            .forced_workspace
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty());
        if let Some(ws) = forced {
            trail.push(TraceEntry {
                stage: Stage::Workspaces,
                source: ReplySource::Forced,
                exchanges: Vec::new(),
                detail: json!({ "workspaces": [ws] }),
            });
            return Ok(vec![ws.to_string()]);
        }

        let names = self.catalog.workspace_names();
        let reply = self
            .workspaces
            .select(&request.question, &names, self.config.max_workspaces, dry_run)
            .await
            .map_err(at(Stage::Workspaces))?;
        let mut chosen = reply.value.workspaces.clone();
        if chosen.is_empty() {
            chosen = names.into_iter().take(1).collect();
        }
        trail.push(entry(
            Stage::Workspaces,
            &reply,
            json!({ "workspaces": chosen, "reason": reply.value.reason }),
        ));
        Ok(chosen)
    }

    async fn select_tables(
        &self,
        request: &QueryRequest,
        candidates: &[String],
        dry_run: bool,
        trail: &mut DebugTrail,
    ) -> Result<Vec<String>, PipelineError> {
        let forced: Vec<String> = request
            .forced_tables
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if !forced.is_empty() {
            trail.push(TraceEntry {
                stage: Stage::Tables,
                source: ReplySource::Forced,
                exchanges: Vec::new(),
                detail: json!({ "tables": forced, "candidates": candidates }),
            });
            return Ok(forced);
        }

        let top_k = self.config.table_top_k;
        let reply = self
            .tables
            .propose(&request.question, candidates, top_k, dry_run)
            .await
            .map_err(at(Stage::Tables))?;
        let mut tables = reply.value.tables.clone();
        if tables.is_empty() {
            tables = candidates.iter().take(top_k).cloned().collect();
        }
        trail.push(entry(
            Stage::Tables,
            &reply,
            json!({ "tables": tables, "candidates": candidates, "reason": reply.value.reason }),
        ));
        Ok(tables)
    }

    async fn prune_columns(
        &self,
        question: &str,
        tables: &[String],
        dry_run: bool,
        trail: &mut DebugTrail,
    ) -> Result<Vec<TableSchema>, PipelineError> {
        let cap = self.config.column_cap;
        let mut pruned = Vec::with_capacity(tables.len());
        for id in tables {
            let Some(schema) = self.catalog.table_by_id(id) else {
                debug!(table = %id, "table not in catalog, skipping");
                continue;
            };
            let reply = self
                .columns
                .prune(question, schema, cap, dry_run)
                .await
                .map_err(at(Stage::ColumnPrune))?;
            trail.push(entry(
                Stage::ColumnPrune,
                &reply,
                json!({
                    "table_id": reply.value.table_id,
                    "keep_columns": reply.value.keep_columns,
                    "reason": reply.value.reason,
                }),
            ));
            pruned.push(schema.pruned(&reply.value.keep_columns, cap));
        }
        Ok(pruned)
    }

    async fn retrieve_examples(
        &self,
        question: &str,
        workspaces: &[String],
        dry_run: bool,
        trail: &mut DebugTrail,
    ) -> Result<Vec<SqlExample>, PipelineError> {
        let pool = self.catalog.examples_for(workspaces);
        if pool.is_empty() {
            trail.push(TraceEntry {
                stage: Stage::FewShot,
                source: ReplySource::Check,
                exchanges: Vec::new(),
                detail: json!({ "examples": [], "skipped": "no curated examples for selected workspaces" }),
            });
            return Ok(Vec::new());
        }

        let mut texts = Vec::with_capacity(pool.len() + 1);
        texts.push(question.to_string());
        texts.extend(pool.iter().map(|ex| ex.description.clone()));
        let vectors = self.embed(&texts, dry_run).await?;
        if vectors.len() != texts.len() {
            return Err(PipelineError::EmbeddingCount {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        let mut vectors = vectors.into_iter();
        let query = vectors.next().unwrap_or_default();

        // Fresh per run: nothing indexed here outlives this question.
        let mut index = VectorIndex::new();
        for (ex, vector) in pool.iter().zip(vectors) {
            index.add(ex.id.clone(), vector, *ex);
        }
        let hits = index.query(&query, self.config.example_top_k);
        let scored: Vec<serde_json::Value> = hits.iter().map(|h| json!({ "id": h.id, "score": h.score })).collect();
        let picked: Vec<SqlExample> = hits.iter().map(|h| (*h.metadata).clone()).collect();

        trail.push(TraceEntry {
            stage: Stage::FewShot,
            source: if dry_run { ReplySource::Heuristic } else { ReplySource::Model },
            exchanges: Vec::new(),
            detail: json!({ "embedded_texts": texts.len(), "examples": scored }),
        });
        Ok(picked)
    }

    async fn embed(&self, texts: &[String], dry_run: bool) -> Result<Vec<Vec<f32>>, PipelineError> {
        if dry_run {
            return Ok(qgpt_embed::embed_all(texts, qgpt_embed::DEFAULT_DIM));
        }
        let limit = self.config.model_timeout;
        match tokio::time::timeout(limit, self.client.embed(texts)).await {
            Ok(res) => res.map_err(at(Stage::FewShot)),
            Err(_) => Err(at(Stage::FewShot)(ModelError::Timeout(limit))),
        }
    }
}
