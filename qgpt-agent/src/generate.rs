use qgpt_infer::{chat_with_timeout, ModelError};
use qgpt_types::{ChatMessage, Exchange, ReplySource, SqlExample, TableSchema};
use tracing::debug;

use crate::protocol::Protocol;

/// Dry-run generation output.
pub const STUB_SQL: &str = "SELECT city, count(*) AS trips FROM mobility.trips GROUP BY 1 ORDER BY 2 DESC;";
pub const STUB_EXPLANATION: &str = "Counts trips by city using stub generator";
/// Explanation used when the model answer has no `Explanation:` section.
pub const MISSING_EXPLANATION: &str = "No separate explanation was returned.";

const SYSTEM_PROMPT: &str = "You are SQL Generator.";

const BUSINESS_RULES: &str = "\
- Dialect: PostgreSQL.
- Do not invent tables or columns. Use only provided schemas.
- Always include explicit column lists, avoid SELECT *.
- Include sensible date filters if question implies recency.
- Use partition columns in filters when present.
- Return two sections: \"SQL:\" then \"Explanation:\".";

pub struct GenerationInput<'a> {
    pub question: &'a str,
    pub enhanced_question: &'a str,
    pub pruned_schemas: &'a [TableSchema],
    pub examples: &'a [SqlExample],
    pub workspaces: &'a [String],
    pub dry_run: bool,
}

pub struct RepairInput<'a> {
    pub sql: &'a str,
    pub explanation: &'a str,
    pub errors: &'a [String],
    pub pruned_schemas: &'a [TableSchema],
    pub question: &'a str,
    pub dry_run: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedSql {
    pub sql: String,
    pub explanation: String,
    /// `None` in dry-run.
    pub exchange: Option<Exchange>,
    pub source: ReplySource,
}

/// Writes and repairs SQL. Neither call has a fallback: transport failures
/// and timeouts go back to the caller.
#[derive(Clone)]
pub struct SqlGenerator {
    protocol: Protocol,
}

impl SqlGenerator {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    pub async fn generate(&self, input: GenerationInput<'_>) -> Result<GeneratedSql, ModelError> {
        if input.dry_run {
            return Ok(GeneratedSql {
                sql: STUB_SQL.to_string(),
                explanation: STUB_EXPLANATION.to_string(),
                exchange: None,
                source: ReplySource::Heuristic,
            });
        }

        let prompt = generation_prompt(&input);
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt.clone())];
        let raw = chat_with_timeout(self.protocol.client(), &messages, self.protocol.timeout()).await?;
        let (sql, explanation) = split_sql_and_explanation(&raw);
        debug!(bytes = raw.len(), "sql generated");
        Ok(GeneratedSql {
            sql,
            explanation,
            exchange: Some(Exchange { prompt, response: raw }),
            source: ReplySource::Model,
        })
    }

    pub async fn repair(&self, input: RepairInput<'_>) -> Result<GeneratedSql, ModelError> {
        if input.dry_run {
            return Ok(GeneratedSql {
                sql: input.sql.to_string(),
                explanation: format!("{} (stub repair)", input.explanation),
                exchange: None,
                source: ReplySource::Heuristic,
            });
        }

        let prompt = repair_prompt(&input);
        let messages = [ChatMessage::user(prompt.clone())];
        let raw = chat_with_timeout(self.protocol.client(), &messages, self.protocol.timeout()).await?;
        let (sql, explanation) = split_sql_and_explanation(&raw);
        debug!(errors = input.errors.len(), "sql repaired");
        Ok(GeneratedSql {
            sql,
            explanation,
            exchange: Some(Exchange { prompt, response: raw }),
            source: ReplySource::Repaired,
        })
    }
}

fn format_schemas(schemas: &[TableSchema]) -> String {
    schemas
        .iter()
        .map(|s| {
            let cols: Vec<String> = s.columns.iter().map(|c| format!("{} ({})", c.name, c.data_type)).collect();
            let partition = s
                .partition_info
                .as_deref()
                .map(|p| format!(" partition: {p}"))
                .unwrap_or_default();
            format!("- {}{}\n  Columns: {}", s.table_id, partition, cols.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_examples(examples: &[SqlExample]) -> String {
    if examples.is_empty() {
        return "None".to_string();
    }
    examples
        .iter()
        .map(|ex| format!("Example {} ({}): {}\n{}", ex.id, ex.workspace, ex.description, ex.sql))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn generation_prompt(input: &GenerationInput<'_>) -> String {
    format!(
        "You generate SQL for analytics questions.\n\
         Workspaces: {workspaces}\n\
         Business rules:\n{BUSINESS_RULES}\n\n\
         Schemas (only these are allowed):\n{schemas}\n\n\
         Few shot SQL examples (they may inspire style and joins):\n{examples}\n\n\
         Original question: {question}\n\
         Enhanced question: {enhanced}\n\n\
         Produce:\n\
         SQL: <query>\n\
         Explanation: <short explanation of logic and filters>\n",
        workspaces = input.workspaces.join(", "),
        schemas = format_schemas(input.pruned_schemas),
        examples = format_examples(input.examples),
        question = input.question,
        enhanced = input.enhanced_question,
    )
}

fn repair_prompt(input: &RepairInput<'_>) -> String {
    format!(
        "The previous SQL had issues: {errors}.\n\
         Fix the SQL. Use only provided schemas. Keep the same intent.\n\
         Schemas:\n{schemas}\n\
         Question: {question}\n\
         Return the same two sections: SQL: then Explanation:\n\
         Previous SQL:\n{sql}\n",
        errors = input.errors.join("; "),
        schemas = format_schemas(input.pruned_schemas),
        question = input.question,
        sql = input.sql,
    )
}

static_regex!(opening_fence, r"(?i)\A```(?:sql)?");
static_regex!(sections, r"(?is)SQL:\s*(.+?)Explanation:\s*(.+)");

fn strip_fences(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(m) = opening_fence().find(text) {
        text = &text[m.end()..];
    }
    text.trim_end_matches('`')
}

/// Splits a model answer into `(sql, explanation)`.
///
/// Looks for an `SQL:` section followed by an `Explanation:` section. Without
/// both, the whole answer (fences stripped) is the SQL and the explanation is
/// [`MISSING_EXPLANATION`].
pub fn split_sql_and_explanation(raw: &str) -> (String, String) {
    let text = strip_fences(raw);
    if let Some(caps) = sections().captures(text) {
        let sql = strip_fences(&caps[1]).trim().to_string();
        let explanation = caps[2].trim().to_string();
        return (sql, explanation);
    }
    (text.trim().to_string(), MISSING_EXPLANATION.to_string())
}
