//! Model-backed pipeline agents.
//!
//! Every agent follows the same contract (see [`protocol`]): prompt, strict
//! JSON decode, one repair request, then a deterministic heuristic. In dry-run
//! mode the model is never called and the heuristic answers directly.
//!
//! Transport failures are not part of that contract: they come back as
//! `ModelError` and the caller decides.

macro_rules! static_regex {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static regex::Regex {
            static CELL: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
            CELL.get_or_init(|| regex::Regex::new($pat).expect("static regex"))
        }
    };
}

pub mod protocol;
pub use protocol::{AgentReply, Decoded, Protocol};

pub mod heuristics;

pub mod workspace;
pub use workspace::{WorkspaceAgent, WorkspaceChoice};

pub mod tables;
pub use tables::{TableAgent, TableChoice};

pub mod columns;
pub use columns::{ColumnAgent, ColumnChoice};

pub mod enhance;
pub use enhance::PromptEnhancer;

pub mod generate;
pub use generate::{split_sql_and_explanation, GeneratedSql, GenerationInput, RepairInput, SqlGenerator};

/// `reason` attached to dry-run answers.
pub const REASON_HEURISTIC: &str = "heuristic";
/// `reason` attached when both model answers were unusable.
pub const REASON_FALLBACK: &str = "fallback";
