use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use qgpt_core::{Pipeline, Settings};
use qgpt_receipts::{tail, verify_log, ReceiptLog};
use qgpt_store::{Catalog, FixtureDir};
use qgpt_types::{PipelineResult, QueryRequest};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "qgpt.yml";

#[derive(Parser)]
#[command(name = "qgpt", about = "Turn an analytics question into schema-checked SQL")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Question text; may also be given with --question or piped on stdin.
    #[arg(value_name = "QUESTION")]
    words: Vec<String>,

    #[arg(short, long)]
    question: Option<String>,

    /// Skip workspace selection.
    #[arg(short, long)]
    workspace: Option<String>,

    /// Skip table selection, comma separated.
    #[arg(short, long, value_delimiter = ',')]
    tables: Vec<String>,

    /// Catalog directory (workspaces.yml, schemas.yml, sql_examples.yml).
    #[arg(long, global = true)]
    fixtures: Option<PathBuf>,

    /// Settings file; missing file means defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// No model calls: heuristics and stub SQL only.
    #[arg(long)]
    dry_run: bool,

    /// Verbose logs on stderr and the debug trail as JSON on stdout.
    #[arg(long, global = true)]
    debug: bool,

    /// Append a run receipt to this log.
    #[arg(long)]
    receipts: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize the loaded catalog.
    Catalog,
    Receipts {
        #[command(subcommand)]
        action: ReceiptCommand,
        #[arg(long, default_value = "./receipts.jsonl")]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum ReceiptCommand {
    Tail {
        #[arg(long, default_value_t = 10)]
        lines: usize,
    },
    Verify,
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "warn" };
    let filter = if debug {
        EnvFilter::new(fallback)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// First non-blank of: the flag, the positional words, piped stdin.
fn resolve_question(flag: Option<String>, words: &[String], piped: Option<String>) -> Option<String> {
    let joined = words.join(" ");
    [flag, Some(joined), piped]
        .into_iter()
        .flatten()
        .map(|q| q.trim().to_string())
        .find(|q| !q.is_empty())
}

fn read_piped_stdin() -> anyhow::Result<Option<String>> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut text = String::new();
    stdin.read_to_string(&mut text).context("reading question from stdin")?;
    Ok(Some(text))
}

fn load_catalog(settings: &Settings, explicit: Option<&std::path::Path>) -> anyhow::Result<Catalog> {
    let dir = settings.fixtures_dir(explicit);
    Catalog::load(&FixtureDir::new(&dir)).with_context(|| format!("loading catalog from {}", dir.display()))
}

fn print_result(result: &PipelineResult) {
    println!("Workspaces: {}", result.selected_workspaces.join(", "));
    println!("Tables: {}", result.confirmed_tables.join(", "));
    if !result.few_shot_examples.is_empty() {
        println!("Examples: {}", result.few_shot_examples.join(", "));
    }
    println!();
    println!("SQL:\n{}", result.generated_sql);
    println!();
    println!("Explanation: {}", result.explanation);
    println!();
    println!("(SQL not executed)");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let settings = Settings::load_or_default(Some(config_path.as_path()))?;

    match cli.command {
        Some(Command::Catalog) => {
            let catalog = load_catalog(&settings, cli.fixtures.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&catalog.summary())?);
            return Ok(());
        }
        Some(Command::Receipts { action, path }) => {
            match action {
                ReceiptCommand::Tail { lines } => {
                    for receipt in tail(&path, lines)? {
                        println!("{}", serde_json::to_string(&receipt)?);
                    }
                }
                ReceiptCommand::Verify => {
                    let n = verify_log(&path)?;
                    println!("receipt log ok ({n} receipts)");
                }
            }
            return Ok(());
        }
        None => {}
    }

    let piped = if cli.question.is_none() && cli.words.is_empty() {
        read_piped_stdin()?
    } else {
        None
    };
    let Some(question) = resolve_question(cli.question, &cli.words, piped) else {
        eprintln!("{}", Cli::command().render_usage());
        eprintln!("error: no question given (argument, --question or stdin)");
        std::process::exit(1);
    };

    let catalog = Arc::new(load_catalog(&settings, cli.fixtures.as_deref())?);
    let pipeline = Pipeline::from_settings(&settings, catalog, cli.dry_run);
    let request = QueryRequest {
        question,
        forced_workspace: cli.workspace,
        forced_tables: cli.tables,
    };
    let result = pipeline.run(&request).await?;

    print_result(&result);
    if !result.validation.valid {
        eprintln!("validation errors: {}", result.validation.errors.join("; "));
    }
    if result.repaired {
        let after = pipeline.recheck(&result);
        if !after.valid {
            tracing::warn!(errors = ?after.errors, "repaired SQL still fails validation");
            eprintln!("warning: repaired SQL still fails validation: {}", after.errors.join("; "));
        }
    }
    if cli.debug {
        println!("{}", serde_json::to_string_pretty(&result.debug)?);
    }
    if let Some(path) = cli.receipts {
        let log = ReceiptLog::open(&path)?;
        log.record(&result)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flag_wins_over_words_and_stdin() {
        let q = resolve_question(Some("flag".into()), &words(&["pos"]), Some("piped".into()));
        assert_eq!(q.as_deref(), Some("flag"));
    }

    #[test]
    fn words_are_joined() {
        let q = resolve_question(None, &words(&["trips", "per", "city"]), None);
        assert_eq!(q.as_deref(), Some("trips per city"));
    }

    #[test]
    fn blank_sources_are_skipped() {
        let q = resolve_question(Some("  ".into()), &[], Some("from stdin\n".into()));
        assert_eq!(q.as_deref(), Some("from stdin"));
        assert!(resolve_question(None, &[], Some("\n".into())).is_none());
    }

    #[test]
    fn parses_overrides() {
        let cli = Cli::try_parse_from(["qgpt", "--tables", "a.b,c.d", "-w", "Ads", "--dry-run", "ctr", "today"]).unwrap();
        assert_eq!(cli.tables, vec!["a.b", "c.d"]);
        assert_eq!(cli.workspace.as_deref(), Some("Ads"));
        assert!(cli.dry_run);
        assert_eq!(cli.words, vec!["ctr", "today"]);
        assert!(cli.question.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_receipt_subcommand() {
        let cli = Cli::try_parse_from(["qgpt", "receipts", "--path", "r.jsonl", "tail", "--lines", "3"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Receipts { action: ReceiptCommand::Tail { lines: 3 }, .. })
        ));
    }
}
