//! Lexical SQL allowlist check.
//!
//! Confirms generated SQL only touches the tables and columns of the pruned
//! schemas it was generated from. This is a token-level scan, not a parser:
//! it catches invented tables and columns across dialects, and misses
//! anything semantic (a wrong but allowed join passes).

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use qgpt_types::{TableSchema, ValidationReport};
use regex::Regex;

pub const MISSING_SELECT: &str = "SQL missing SELECT";

/// Words that can follow a table name without being its alias.
const CLAUSE_WORDS: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "outer", "cross", "natural", "lateral",
    "on", "using", "group", "order", "limit", "offset", "having", "union", "intersect", "except",
    "window", "select", "from", "and", "or", "when", "then", "else", "end", "fetch", "for",
    "returning", "into", "set", "values", "tablesample", "qualify",
];

macro_rules! static_regex {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static CELL: OnceLock<Regex> = OnceLock::new();
            CELL.get_or_init(|| Regex::new($pat).expect("static regex"))
        }
    };
}

static_regex!(explanation_marker, r"(?im)^[ \t]*explanation\s*:(?:[^:]|$)");
static_regex!(sql_label, r"(?i)^sql\s*:\s*");
static_regex!(leading_fence, r"^```[A-Za-z]*\s*");
static_regex!(trailing_fence, r"\s*```+\s*$");
static_regex!(select_start, r"^\s*(?:with|select)\b");
static_regex!(table_ref, r"\b(?:from|join)\s+([a-z_][a-z0-9_.$]*)");
static_regex!(derived_ref, r"\b(?:from|join)\s*\(");
static_regex!(alias_after, r"^\s+(?:as\s+)?([a-z_][a-z0-9_]*)");
static_regex!(
    function_argument,
    r"(?:\b(?:extract|substring|trim|overlay|position)\s*\([^()]*|\bis\s+(?:not\s+)?distinct\s+)$"
);
static_regex!(cte_name, r"(?:\bwith\s+(?:recursive\s+)?|,\s*)([a-z_][a-z0-9_]*)\s+as\s*\(");
static_regex!(
    column_ref,
    r"\b([a-z_][a-z0-9_]*(?:\.[a-z_][a-z0-9_]*)*)\.([a-z_][a-z0-9_]*)\b"
);

/// Tables and columns a statement may reference, keyed case-insensitively.
#[derive(Clone, Debug, Default)]
pub struct Allowlist {
    tables: HashMap<String, HashSet<String>>,
}

impl Allowlist {
    pub fn from_schemas(schemas: &[TableSchema]) -> Self {
        let tables = schemas
            .iter()
            .map(|s| {
                let cols = s.columns.iter().map(|c| c.name.to_lowercase()).collect();
                (s.table_id.to_lowercase(), cols)
            })
            .collect();
        Self { tables }
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn columns(&self, table: &str) -> Option<&HashSet<String>> {
        self.tables.get(table)
    }
}

/// Validate `sql` against the pruned schemas it was generated from.
///
/// Every check runs; errors accumulate and come back deduplicated.
pub fn validate(sql: &str, pruned: &[TableSchema]) -> ValidationReport {
    let allow = Allowlist::from_schemas(pruned);
    let text = scrub(&clean_sql(sql)).to_lowercase();
    let mut errors = Vec::new();

    if !select_start().is_match(&text) {
        errors.push(MISSING_SELECT.to_string());
    }

    // Only a CTE can stand in for a table in FROM/JOIN. A subquery alias
    // only qualifies columns.
    let ctes: HashSet<String> = cte_name()
        .captures_iter(&text)
        .map(|c| c[1].to_string())
        .collect();
    let mut local = ctes.clone();
    local.extend(derived_aliases(&text));

    let mut referenced: HashSet<String> = HashSet::new();
    let mut aliases: HashMap<String, String> = HashMap::new();
    for (table, alias) in table_refs(&text) {
        if !ctes.contains(&table) && !allow.has_table(&table) {
            errors.push(format!("Table {table} not allowed"));
        }
        if let Some(alias) = alias {
            aliases.insert(alias, table.clone());
        }
        referenced.insert(table);
    }

    for caps in column_ref().captures_iter(&text) {
        let qualifier = &caps[1];
        let column = &caps[2];
        let dotted = format!("{qualifier}.{column}");
        // A schema-qualified table name, not a column.
        if referenced.contains(&dotted) || allow.has_table(&dotted) || local.contains(&dotted) {
            continue;
        }
        let table = aliases.get(qualifier).map(String::as_str).unwrap_or(qualifier);
        if local.contains(table) {
            continue;
        }
        match allow.columns(table) {
            Some(cols) if cols.contains(column) => {}
            Some(_) => errors.push(format!("Column {table}.{column} not allowed")),
            None => errors.push(format!("Table {table} not allowed for column {column}")),
        }
    }

    ValidationReport::from_errors(errors)
}

/// Strip what a model wraps around a statement: a trailing `Explanation:`
/// section, a leading `SQL:` label, and Markdown fences.
///
/// The section marker only counts at the start of a line and outside string
/// literals and comments.
pub fn clean_sql(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(m) = explanation_marker()
        .find_iter(text)
        .find(|m| scan(&text[..m.start()], |_| {}) == State::Code)
    {
        text = text[..m.start()].trim();
    }
    let text = sql_label().replace(text, "");
    let text = leading_fence().replace(text.trim(), "");
    let text = trailing_fence().replace(&text, "");
    text.trim().to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Code,
    Literal,
    LineComment,
    BlockComment,
}

/// Walks `sql` through literals and comments, handing every code character
/// (literals as `''`, comments as whitespace) to `emit`. Returns the state at
/// the end of the input.
fn scan(sql: &str, mut emit: impl FnMut(char)) -> State {
    let mut state = State::Code;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '\'' => {
                    state = State::Literal;
                    emit('\'');
                    emit('\'');
                }
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                    emit(' ');
                }
                '"' | '`' => {}
                _ => emit(c),
            },
            State::Literal => {
                if c == '\'' {
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                    } else {
                        state = State::Code;
                    }
                }
            }
            State::LineComment => {
                if c == '\n' {
                    emit('\n');
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                }
            }
        }
    }
    state
}

/// Blank out string literals and comments, drop identifier quotes.
fn scrub(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    scan(sql, |c| out.push(c));
    out
}

/// `(table, alias)` for every FROM/JOIN target that is a plain name.
fn table_refs(text: &str) -> Vec<(String, Option<String>)> {
    let mut refs = Vec::new();
    for caps in table_ref().captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if function_argument().is_match(&text[..whole.start()]) {
            continue;
        }
        let table = name.as_str().trim_end_matches('.').to_string();
        let alias = alias_after()
            .captures(&text[name.end()..])
            .map(|c| c[1].to_string())
            .filter(|a| !CLAUSE_WORDS.contains(&a.as_str()));
        refs.push((table, alias));
    }
    refs
}

/// Aliases given to parenthesised subqueries in FROM/JOIN position.
fn derived_aliases(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for m in derived_ref().find_iter(text) {
        let mut depth = 0usize;
        let mut close = None;
        for (i, c) in text[m.end() - 1..].char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(m.end() - 1 + i + 1);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(close) = close else { continue };
        if let Some(c) = alias_after().captures(&text[close..]) {
            if !CLAUSE_WORDS.contains(&&c[1]) {
                out.push(c[1].to_string());
            }
        }
    }
    out
}
