//! Deterministic answers used in dry-run mode and as the last fallback.
//!
//! Same inputs, same outputs; no model, no clock, no randomness.

use qgpt_types::TableSchema;
use regex::Regex;

/// Tables whose id starts with this are never proposed heuristically.
pub const RESERVED_PREFIX: &str = "__";

/// Lowercased word tokens of `text`. Separators are anything but letters,
/// digits and `_`; empty tokens are dropped.
pub fn question_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

static_regex!(mobility_keywords, r"\b(?:trip|driver|ride|fare)");
static_regex!(ads_keywords, r"\b(?:ads?\b|campaign|click|impression|spend|ctr\b)");
static_regex!(core_services_keywords, r"\b(?:user|session|signup|cohort|retention)");

fn workspace_keywords() -> [(&'static str, &'static Regex); 3] {
    [
        ("Mobility", mobility_keywords()),
        ("Ads", ads_keywords()),
        ("CoreServices", core_services_keywords()),
    ]
}

/// Keyword categories intersected with `candidates` (candidate order kept,
/// names compared case-insensitively). Falls back to the first candidate.
pub fn heuristic_workspaces(question: &str, candidates: &[String], max: usize) -> Vec<String> {
    let text = question.to_lowercase();
    let hits: Vec<&str> = workspace_keywords()
        .iter()
        .filter(|(_, re)| re.is_match(&text))
        .map(|(name, _)| *name)
        .collect();

    let mut picks: Vec<String> = candidates
        .iter()
        .filter(|c| hits.iter().any(|h| h.eq_ignore_ascii_case(c)))
        .cloned()
        .collect();
    if picks.is_empty() {
        picks.extend(candidates.iter().take(1).cloned());
    }
    picks.truncate(max);
    picks
}

/// Scores each table id by how many question tokens it contains, best first,
/// ties broken by id.
pub fn heuristic_tables(question: &str, candidates: &[String], top_k: usize) -> Vec<String> {
    let tokens = question_tokens(question);
    let mut scored: Vec<(usize, &String)> = candidates
        .iter()
        .map(|id| {
            let lower = id.to_lowercase();
            (tokens.iter().filter(|t| lower.contains(t.as_str())).count(), id)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    let picks: Vec<String> = scored
        .into_iter()
        .map(|(_, id)| id)
        .filter(|id| !id.starts_with(RESERVED_PREFIX))
        .take(top_k)
        .cloned()
        .collect();
    if picks.is_empty() {
        return candidates.iter().take(top_k).cloned().collect();
    }
    picks
}

/// Columns whose name contains a question token, in declaration order. With no
/// match, the leading columns. Never more than `cap`.
pub fn heuristic_columns(question: &str, schema: &TableSchema, cap: usize) -> Vec<String> {
    let tokens = question_tokens(question);
    let matched: Vec<&str> = schema
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| {
            let lower = name.to_lowercase();
            tokens.iter().any(|t| lower.contains(t.as_str()))
        })
        .collect();
    let keep = if matched.is_empty() {
        schema.column_names()
    } else {
        matched
    };
    keep.into_iter().take(cap).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qgpt_types::Column;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn schema(cols: &[&str]) -> TableSchema {
        TableSchema {
            table_id: "mobility.trips".into(),
            description: String::new(),
            columns: cols
                .iter()
                .map(|n| Column {
                    name: n.to_string(),
                    data_type: "text".into(),
                    description: String::new(),
                })
                .collect(),
            partition_info: None,
        }
    }

    #[test]
    fn ride_selects_mobility() {
        let picks = heuristic_workspaces("Average ride length?", &names(&["Mobility", "Ads"]), 2);
        assert_eq!(picks, vec!["Mobility"]);
    }

    #[test]
    fn workspace_match_respects_candidates_and_cap() {
        let cands = names(&["CoreServices", "Ads", "Mobility"]);
        let picks = heuristic_workspaces("driver signups by campaign", &cands, 2);
        assert_eq!(picks, vec!["CoreServices", "Ads"]);

        let only_ads = names(&["Ads"]);
        assert_eq!(heuristic_workspaces("trips per driver", &only_ads, 2), vec!["Ads"]);
    }

    #[test]
    fn every_keyword_category_can_fire() {
        let cands = names(&["Mobility", "Ads", "CoreServices"]);
        assert_eq!(heuristic_workspaces("fare totals", &cands, 3), vec!["Mobility"]);
        assert_eq!(heuristic_workspaces("ctr by day", &cands, 3), vec!["Ads"]);
        assert_eq!(heuristic_workspaces("retention curve", &cands, 3), vec!["CoreServices"]);
    }

    #[test]
    fn ads_keyword_does_not_fire_inside_other_words() {
        let cands = names(&["Finance", "Ads"]);
        assert_eq!(heuristic_workspaces("what was added last week", &cands, 2), vec!["Finance"]);
    }

    #[test]
    fn empty_question_defaults_everywhere() {
        assert_eq!(heuristic_workspaces("", &names(&["A", "B"]), 2), vec!["A"]);
        assert!(heuristic_workspaces("", &[], 2).is_empty());
        assert_eq!(heuristic_tables("", &names(&["b.t", "a.t", "c.t", "d.t"]), 3), vec!["a.t", "b.t", "c.t"]);
        assert_eq!(heuristic_columns("", &schema(&["x", "y"]), 15), vec!["x", "y"]);
    }

    #[test]
    fn tables_ordered_by_score_then_id() {
        let cands = names(&["mobility.driver_payments", "mobility.trips", "ads.campaigns"]);
        let picks = heuristic_tables("trips by driver in mobility", &cands, 3);
        assert_eq!(picks, vec!["mobility.driver_payments", "mobility.trips", "ads.campaigns"]);
    }

    #[test]
    fn reserved_tables_are_dropped_unless_nothing_remains() {
        let cands = names(&["__staging.trips", "mobility.trips"]);
        assert_eq!(heuristic_tables("trips", &cands, 3), vec!["mobility.trips"]);

        let reserved_only = names(&["__a", "__b"]);
        assert_eq!(heuristic_tables("trips", &reserved_only, 1), vec!["__a"]);
    }

    #[test]
    fn table_match_is_case_insensitive() {
        let cands = names(&["Mobility.Trips", "ads.campaigns"]);
        assert_eq!(heuristic_tables("TRIPS", &cands, 1), vec!["Mobility.Trips"]);
    }

    #[test]
    fn columns_are_a_capped_subset_in_declaration_order() {
        let s = schema(&["trip_id", "City", "status", "fare_amount", "driver_id"]);
        let keep = heuristic_columns("fare per city and trip", &s, 2);
        assert_eq!(keep, vec!["trip_id", "City"]);

        let many: Vec<String> = (0..40).map(|i| format!("c{i}")).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        let keep = heuristic_columns("nothing matches", &schema(&refs), 15);
        assert_eq!(keep.len(), 15);
        assert_eq!(keep[0], "c0");
    }

    #[test]
    fn tokens_split_on_non_word_characters() {
        assert_eq!(question_tokens("How many trips?  Seattle,WA"), vec!["how", "many", "trips", "seattle", "wa"]);
        assert!(question_tokens("?!").is_empty());
    }
}
