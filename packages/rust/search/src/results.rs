//! Mapping of SerpApi organic results into [`CandidateMatch`] records.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use specter_shared::{CandidateMatch, Fact};
use url::Url;

/// Ceiling for a keyword-derived confidence before the rank penalty.
const MAX_CONFIDENCE: f64 = 0.9;

/// Confidence every result starts from.
const BASE_CONFIDENCE: f64 = 0.5;

/// Confidence removed per position down the result list.
const RANK_PENALTY: f64 = 0.05;

/// Number of facts folded into a derived query.
const QUERY_FACTS: usize = 3;

/// Fallback description for results without a snippet.
const NO_DESCRIPTION: &str = "No description.";

/// The subset of a SerpApi response we consume.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub organic_results: Vec<OrganicResult>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One organic search hit.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct OrganicResult {
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub displayed_link: Option<String>,
}

/// Map organic results 1:1 into candidate matches, in result order.
///
/// With `require_class_action_terms`, results that do not read like a class
/// action (a mention of "class action" plus "lawsuit" or "settlement") are
/// dropped before ranking.
pub(crate) fn map_results(
    results: Vec<OrganicResult>,
    query: &str,
    require_class_action_terms: bool,
) -> Vec<CandidateMatch> {
    let terms = query_terms(query);

    results
        .into_iter()
        .filter(|r| !require_class_action_terms || is_class_action(r))
        .enumerate()
        .map(|(rank, r)| to_candidate(r, rank, &terms))
        .collect()
}

fn to_candidate(result: OrganicResult, rank: usize, terms: &[String]) -> CandidateMatch {
    let title = non_empty(result.title.as_deref()).map(collapse_whitespace);
    let description = non_empty(result.snippet.as_deref())
        .or_else(|| non_empty(result.description.as_deref()))
        .map(collapse_whitespace);
    let link = non_empty(result.link.as_deref()).map(str::to_string);

    let haystack = format!(
        "{} {}",
        title.as_deref().unwrap_or_default(),
        description.as_deref().unwrap_or_default()
    );

    let id = match (&link, result.position) {
        (Some(link), _) => link.clone(),
        (None, Some(position)) => position.to_string(),
        (None, None) => rank.to_string(),
    };

    CandidateMatch {
        id,
        name: title.unwrap_or_else(|| "Unknown Title".into()),
        description: description.unwrap_or_else(|| NO_DESCRIPTION.into()),
        confidence_score: confidence(&haystack, terms, rank),
        source: source_host(link.as_deref(), result.displayed_link.as_deref()),
        source_url: link,
        date_posted: extract_date(&haystack),
        member_count: extract_member_count(&haystack),
    }
}

/// Keyword-overlap confidence with a per-rank penalty, clamped to `[0, 1]`.
pub(crate) fn confidence(text: &str, terms: &[String], rank: usize) -> f64 {
    let lower = text.to_lowercase();
    let keyword_score = if terms.is_empty() {
        BASE_CONFIDENCE
    } else {
        let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
        BASE_CONFIDENCE + (matched as f64 / terms.len() as f64) * 0.4
    };
    (keyword_score.min(MAX_CONFIDENCE) - RANK_PENALTY * rank as f64).clamp(0.0, 1.0)
}

/// Lowercased, de-duplicated words of at least three characters.
fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
    {
        if !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

fn is_class_action(result: &OrganicResult) -> bool {
    let text = format!(
        "{} {}",
        result.title.as_deref().unwrap_or_default(),
        result.snippet.as_deref().unwrap_or_default()
    )
    .to_lowercase();
    text.contains("class action") && (text.contains("lawsuit") || text.contains("settlement"))
}

/// Extract a class size such as "12,500 members" from free text.
pub(crate) fn extract_member_count(text: &str) -> Option<u64> {
    static MEMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)(\d{1,3}(?:,\d{3})+|\d+)\s*(?:members?|plaintiffs?|claimants?)\b")
            .expect("valid regex")
    });
    MEMBER_RE
        .captures(text)
        .and_then(|caps| caps[1].replace(',', "").parse().ok())
}

/// Extract the first date-looking phrase (`4/26/2025`, `April 26, 2025`).
pub(crate) fn extract_date(text: &str) -> Option<String> {
    static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\b(\d{1,2}/\d{1,2}/\d{2,4}|[A-Z][a-z]{2,8}\.? \d{1,2},? \d{4})\b")
            .expect("valid regex")
    });
    DATE_RE.captures(text).map(|caps| caps[1].to_string())
}

fn source_host(link: Option<&str>, displayed_link: Option<&str>) -> Option<String> {
    let from_link = link
        .and_then(|l| Url::parse(l).ok())
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()));

    from_link.or_else(|| {
        displayed_link
            .and_then(|d| d.split(['/', ' ']).find(|part| part.contains('.')))
            .map(|host| host.trim_start_matches("www.").to_string())
    })
}

/// Derive a search query from the most confident facts.
///
/// Falls back to `default_query` when no fact carries a value.
pub fn build_query(facts: &[Fact], default_query: &str) -> String {
    let mut ranked: Vec<&Fact> = facts.iter().filter(|f| !f.value.trim().is_empty()).collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let keywords: Vec<&str> = ranked
        .iter()
        .take(QUERY_FACTS)
        .map(|f| f.value.trim())
        .collect();

    if keywords.is_empty() {
        return default_query.to_string();
    }

    let mut query = keywords.join(" ");
    if !query.to_lowercase().contains("class action") {
        query.push_str(" class action lawsuit");
    }
    query
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
