//! End-to-end draft pipeline: facts → search → enrich → full draft.

use std::time::Instant;

use specter_search::{SearchProvider, build_query};
use specter_shared::{CandidateMatch, DraftSection, EnrichmentContext, Fact, Result, SpecterError};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::cache::{CacheSnapshot, EnrichmentCache};
use crate::coordinator::{Coordinator, EnrichOutcome, EnrichmentProgress};
use crate::draft::DraftSession;
use crate::prompt::RelatedCase;

/// Input of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct DraftRequest {
    /// Extracted facts feeding the query and the prompt.
    pub facts: Vec<Fact>,
    /// Explicit search query. Derived from the facts when `None`.
    pub query: Option<String>,
    /// Match id to draft against. Every enriched match is used when `None`.
    pub selected_match: Option<String>,
}

/// Collaborators the pipeline runs against.
pub struct PipelineDeps<'a> {
    pub search: &'a dyn SearchProvider,
    pub coordinator: &'a Coordinator,
    pub cache: &'a EnrichmentCache,
    pub session: &'a DraftSession,
    /// Query used when no fact carries a value.
    pub default_query: &'a str,
}

/// Result of a pipeline run.
#[derive(Debug)]
pub struct DraftOutcome {
    pub query: String,
    pub matches: Vec<CandidateMatch>,
    pub enrichment: EnrichOutcome,
    /// Matches whose context went into the prompt.
    pub used_matches: Vec<String>,
    pub sections: Vec<DraftSection>,
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting pipeline status.
pub trait PipelineProgress: EnrichmentProgress {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the search collaborator has answered.
    fn matches_found(&self, matches: &[CandidateMatch]);
    /// Called with the live draft text after every streamed fragment.
    fn draft_snapshot(&self, text: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl EnrichmentProgress for SilentProgress {
    fn started(&self, _pending: usize) {}
    fn settled(&self, _match_id: &str, _context: &EnrichmentContext, _remaining: usize) {}
    fn done(&self, _snapshot: &CacheSnapshot) {}
}

impl PipelineProgress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn matches_found(&self, _matches: &[CandidateMatch]) {}
    fn draft_snapshot(&self, _text: &str) {}
}

/// Run search, enrichment, and a full draft for `request`.
#[instrument(skip_all, fields(facts = request.facts.len()))]
pub async fn run_draft<P: PipelineProgress>(
    request: &DraftRequest,
    deps: PipelineDeps<'_>,
    progress: &P,
    cancel: &CancellationToken,
) -> Result<DraftOutcome> {
    let started = Instant::now();

    // Phase 1: search
    progress.phase("Searching for related cases");
    let query = request
        .query
        .clone()
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| build_query(&request.facts, deps.default_query));
    let matches = deps.search.search(&query).await?;
    progress.matches_found(&matches);
    info!(%query, matches = matches.len(), "search complete");

    // Phase 2: enrich
    progress.phase("Enriching matches");
    let enrichment = deps
        .coordinator
        .enrich(&matches, deps.cache, progress, cancel)
        .await;
    if enrichment.cancelled || cancel.is_cancelled() {
        return Err(SpecterError::Cancelled {
            partial: String::new(),
        });
    }

    // Phase 3: choose context
    let cases = choose_cases(&matches, &enrichment.snapshot, request.selected_match.as_deref())?;
    if cases.is_empty() {
        warn!("drafting without related case context");
    }
    let used_matches = cases.iter().map(|(id, _)| id.clone()).collect();
    let cases: Vec<RelatedCase> = cases.into_iter().map(|(_, case)| case).collect();

    // Phase 4: draft
    progress.phase("Drafting complaint");
    let mut observer = |text: &str| progress.draft_snapshot(text);
    let sections = deps
        .session
        .generate_full(&request.facts, &cases, &mut observer, cancel)
        .await?;

    let elapsed = started.elapsed();
    info!(
        sections = sections.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "draft pipeline complete"
    );

    Ok(DraftOutcome {
        query,
        matches,
        enrichment,
        used_matches,
        sections,
        elapsed,
    })
}

/// Pair matches with their contexts for the prompt.
///
/// With a selection, only that match is used (its description stands in when
/// it has no context). Without one, every match with a non-error context is.
fn choose_cases(
    matches: &[CandidateMatch],
    snapshot: &CacheSnapshot,
    selected: Option<&str>,
) -> Result<Vec<(String, RelatedCase)>> {
    if let Some(id) = selected {
        let candidate = matches
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| SpecterError::validation(format!("selected match {id} was not found")))?;
        let context = snapshot
            .get(id)
            .filter(|c| !c.is_error())
            .cloned()
            .unwrap_or_else(|| EnrichmentContext {
                title: Some(candidate.name.clone()),
                summary: Some(candidate.description.clone()),
                ..Default::default()
            });
        return Ok(vec![(id.to_string(), RelatedCase::new(candidate, context))]);
    }

    Ok(matches
        .iter()
        .filter_map(|m| {
            snapshot
                .get(&m.id)
                .filter(|c| !c.is_error())
                .map(|c| (m.id.clone(), RelatedCase::new(m, c.clone())))
        })
        .collect())
}
