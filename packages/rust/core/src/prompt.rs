//! Prompt construction for full drafts and single-section regeneration.

use std::fmt::Write as _;

use specter_generation::ChatMessage;
use specter_shared::{CandidateMatch, EnrichmentContext, Fact, HeadingSpec};

/// Body text per related case is capped to keep prompts inside the model's
/// context window.
const MAX_CASE_BODY_CHARS: usize = 4_000;

const SYSTEM_PROMPT: &str = "You are a legal drafting assistant. You write class action \
complaints in plain, precise language. Use only the facts and related cases you are given; \
do not invent names, dates, or amounts.";

/// An enriched match offered to the model as background.
#[derive(Debug, Clone)]
pub struct RelatedCase {
    pub name: String,
    pub source_url: Option<String>,
    pub context: EnrichmentContext,
}

impl RelatedCase {
    pub fn new(candidate: &CandidateMatch, context: EnrichmentContext) -> Self {
        Self {
            name: candidate.name.clone(),
            source_url: candidate.source_url.clone(),
            context,
        }
    }
}

/// Messages for a full complaint draft covering every heading, in order.
pub fn full_draft_messages(
    facts: &[Fact],
    cases: &[RelatedCase],
    headings: &[HeadingSpec],
) -> Vec<ChatMessage> {
    let mut request = String::from("Draft a complete class action complaint.\n\n");
    request.push_str(
        "Write each section under its heading, exactly as written below, on a line of its own, \
         in this order:\n",
    );
    for heading in headings {
        let _ = writeln!(request, "{}", heading.label);
    }
    request.push('\n');
    push_facts(&mut request, facts);
    push_cases(&mut request, cases);

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(request)]
}

/// Messages for regenerating the section titled `title`.
pub fn section_messages(title: &str, facts: &[Fact], cases: &[RelatedCase]) -> Vec<ChatMessage> {
    let mut request = format!(
        "Draft complaint section '{title}' using facts: {}\n\n",
        facts_inline(facts)
    );
    let _ = writeln!(
        request,
        "Begin with the heading {title} on its own line, then write only that section."
    );
    request.push('\n');
    push_cases(&mut request, cases);

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(request)]
}

fn facts_inline(facts: &[Fact]) -> String {
    let rendered: Vec<String> = facts
        .iter()
        .filter(|f| !f.value.trim().is_empty())
        .map(|f| format!("{}: {}", f.label, f.value.trim()))
        .collect();
    if rendered.is_empty() {
        "(none provided)".to_string()
    } else {
        rendered.join("; ")
    }
}

fn push_facts(out: &mut String, facts: &[Fact]) {
    out.push_str("## Facts\n");
    let mut any = false;
    for fact in facts.iter().filter(|f| !f.value.trim().is_empty()) {
        let _ = writeln!(out, "- {}: {}", fact.label, fact.value.trim());
        any = true;
    }
    if !any {
        out.push_str("(none provided)\n");
    }
    out.push('\n');
}

fn push_cases(out: &mut String, cases: &[RelatedCase]) {
    let usable: Vec<&RelatedCase> = cases.iter().filter(|c| !c.context.is_error()).collect();
    if usable.is_empty() {
        return;
    }

    out.push_str("## Related cases\n");
    for case in usable {
        let _ = writeln!(out, "### {}", case.name);
        if let Some(url) = &case.source_url {
            let _ = writeln!(out, "Source: {url}");
        }
        for (label, value) in case.context.details() {
            let _ = writeln!(out, "{label}: {value}");
        }
        if let Some(body) = case.context.body_text.as_deref().filter(|b| !b.trim().is_empty()) {
            out.push('\n');
            out.push_str(&truncate_content(body.trim(), MAX_CASE_BODY_CHARS));
            out.push('\n');
        }
        out.push('\n');
    }
}

/// Truncate to at most `max_chars` characters, marking the cut.
fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((cut, _)) => {
            format!("{}\n\n[... content truncated for LLM context window ...]", &content[..cut])
        }
    }
}
