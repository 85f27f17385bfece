//! Core domain types for the enrichment-and-synthesis pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Section id and title used when no requested heading is found in generated text.
pub const FALLBACK_SECTION_ID: &str = "draft";

// ---------------------------------------------------------------------------
// Fact
// ---------------------------------------------------------------------------

/// A fact extracted from the user's evidence, reviewed before drafting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    #[serde(default = "new_fact_id")]
    pub id: String,
    pub label: String,
    pub value: String,
    /// Extraction confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
    /// Set once the user has corrected the extracted value.
    #[serde(default)]
    pub is_edited: bool,
}

fn new_fact_id() -> String {
    Uuid::now_v7().to_string()
}

impl Fact {
    /// Create an unedited fact with a fresh id.
    pub fn new(label: impl Into<String>, value: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: new_fact_id(),
            label: label.into(),
            value: value.into(),
            confidence,
            is_edited: false,
        }
    }
}

// ---------------------------------------------------------------------------
// CandidateMatch
// ---------------------------------------------------------------------------

/// A candidate similar case produced by the search collaborator.
///
/// Immutable once produced for a given search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateMatch {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Match confidence in `[0, 1]`.
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Displayed host of the source (e.g. `topclassactions.com`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_posted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<u64>,
}

impl CandidateMatch {
    /// The source URL if present and non-blank.
    pub fn fetchable_url(&self) -> Option<&str> {
        self.source_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

// ---------------------------------------------------------------------------
// EnrichmentContext
// ---------------------------------------------------------------------------

/// Supplementary context fetched for one [`CandidateMatch`].
///
/// When `error` is set, no other field is trustworthy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub law_firm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub court_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    /// Page metadata reported by the collaborator (opaque).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// The untouched collaborator payload (opaque).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl EnrichmentContext {
    /// Build the error form of a context: only `error` (and the timestamp) is set.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            fetched_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Whether this context records a failed fetch.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Labelled structured fields that are present, in display order.
    pub fn details(&self) -> Vec<(&'static str, &str)> {
        [
            ("Title", &self.title),
            ("Summary", &self.summary),
            ("Status", &self.status),
            ("Payout", &self.payout),
            ("Participants", &self.participants),
            ("Deadline", &self.deadline),
            ("Law firm", &self.law_firm),
            ("Eligibility", &self.eligibility),
            ("Case number", &self.case_number),
            ("Court", &self.court_info),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.as_deref().map(|v| (label, v)))
        .collect()
    }
}

// ---------------------------------------------------------------------------
// Headings and sections
// ---------------------------------------------------------------------------

/// One heading the section splitter searches for.
///
/// Order in a heading list is significant and defines output order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadingSpec {
    /// Literal text matched case-insensitively in generated output.
    pub label: String,
    /// Identity of the produced section.
    pub section_id: String,
    #[serde(default = "default_editable")]
    pub editable: bool,
}

fn default_editable() -> bool {
    true
}

impl HeadingSpec {
    pub fn new(label: impl Into<String>, section_id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            section_id: section_id.into(),
            editable: true,
        }
    }

    /// Mark the produced section as read-only.
    pub fn locked(mut self) -> Self {
        self.editable = false;
        self
    }
}

/// The canonical complaint headings, in document order.
pub fn complaint_headings() -> Vec<HeadingSpec> {
    vec![
        HeadingSpec::new("COMPLAINT", "section-caption"),
        HeadingSpec::new("INTRODUCTION", "section-intro"),
        HeadingSpec::new("PARTIES", "section-parties"),
        HeadingSpec::new("JURISDICTION AND VENUE", "section-jurisdiction").locked(),
        HeadingSpec::new("FACTUAL ALLEGATIONS", "section-facts"),
        HeadingSpec::new("CLASS ACTION ALLEGATIONS", "section-class").locked(),
        HeadingSpec::new("CAUSES OF ACTION", "section-claims"),
        HeadingSpec::new("PRAYER FOR RELIEF", "section-prayer").locked(),
    ]
}

/// A titled section of a generated document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSection {
    pub id: String,
    pub title: String,
    /// Plain text / Markdown body.
    pub content: String,
    pub editable: bool,
}

impl DraftSection {
    /// The single section emitted when no heading could be located.
    pub fn fallback(content: impl Into<String>) -> Self {
        Self {
            id: FALLBACK_SECTION_ID.into(),
            title: FALLBACK_SECTION_ID.into(),
            content: content.into(),
            editable: true,
        }
    }
}

/// The document model the draft session writes into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftDocument {
    pub sections: Vec<DraftSection>,
}

impl DraftDocument {
    pub fn new(sections: Vec<DraftSection>) -> Self {
        Self { sections }
    }

    pub fn section(&self, id: &str) -> Option<&DraftSection> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn section_mut(&mut self, id: &str) -> Option<&mut DraftSection> {
        self.sections.iter_mut().find(|s| s.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Render the document as Markdown with one `##` heading per section.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str("## ");
            out.push_str(&section.title);
            out.push_str("\n\n");
            out.push_str(section.content.trim_end());
            out.push_str("\n\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_uses_camel_case_keys() {
        let ctx = EnrichmentContext {
            law_firm: Some("Smith & Co".into()),
            case_number: Some("3:21-cv-01234".into()),
            body_text: Some("body".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&ctx).expect("serialize");
        assert!(json.contains(r#""lawFirm":"Smith & Co""#));
        assert!(json.contains(r#""caseNumber""#));
        assert!(json.contains(r#""bodyText""#));
        assert!(!json.contains("error"));
        assert!(!json.contains("links"));
    }

    #[test]
    fn failed_context_only_carries_error() {
        let ctx = EnrichmentContext::failed("HTTP 500");
        assert!(ctx.is_error());
        assert!(ctx.title.is_none());
        assert!(ctx.details().is_empty());
    }

    #[test]
    fn fetchable_url_ignores_blank() {
        let mut m = CandidateMatch {
            id: "1".into(),
            name: "Case".into(),
            description: String::new(),
            confidence_score: 0.5,
            source_url: Some("   ".into()),
            source: None,
            date_posted: None,
            member_count: None,
        };
        assert!(m.fetchable_url().is_none());
        m.source_url = Some("https://example.com/case".into());
        assert_eq!(m.fetchable_url(), Some("https://example.com/case"));
    }

    #[test]
    fn complaint_headings_are_ordered_and_unique() {
        let headings = complaint_headings();
        assert_eq!(headings.first().map(|h| h.label.as_str()), Some("COMPLAINT"));
        assert_eq!(
            headings.last().map(|h| h.label.as_str()),
            Some("PRAYER FOR RELIEF")
        );
        let mut ids: Vec<&str> = headings.iter().map(|h| h.section_id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), headings.len());
    }

    #[test]
    fn fact_deserializes_without_id() {
        let fact: Fact =
            serde_json::from_str(r#"{"label":"Vendor","value":"TechGiant"}"#).expect("parse");
        assert!(!fact.id.is_empty());
        assert!(!fact.is_edited);
    }

    #[test]
    fn document_markdown_lists_sections() {
        let doc = DraftDocument::new(vec![
            DraftSection {
                id: "section-intro".into(),
                title: "INTRODUCTION".into(),
                content: "Hello".into(),
                editable: true,
            },
            DraftSection::fallback("rest"),
        ]);
        let md = doc.to_markdown();
        assert!(md.starts_with("## INTRODUCTION\n\nHello"));
        assert!(md.contains("## draft\n\nrest"));
        assert!(doc.section("draft").is_some());
    }
}
