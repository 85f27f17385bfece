//! Payload adapters that map context-fetch responses into [`EnrichmentContext`].
//!
//! The collaborator answers in several nesting conventions. Adapters are tried
//! in priority order; [`FlatAdapter`] is the always-last fallback, so mapping
//! never fails.

mod document;
mod envelope;
mod flat;

use chrono::Utc;
use serde_json::Value;
use specter_shared::EnrichmentContext;
use tracing::{debug, warn};

pub use document::DocumentAdapter;
pub use envelope::EnvelopeAdapter;
pub use flat::FlatAdapter;

use crate::html;

/// Keys under which the collaborator returns structured-extraction results.
const EXTRACTION_KEYS: [&str; 3] = ["extract", "extraction", "json"];

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Trait for one payload nesting convention.
pub trait PayloadAdapter: Send + Sync {
    /// Whether this adapter understands the payload's shape.
    fn detect(&self, payload: &Value) -> bool;

    /// Map the payload. Missing fields stay `None`; never fails.
    fn extract(&self, payload: &Value) -> EnrichmentContext;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered adapters in priority order.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn PayloadAdapter>>,
}

impl AdapterRegistry {
    /// Create a registry with all built-in adapters (envelope first, flat last).
    pub fn new() -> Self {
        Self {
            adapters: vec![
                Box::new(EnvelopeAdapter),
                Box::new(DocumentAdapter),
                Box::new(FlatAdapter),
            ],
        }
    }

    /// Detect the adapter for a payload.
    /// Always returns an adapter (FlatAdapter is the fallback).
    pub fn detect(&self, payload: &Value) -> &dyn PayloadAdapter {
        for adapter in &self.adapters {
            if adapter.detect(payload) {
                return adapter.as_ref();
            }
        }
        // Unreachable: FlatAdapter always matches
        unreachable!("FlatAdapter must always match");
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a raw collaborator payload into an [`EnrichmentContext`].
///
/// `{error}` payloads (and `{success: false}` envelopes) produce the error
/// form; everything else goes through the adapter registry.
pub fn map_payload(payload: &Value) -> EnrichmentContext {
    if let Some(message) = reported_error(payload) {
        debug!(error = %message, "payload reports an error");
        return EnrichmentContext::failed(message);
    }

    let registry = AdapterRegistry::new();
    let adapter = registry.detect(payload);
    debug!(adapter = adapter.name(), "mapping payload");

    let mut context = adapter.extract(payload);
    context.raw_payload = Some(payload.clone());
    context.fetched_at = Some(Utc::now());
    context
}

fn reported_error(payload: &Value) -> Option<String> {
    let object = payload.as_object()?;
    let message = object
        .get("error")
        .and_then(scalar_text)
        .filter(|m| !m.is_empty());

    match object.get("success") {
        Some(Value::Bool(false)) => {
            Some(message.unwrap_or_else(|| "context fetch reported failure".into()))
        }
        _ if has_content(object) => None,
        _ => message,
    }
}

fn has_content(object: &serde_json::Map<String, Value>) -> bool {
    ["data", "markdown", "text", "html", "title"]
        .iter()
        .any(|key| object.get(*key).is_some_and(|v| !v.is_null()))
}

// ---------------------------------------------------------------------------
// Shared field assembly
// ---------------------------------------------------------------------------

/// Build a context from one document object and its extraction objects.
///
/// Structured fields prefer the extraction objects, then the document itself.
pub(crate) fn assemble(document: &Value) -> EnrichmentContext {
    let extracted: Vec<&Value> = EXTRACTION_KEYS
        .iter()
        .filter_map(|key| document.get(*key))
        .filter(|v| v.is_object())
        .collect();
    let metadata = document.get("metadata").filter(|m| is_non_empty_object(m));

    let mut structured = extracted.clone();
    structured.push(document);

    let raw_html = text_field(&[document], &["html", "rawHtml"]);
    let body_text = text_field(&[document], &["markdown", "text", "content", "bodyText"])
        .or_else(|| raw_html.as_deref().and_then(markdown_from_html));

    let title = text_field(&structured, &["title"])
        .or_else(|| metadata.and_then(|m| text_field(&[m], &["title", "ogTitle", "og:title"])))
        .or_else(|| raw_html.as_deref().and_then(html::html_title));

    EnrichmentContext {
        title,
        body_text,
        payout: text_field(&structured, &["payout"]),
        participants: text_field(&structured, &["participants"]),
        deadline: text_field(&structured, &["deadline"]),
        law_firm: text_field(&structured, &["lawFirm", "law_firm"]),
        eligibility: text_field(&structured, &["eligibility"]),
        case_number: text_field(&structured, &["caseNumber", "case_number"]),
        court_info: text_field(&structured, &["courtInfo", "court_info"]),
        summary: text_field(&structured, &["summary"]),
        status: text_field(&structured, &["status"]),
        screenshot_ref: screenshot(document),
        links: links(document),
        metadata: metadata.cloned(),
        ..Default::default()
    }
}

/// First non-empty value for any of `keys`, searching `sources` in order.
pub(crate) fn text_field(sources: &[&Value], keys: &[&str]) -> Option<String> {
    sources.iter().find_map(|source| {
        keys.iter()
            .filter_map(|key| source.get(*key))
            .filter_map(scalar_text)
            .find(|text| !text.is_empty())
    })
}

/// Strings and numbers as trimmed text; everything else is absent.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn screenshot(document: &Value) -> Option<String> {
    text_field(&[document], &["screenshot", "screenshotContentArea"]).or_else(|| {
        document
            .pointer("/actions/screenshots")
            .and_then(Value::as_array)
            .and_then(|shots| shots.iter().filter_map(scalar_text).find(|s| !s.is_empty()))
    })
}

/// Links as plain URLs; accepts strings or `{url}`/`{href}` objects.
fn links(document: &Value) -> Vec<String> {
    let Some(items) = document.get("links").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut out: Vec<String> = Vec::new();
    for item in items {
        let link = match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(_) => text_field(&[item], &["url", "href"]),
            _ => None,
        };
        if let Some(link) = link.filter(|l| !l.is_empty()) {
            if !out.contains(&link) {
                out.push(link);
            }
        }
    }
    out
}

pub(crate) fn markdown_from_html(raw_html: &str) -> Option<String> {
    match html::html_to_markdown(raw_html) {
        Ok(md) if !md.is_empty() => Some(md),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "falling back to no body text");
            None
        }
    }
}

fn is_non_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(|o| !o.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_and_top_level_map_identically() {
        let document = json!({
            "markdown": "# Acme\n\nSettlement text",
            "metadata": {"title": "Acme page", "sourceURL": "https://acme.example"},
            "extract": {"title": "Acme Settlement", "payout": "$5M", "lawFirm": "Smith LLP"},
            "links": ["https://acme.example/claim", {"url": "https://acme.example/faq"}]
        });
        let enveloped = json!({"success": true, "data": document.clone()});

        let a = map_payload(&document);
        let b = map_payload(&enveloped);

        assert_eq!(a.title.as_deref(), Some("Acme Settlement"));
        assert_eq!(a.payout.as_deref(), Some("$5M"));
        assert_eq!(a.law_firm.as_deref(), Some("Smith LLP"));
        assert_eq!(a.body_text.as_deref(), Some("# Acme\n\nSettlement text"));
        assert_eq!(a.links.len(), 2);
        assert_eq!(a.title, b.title);
        assert_eq!(a.body_text, b.body_text);
        assert_eq!(a.links, b.links);
        assert_eq!(b.raw_payload.as_ref(), Some(&enveloped));
    }

    #[test]
    fn flat_proxy_variant_maps() {
        let payload = json!({
            "title": "Flat Case",
            "text": "Body",
            "html": "",
            "payout": "",
            "deadline": "2025-09-01",
            "participants": 1200,
            "screenshot": "https://cdn.example/shot.png",
            "metadata": {},
            "raw": {"anything": true}
        });
        let ctx = map_payload(&payload);

        assert!(!ctx.is_error());
        assert_eq!(ctx.title.as_deref(), Some("Flat Case"));
        assert_eq!(ctx.body_text.as_deref(), Some("Body"));
        assert!(ctx.payout.is_none(), "empty strings count as absent");
        assert_eq!(ctx.participants.as_deref(), Some("1200"));
        assert_eq!(ctx.screenshot_ref.as_deref(), Some("https://cdn.example/shot.png"));
        assert!(ctx.metadata.is_none());
    }

    #[test]
    fn html_only_payload_is_converted() {
        let payload = json!({
            "html": "<html><head><title>Html Case</title></head><body><p>Claim now</p></body></html>"
        });
        let ctx = map_payload(&payload);
        assert_eq!(ctx.title.as_deref(), Some("Html Case"));
        assert_eq!(ctx.body_text.as_deref(), Some("Claim now"));
    }

    #[test]
    fn error_payloads_map_to_error_form() {
        let ctx = map_payload(&json!({"error": "Missing or invalid url"}));
        assert_eq!(ctx.error.as_deref(), Some("Missing or invalid url"));
        assert!(ctx.title.is_none());

        let ctx = map_payload(&json!({"success": false}));
        assert!(ctx.is_error());
    }

    #[test]
    fn unexpected_shapes_degrade_to_empty_context() {
        let ctx = map_payload(&json!([1, 2, 3]));
        assert!(!ctx.is_error());
        assert!(ctx.title.is_none());
        assert!(ctx.raw_payload.is_some());
    }

    #[test]
    fn registry_prefers_envelope() {
        let registry = AdapterRegistry::new();
        assert_eq!(registry.detect(&json!({"success": true, "data": {}})).name(), "envelope");
        assert_eq!(registry.detect(&json!({"markdown": "x"})).name(), "document");
        assert_eq!(registry.detect(&json!("plain")).name(), "flat");
    }
}
