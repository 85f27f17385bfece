//! Flat variant: a proxy-processed object (`title`, `text`, `payout`, ...)
//! or a bare Markdown / HTML string.
//!
//! Always matches; used when no other adapter recognises the payload.

use serde_json::Value;
use specter_shared::{EnrichmentContext, SpecterError};
use tracing::warn;

use super::{PayloadAdapter, assemble, markdown_from_html};
use crate::html;

/// Fallback adapter for flat objects and raw text bodies.
pub struct FlatAdapter;

impl PayloadAdapter for FlatAdapter {
    fn detect(&self, _payload: &Value) -> bool {
        true
    }

    fn extract(&self, payload: &Value) -> EnrichmentContext {
        match payload {
            Value::Object(_) => assemble(payload),
            Value::String(text) => from_text(text),
            other => {
                warn!(error = %unexpected_shape(other), "mapping nothing");
                EnrichmentContext::default()
            }
        }
    }

    fn name(&self) -> &str {
        "flat"
    }
}

fn from_text(text: &str) -> EnrichmentContext {
    let text = text.trim();
    if text.is_empty() {
        return EnrichmentContext::default();
    }

    if html::looks_like_html(text) {
        EnrichmentContext {
            title: html::html_title(text),
            body_text: markdown_from_html(text),
            ..Default::default()
        }
    } else {
        EnrichmentContext {
            body_text: Some(text.to_string()),
            ..Default::default()
        }
    }
}

/// Mapping error for a payload that is neither an object nor text.
fn unexpected_shape(value: &Value) -> SpecterError {
    SpecterError::Mapping(format!("unexpected {} payload", kind(value)))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Object(_) => "object",
    }
}
