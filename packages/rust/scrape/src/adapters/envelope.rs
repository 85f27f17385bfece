//! `{success, data: {...}}` envelope returned by the hosted scrape API.

use serde_json::Value;
use specter_shared::EnrichmentContext;

use super::{PayloadAdapter, assemble};

/// Unwraps the `data` object and maps it as a document.
pub struct EnvelopeAdapter;

impl PayloadAdapter for EnvelopeAdapter {
    fn detect(&self, payload: &Value) -> bool {
        payload.get("success").is_some() && payload.get("data").is_some_and(Value::is_object)
    }

    fn extract(&self, payload: &Value) -> EnrichmentContext {
        match payload.get("data") {
            Some(data) => assemble(data),
            None => EnrichmentContext::default(),
        }
    }

    fn name(&self) -> &str {
        "envelope"
    }
}
