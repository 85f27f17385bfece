//! Top-level scrape document: `markdown`, `html`, `links`, `metadata` and the
//! structured-extraction object side by side.

use serde_json::Value;
use specter_shared::EnrichmentContext;

use super::{EXTRACTION_KEYS, PayloadAdapter, assemble};

/// Maps an un-enveloped scrape document.
pub struct DocumentAdapter;

impl PayloadAdapter for DocumentAdapter {
    fn detect(&self, payload: &Value) -> bool {
        payload.get("markdown").is_some()
            || EXTRACTION_KEYS
                .iter()
                .any(|key| payload.get(*key).is_some_and(Value::is_object))
    }

    fn extract(&self, payload: &Value) -> EnrichmentContext {
        assemble(payload)
    }

    fn name(&self) -> &str {
        "document"
    }
}
