//! On-disk JSON form of a generated draft.

use std::path::Path;

use chrono::{DateTime, Utc};
use color_eyre::eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use specter_shared::{CandidateMatch, DraftDocument, Fact, SpecterError};

/// A draft plus everything needed to regenerate its sections later.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DraftFile {
    pub query: String,
    pub facts: Vec<Fact>,
    /// Matches whose context went into the prompt.
    pub matches: Vec<CandidateMatch>,
    pub document: DraftDocument,
    pub generated_at: DateTime<Utc>,
}

impl DraftFile {
    pub(crate) fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SpecterError::io(path, e))?;
        serde_json::from_str(&content)
            .wrap_err_with(|| format!("{} is not a Specter draft", path.display()))
    }

    pub(crate) fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| SpecterError::io(path, e))?;
        Ok(())
    }
}

/// Read facts from a JSON array of `{label, value, confidence}` records.
pub(crate) fn read_facts(path: &Path) -> Result<Vec<Fact>> {
    let content = std::fs::read_to_string(path).map_err(|e| SpecterError::io(path, e))?;
    serde_json::from_str(&content)
        .wrap_err_with(|| format!("{} is not a JSON array of facts", path.display()))
}
