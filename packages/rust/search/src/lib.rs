//! Search collaborator: finds candidate similar cases for a query.
//!
//! [`SerpApiClient`] queries SerpApi's Google engine and maps the organic
//! results 1:1 into [`CandidateMatch`] records with a keyword-derived
//! confidence score.

mod results;

use async_trait::async_trait;
use reqwest::Client;
use specter_shared::{CandidateMatch, Result, SearchOptions, SpecterError};
use tracing::{debug, info, instrument};

pub use results::build_query;

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("Specter/", env!("CARGO_PKG_VERSION"));

/// Anything that can turn a query into an ordered list of candidate matches.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run `query` and return matches in result order.
    async fn search(&self, query: &str) -> Result<Vec<CandidateMatch>>;
}

// ---------------------------------------------------------------------------
// SerpApi client
// ---------------------------------------------------------------------------

/// SerpApi-backed [`SearchProvider`].
pub struct SerpApiClient {
    client: Client,
    opts: SearchOptions,
}

impl SerpApiClient {
    /// Build a client. Fails when no API key is configured.
    pub fn new(opts: SearchOptions) -> Result<Self> {
        if opts.api_key.is_none() {
            return Err(SpecterError::config(
                "SerpApi API key not configured. Set the key env var named in [search] api_key_env.",
            ));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(opts.timeout)
            .build()
            .map_err(|e| SpecterError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, opts })
    }
}

#[async_trait]
impl SearchProvider for SerpApiClient {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(&self, query: &str) -> Result<Vec<CandidateMatch>> {
        let num = self.opts.num_results.to_string();
        let api_key = self.opts.api_key.as_deref().unwrap_or_default();

        info!(engine = %self.opts.engine, "querying search collaborator");

        let response = self
            .client
            .get(&self.opts.endpoint)
            .query(&[
                ("q", query),
                ("api_key", api_key),
                ("engine", self.opts.engine.as_str()),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SpecterError::Network(format!("search request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SpecterError::Network(format!("failed to read search response: {e}")))?;

        if !status.is_success() {
            let reason = serde_json::from_str::<results::SearchResponse>(&text)
                .ok()
                .and_then(|body| body.error)
                .unwrap_or(text);
            return Err(SpecterError::Network(format!(
                "search failed: HTTP {}: {reason}",
                status.as_u16()
            )));
        }

        let body: results::SearchResponse = serde_json::from_str(&text)
            .map_err(|e| SpecterError::Network(format!("invalid search response: {e}")))?;
        if let Some(error) = body.error {
            return Err(SpecterError::Network(format!("search failed: {error}")));
        }

        let organic: Vec<_> = body
            .organic_results
            .into_iter()
            .take(self.opts.num_results)
            .collect();
        debug!(results = organic.len(), "organic results received");

        let matches =
            results::map_results(organic, query, self.opts.require_class_action_terms);
        info!(matches = matches.len(), "search complete");
        Ok(matches)
    }
}
