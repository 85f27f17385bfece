//! Firecrawl scrape client.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use specter_shared::{Result, ScrapeOptions, SpecterError};
use tracing::{debug, instrument, warn};

/// User-Agent string for scrape requests.
const USER_AGENT: &str = concat!("Specter/", env!("CARGO_PKG_VERSION"));

/// Instruction sent alongside the extraction schema.
const EXTRACTION_PROMPT: &str = "Extract detailed information about this class action lawsuit: \
    settlement amounts and payout figures, filing and claim deadlines, eligibility criteria, \
    participating law firms, case numbers, court information, a short summary and the current status.";

/// Fetches the raw context payload for one URL.
#[async_trait]
pub trait ContextFetcher: Send + Sync {
    /// Fetch `url` and return the collaborator's JSON payload untouched.
    async fn fetch(&self, url: &str) -> Result<Value>;
}

/// [`ContextFetcher`] backed by the Firecrawl `/v1/scrape` endpoint.
pub struct FirecrawlClient {
    client: Client,
    opts: ScrapeOptions,
}

impl FirecrawlClient {
    pub fn new(opts: ScrapeOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(opts.timeout)
            .build()
            .map_err(|e| SpecterError::Network(format!("failed to build HTTP client: {e}")))?;

        if opts.api_key.is_none() {
            warn!("no scrape API key configured, sending unauthenticated requests");
        }

        Ok(Self { client, opts })
    }

    /// The JSON body of a scrape request for `url`.
    pub fn request_body(&self, url: &str) -> Value {
        json!({
            "url": url,
            "formats": ["markdown", "links", "html", "screenshot", "extract"],
            "onlyMainContent": false,
            "waitFor": self.opts.wait_for_ms,
            "blockAds": true,
            "timeout": self.opts.timeout.as_millis() as u64,
            "extract": {
                "schema": extraction_schema(),
                "prompt": EXTRACTION_PROMPT,
            },
        })
    }
}

#[async_trait]
impl ContextFetcher for FirecrawlClient {
    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &str) -> Result<Value> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SpecterError::validation("missing or invalid url"));
        }

        let mut request = self
            .client
            .post(&self.opts.endpoint)
            .json(&self.request_body(url));
        if let Some(key) = &self.opts.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| SpecterError::Fetch {
            url: url.to_string(),
            status: None,
            message: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| SpecterError::Fetch {
            url: url.to_string(),
            status: Some(status.as_u16()),
            message: format!("failed to read body: {e}"),
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| "scrape API error".into());
            return Err(SpecterError::Fetch {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message,
            });
        }

        debug!(status = status.as_u16(), bytes = text.len(), "scrape response received");

        // Non-JSON bodies are passed on as a bare string for the flat adapter.
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

fn extraction_schema() -> Value {
    let fields = [
        ("title", "The title or name of the lawsuit"),
        ("payout", "The settlement amount or payout details"),
        ("participants", "Number of participants, class members, or affected people"),
        ("deadline", "Filing deadline, claim deadline, or important dates"),
        ("lawFirm", "Law firm(s) handling the case"),
        ("eligibility", "Who is eligible to join or make claims"),
        ("caseNumber", "Case number or identifier if available"),
        ("courtInfo", "Court information where the lawsuit was filed"),
        ("summary", "A brief summary of the lawsuit"),
        ("status", "Current status of the lawsuit (pending, settled, etc.)"),
    ];

    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|(name, description)| {
            (
                (*name).to_string(),
                json!({"type": "string", "description": description}),
            )
        })
        .collect();

    json!({"type": "object", "properties": properties})
}
