//! Context-fetch collaborator: scrapes a case page and normalizes the result.
//!
//! [`FirecrawlClient`] returns the raw scrape payload; [`map_payload`] turns
//! any of the payload shapes the collaborator produces into an
//! [`EnrichmentContext`](specter_shared::EnrichmentContext).

mod adapters;
mod client;
mod html;

pub use adapters::{AdapterRegistry, PayloadAdapter, map_payload};
pub use client::{ContextFetcher, FirecrawlClient};
