//! Shared types, error model, and configuration for Specter.
//!
//! This crate is the foundation depended on by all other Specter crates.
//! It provides:
//! - [`SpecterError`]: the unified error type
//! - Domain types ([`CandidateMatch`], [`EnrichmentContext`], [`HeadingSpec`],
//!   [`DraftSection`], [`DraftDocument`], [`Fact`])
//! - Configuration ([`AppConfig`], per-collaborator options, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, GenerationConfig, GenerationOptions, ScrapeConfig, ScrapeOptions,
    SearchConfig, SearchOptions, config_dir, config_file_path, init_config, load_config,
    load_config_from, resolve_api_key, validate_api_key,
};
pub use error::{Result, SpecterError};
pub use types::{
    CandidateMatch, DraftDocument, DraftSection, EnrichmentContext, FALLBACK_SECTION_ID, Fact,
    HeadingSpec, complaint_headings,
};
