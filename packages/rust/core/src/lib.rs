//! Core enrichment-and-synthesis pipeline for Specter.
//!
//! - [`cache`]: the owned enrichment cache and its durable store
//! - [`coordinator`]: concurrent, at-most-once context fetching
//! - [`aggregator`]: token stream consumption into a generation session
//! - [`splitter`]: heading-based partitioning of generated text
//! - [`draft`]: full-draft generation and per-section regeneration
//! - [`pipeline`]: search → enrich → draft, end to end

pub mod aggregator;
pub mod cache;
pub mod coordinator;
pub mod draft;
pub mod pipeline;
pub mod prompt;
pub mod splitter;

pub use aggregator::{GenerationSession, NoopObserver, SessionState, StreamObserver, consume};
pub use cache::{CACHE_KEY, CacheSnapshot, CacheStore, EnrichmentCache};
pub use coordinator::{Coordinator, EnrichOutcome, EnrichmentProgress, SilentEnrichmentProgress};
pub use draft::DraftSession;
pub use pipeline::{
    DraftOutcome, DraftRequest, PipelineDeps, PipelineProgress, SilentProgress, run_draft,
};
pub use prompt::RelatedCase;
pub use splitter::split;
