// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::config::{AdapterConfig, PipelineConfig, RateLimitConfig};
pub use crate::error::{FetchError, RateLimitError, Rejection, ResolveError, ValidationError};
pub use crate::ingest::{BatchFetcher, NormalizedRecord, Orchestrator, SourceAdapter};
