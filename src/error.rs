//! Error taxonomy of the ingestion pipeline.
//!
//! Everything below [`ResolveError`] is recovered locally by the orchestrator
//! advancing to the next adapter. Only exhaustion reaches the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ingest::types::PayloadSignature;

/// Network-level failure of an adapter's `fetch`. Never used for content problems.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    /// 429 / 5xx: the upstream refused to serve anything usable.
    #[error("upstream refused with HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("identifier {identifier:?} is not valid for this source")]
    InvalidIdentifier { identifier: String },

    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

impl FetchError {
    /// Map a reqwest failure, attributing timeouts to the configured deadline.
    pub fn from_reqwest(err: reqwest::Error, timeout: std::time::Duration) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                after_ms: timeout.as_millis() as u64,
            }
        } else {
            FetchError::Transport {
                message: err.to_string(),
            }
        }
    }
}

/// Structural rejection of a response before any parsing happens.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("unexpected HTTP status {status}")]
    BadStatus { status: u16 },

    #[error("content-type {actual:?} is not in the expected family {expected:?}")]
    BadContentType { expected: String, actual: String },

    #[error("body is {actual} bytes, below the {min} byte minimum")]
    TooSmall { min: usize, actual: usize },
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateLimitError {
    #[error("no rate limit bucket registered for source {source_name:?}")]
    UnknownSource { source_name: String },

    #[error("cost {cost} exceeds bucket capacity {capacity} for source {source_name:?}")]
    CostExceedsCapacity {
        source_name: String,
        cost: u32,
        capacity: u32,
    },
}

/// Why a single adapter attempt did not produce a record.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Rejection {
    #[error("rate limit: {error}")]
    RateLimit { error: RateLimitError },

    #[error("fetch: {error}")]
    Fetch { error: FetchError },

    #[error("validation: {error}")]
    Validation { error: ValidationError },

    /// Well-formed response that is not a listing page.
    #[error("classified as {signature}")]
    Classification { signature: PayloadSignature },

    #[error("transform: {message}")]
    Transform { message: String },
}

impl Rejection {
    /// Short stage label used for metrics and logs.
    pub fn stage(&self) -> &'static str {
        match self {
            Rejection::RateLimit { .. } => "rate_limit",
            Rejection::Fetch { .. } => "fetch",
            Rejection::Validation { .. } => "validation",
            Rejection::Classification { .. } => "classification",
            Rejection::Transform { .. } => "transform",
        }
    }
}

impl From<FetchError> for Rejection {
    fn from(error: FetchError) -> Self {
        Rejection::Fetch { error }
    }
}

impl From<ValidationError> for Rejection {
    fn from(error: ValidationError) -> Self {
        Rejection::Validation { error }
    }
}

impl From<RateLimitError> for Rejection {
    fn from(error: RateLimitError) -> Self {
        Rejection::RateLimit { error }
    }
}

/// One failed adapter attempt, as reported to the caller on exhaustion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub adapter: String,
    pub rejection: Rejection,
}

/// Terminal outcome surfaced to callers of the orchestrator / batch fetcher.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolveError {
    #[error("identifier {identifier:?} could not be resolved by any source ({} attempts)", attempts.len())]
    AllSourcesFailed {
        identifier: String,
        attempts: Vec<AttemptSummary>,
    },

    /// The worker task resolving this identifier died (panic or abort).
    #[error("resolution of {identifier:?} aborted: {reason}")]
    Aborted { identifier: String, reason: String },
}
