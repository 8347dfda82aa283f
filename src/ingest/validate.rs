// src/ingest/validate.rs
//! Structural gate run before any parsing: status, content-type family, size.

use crate::error::ValidationError;
use crate::ingest::types::{media_type_of, RawPayload};

/// Per-adapter validation rules.
#[derive(Debug, Clone)]
pub struct ValidationRules {
    pub expected_content_types: Vec<String>,
    pub min_response_bytes: usize,
}

impl ValidationRules {
    pub fn new<S: AsRef<str>>(expected: &[S], min_response_bytes: usize) -> Self {
        Self {
            expected_content_types: expected
                .iter()
                .map(|s| media_type_of(s.as_ref()))
                .collect(),
            min_response_bytes,
        }
    }
}

/// Checks run in order: status, content-type, size. The first failure wins.
pub fn validate(raw: &RawPayload, rules: &ValidationRules) -> Result<(), ValidationError> {
    if raw.status != 200 {
        return Err(ValidationError::BadStatus { status: raw.status });
    }

    let media = raw.media_type();
    let family_ok = rules.expected_content_types.is_empty()
        || rules
            .expected_content_types
            .iter()
            .any(|e| content_type_matches(e, &media));
    if !family_ok {
        return Err(ValidationError::BadContentType {
            expected: rules.expected_content_types.join(","),
            actual: raw.content_type.clone(),
        });
    }

    if raw.byte_len < rules.min_response_bytes {
        return Err(ValidationError::TooSmall {
            min: rules.min_response_bytes,
            actual: raw.byte_len,
        });
    }
    Ok(())
}

/// `text/*` style wildcards are allowed on the expected side.
/// The search API historically answers with `text/javascript` for JSON.
fn content_type_matches(expected: &str, actual: &str) -> bool {
    if let Some(prefix) = expected.strip_suffix("/*") {
        return actual.split('/').next() == Some(prefix);
    }
    expected == actual
}
