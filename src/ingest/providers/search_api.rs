// src/ingest/providers/search_api.rs
//! iTunes Search API. Accepts free-text identifiers; numeric ids are matched
//! against `trackId` when the result set contains them.
//!
//! The search API has no subtitle field. Listings often encode one in the
//! title as `"Name - Tagline"`, so the title is split on the first `" - "`.
//! That split is best effort: a name that itself contains `" - "` loses its
//! tail to the subtitle.

use async_trait::async_trait;
use std::collections::BTreeSet;

use super::{http_get, itunes, parse_app_id};
use crate::error::FetchError;
use crate::ingest::types::{
    CandidateRecord, CanonicalField, FetchOptions, RawPayload, SourceAdapter,
};

pub const NAME: &str = "itunes-search";
const DEFAULT_BASE: &str = "https://itunes.apple.com";
const RESULT_LIMIT: &str = "10";
const CONTENT_TYPES: &[&str] = &["application/json", "text/javascript"];

pub struct ItunesSearchAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl ItunesSearchAdapter {
    pub fn new(client: reqwest::Client, base_url: Option<String>) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        Self { client, base_url }
    }

    fn search_url(&self, term: &str, country: &str) -> Result<url::Url, FetchError> {
        url::Url::parse_with_params(
            &format!("{}/search", self.base_url),
            &[
                ("term", term),
                ("entity", "software"),
                ("country", country),
                ("limit", RESULT_LIMIT),
            ],
        )
        .map_err(|e| FetchError::Transport {
            message: format!("bad search url: {e}"),
        })
    }
}

/// Split `"Name - Tagline"` on the first `" - "`. Both halves must be non-empty.
pub fn split_combined_title(raw: &str) -> (String, Option<String>) {
    let trimmed = raw.trim();
    match trimmed.split_once(" - ") {
        Some((head, tail)) if !head.trim().is_empty() && !tail.trim().is_empty() => {
            (head.trim().to_string(), Some(tail.trim().to_string()))
        }
        _ => (trimmed.to_string(), None),
    }
}

#[async_trait]
impl SourceAdapter for ItunesSearchAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(
        &self,
        identifier: &str,
        options: &FetchOptions,
    ) -> Result<RawPayload, FetchError> {
        let term = identifier.trim();
        if term.is_empty() {
            return Err(super::invalid_identifier(identifier));
        }
        let url = self.search_url(term, &options.country)?;
        http_get(
            &self.client,
            url.as_str(),
            "application/json",
            NAME,
            identifier,
            options,
        )
        .await
    }

    fn expected_content_types(&self) -> &[&'static str] {
        CONTENT_TYPES
    }

    fn transform(&self, raw: &RawPayload) -> Result<CandidateRecord, String> {
        let results = itunes::results(&raw.body)?;
        let picked = itunes::pick_result(&results, parse_app_id(&raw.identifier))
            .ok_or_else(|| format!("search returned no result for {}", raw.identifier))?;

        let mut candidate = itunes::candidate_from_result(picked);
        if let Some(title) = candidate.title.take() {
            let (title, subtitle) = split_combined_title(&title);
            candidate.title = Some(title);
            candidate.subtitle = subtitle;
        }
        Ok(candidate)
    }

    fn expected_fields(&self) -> BTreeSet<CanonicalField> {
        itunes::expected_fields()
    }
}
