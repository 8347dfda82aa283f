// src/ingest/providers/lookup_api.rs
//! iTunes Lookup API: exact match by numeric App Store id.

use async_trait::async_trait;
use std::collections::BTreeSet;

use super::{http_get, itunes, parse_app_id};
use crate::error::FetchError;
use crate::ingest::types::{
    CandidateRecord, CanonicalField, FetchOptions, RawPayload, SourceAdapter,
};

pub const NAME: &str = "itunes-lookup";
const DEFAULT_BASE: &str = "https://itunes.apple.com";
const CONTENT_TYPES: &[&str] = &["application/json", "text/javascript"];

pub struct ItunesLookupAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl ItunesLookupAdapter {
    pub fn new(client: reqwest::Client, base_url: Option<String>) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        Self { client, base_url }
    }

    fn lookup_url(&self, app_id: &str, country: &str) -> Result<url::Url, FetchError> {
        url::Url::parse_with_params(
            &format!("{}/lookup", self.base_url),
            &[("id", app_id), ("country", country)],
        )
        .map_err(|e| FetchError::Transport {
            message: format!("bad lookup url: {e}"),
        })
    }
}

#[async_trait]
impl SourceAdapter for ItunesLookupAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(
        &self,
        identifier: &str,
        options: &FetchOptions,
    ) -> Result<RawPayload, FetchError> {
        let app_id = parse_app_id(identifier).ok_or_else(|| super::invalid_identifier(identifier))?;
        let url = self.lookup_url(app_id, &options.country)?;
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
            .ok_or_else(|| format!("lookup returned no result for {}", raw.identifier))?;
        Ok(itunes::candidate_from_result(picked))
    }

    fn expected_fields(&self) -> BTreeSet<CanonicalField> {
        itunes::expected_fields()
    }
}
