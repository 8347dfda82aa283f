// src/ingest/providers/mod.rs
pub mod itunes;
pub mod lookup_api;
pub mod search_api;
pub mod storefront_html;

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AdapterConfig, PipelineConfig};
use crate::error::FetchError;
use crate::ingest::types::{FetchOptions, RawPayload, SourceAdapter};

use lookup_api::ItunesLookupAdapter;
use search_api::ItunesSearchAdapter;
use storefront_html::StorefrontHtmlAdapter;

const USER_AGENT: &str = "listing-ingest/0.1 (+metadata ingestion)";

/// Shared client; per-request deadlines come from `FetchOptions`.
pub fn default_http_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(4))
        .build()?;
    Ok(client)
}

/// GET `url` and capture whatever came back.
///
/// 429 and 5xx carry nothing worth classifying and fail as `HttpStatus`;
/// every other status is returned as a payload for the validator to judge.
pub(crate) async fn http_get(
    client: &reqwest::Client,
    url: &str,
    accept: &str,
    source: &str,
    identifier: &str,
    options: &FetchOptions,
) -> Result<RawPayload, FetchError> {
    let resp = client
        .get(url)
        .header(reqwest::header::ACCEPT, accept)
        .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.8")
        .timeout(options.timeout)
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(e, options.timeout))?;

    let status = resp.status().as_u16();
    if status == 429 || status >= 500 {
        return Err(FetchError::HttpStatus { status });
    }
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = read_capped(resp, options).await?;

    Ok(RawPayload::new(source, identifier, status, content_type, body))
}

/// Read the body chunk by chunk, giving up as soon as it passes the cap.
async fn read_capped(mut resp: reqwest::Response, options: &FetchOptions) -> Result<String, FetchError> {
    let limit = options.max_body_bytes;
    if resp.content_length().is_some_and(|n| n > limit as u64) {
        return Err(FetchError::BodyTooLarge { limit });
    }
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| FetchError::from_reqwest(e, options.timeout))?
    {
        if buf.len() + chunk.len() > limit {
            return Err(FetchError::BodyTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Accepts `123456789` or `id123456789`; App Store ids are numeric.
pub fn parse_app_id(identifier: &str) -> Option<&str> {
    let t = identifier.trim();
    let digits = t.strip_prefix("id").unwrap_or(t);
    (!digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())).then_some(digits)
}

pub(crate) fn invalid_identifier(identifier: &str) -> FetchError {
    FetchError::InvalidIdentifier {
        identifier: identifier.to_string(),
    }
}

/// Instantiate the built-in adapter for each configured entry (disabled ones
/// included; the orchestrator decides what to skip).
pub fn build_adapters(
    cfg: &PipelineConfig,
    client: reqwest::Client,
) -> Result<Vec<(Arc<dyn SourceAdapter>, AdapterConfig)>> {
    let mut out: Vec<(Arc<dyn SourceAdapter>, AdapterConfig)> = Vec::new();
    for a in &cfg.adapters {
        let base = a.base_url.clone();
        let adapter: Arc<dyn SourceAdapter> = match a.name.as_str() {
            search_api::NAME => Arc::new(ItunesSearchAdapter::new(client.clone(), base)),
            lookup_api::NAME => Arc::new(ItunesLookupAdapter::new(client.clone(), base)),
            storefront_html::NAME => Arc::new(StorefrontHtmlAdapter::new(client.clone(), base)),
            other => bail!("no built-in adapter named {other:?}"),
        };
        out.push((adapter, a.clone()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_id_forms() {
        assert_eq!(parse_app_id("570060128"), Some("570060128"));
        assert_eq!(parse_app_id(" id570060128 "), Some("570060128"));
        assert_eq!(parse_app_id("id"), None);
        assert_eq!(parse_app_id("duolingo"), None);
        assert_eq!(parse_app_id(""), None);
    }

    #[test]
    fn unknown_adapter_name_is_an_error() {
        let mut cfg = PipelineConfig::default();
        cfg.adapters.push(AdapterConfig::new("play-store", 5));
        let client = reqwest::Client::new();
        assert!(build_adapters(&cfg, client).is_err());
    }

    #[test]
    fn default_config_builds_all_three() {
        let cfg = PipelineConfig::default();
        let built = build_adapters(&cfg, reqwest::Client::new()).unwrap();
        let names: Vec<_> = built.iter().map(|(a, _)| a.name().to_string()).collect();
        assert_eq!(names, ["itunes-lookup", "storefront-html", "itunes-search"]);
    }
}
