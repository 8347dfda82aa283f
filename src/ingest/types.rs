// src/ingest/types.rs
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// One captured upstream response. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPayload {
    pub source: String,
    pub identifier: String,
    pub fetched_at: DateTime<Utc>,
    pub status: u16,
    pub content_type: String,
    pub byte_len: usize,
    pub body: String,
}

impl RawPayload {
    pub fn new(
        source: impl Into<String>,
        identifier: impl Into<String>,
        status: u16,
        content_type: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let body = body.into();
        Self {
            source: source.into(),
            identifier: identifier.into(),
            fetched_at: Utc::now(),
            status,
            content_type: content_type.into(),
            byte_len: body.len(),
            body,
        }
    }

    pub fn with_fetched_at(mut self, at: DateTime<Utc>) -> Self {
        self.fetched_at = at;
        self
    }

    /// Lowercased media type without parameters (`text/html; charset=utf-8` → `text/html`).
    pub fn media_type(&self) -> String {
        media_type_of(&self.content_type)
    }

    /// Short sha256 fingerprint of the body, safe to log.
    pub fn body_digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(self.body.as_bytes());
        let mut out = String::with_capacity(16);
        for b in digest.iter().take(8) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }
}

pub(crate) fn media_type_of(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// What a response actually contains, independent of its HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadSignature {
    ListingPage,
    ReviewFragment,
    ErrorPage,
    BlockPage,
    Unknown,
}

impl PayloadSignature {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadSignature::ListingPage => "LISTING_PAGE",
            PayloadSignature::ReviewFragment => "REVIEW_FRAGMENT",
            PayloadSignature::ErrorPage => "ERROR_PAGE",
            PayloadSignature::BlockPage => "BLOCK_PAGE",
            PayloadSignature::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for PayloadSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter output before normalization. Every field is whatever the upstream gave us.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub developer: Option<String>,
    pub category: Option<String>,
    pub rating: Option<f64>,
    pub rating_count: Option<i64>,
    pub icon_url: Option<String>,
    /// Plural screenshot field.
    pub screenshot_urls: Vec<String>,
    /// Legacy singular screenshot field.
    pub screenshot_url: Option<String>,
    /// Raw field names the adapter neither maps nor knowingly ignores.
    pub unrecognized_fields: BTreeSet<String>,
}

impl CandidateRecord {
    /// Canonical fields carrying a non-empty value.
    pub fn present_fields(&self) -> BTreeSet<CanonicalField> {
        fn has(s: &Option<String>) -> bool {
            s.as_deref().is_some_and(|v| !v.trim().is_empty())
        }
        let mut out = BTreeSet::new();
        if has(&self.title) {
            out.insert(CanonicalField::Title);
        }
        if has(&self.subtitle) {
            out.insert(CanonicalField::Subtitle);
        }
        if has(&self.description) {
            out.insert(CanonicalField::Description);
        }
        if has(&self.developer) {
            out.insert(CanonicalField::Developer);
        }
        if has(&self.category) {
            out.insert(CanonicalField::Category);
        }
        if self.rating.is_some() {
            out.insert(CanonicalField::Rating);
        }
        if self.rating_count.is_some() {
            out.insert(CanonicalField::RatingCount);
        }
        if has(&self.icon_url) {
            out.insert(CanonicalField::IconUrl);
        }
        if !self.screenshot_urls.is_empty() || has(&self.screenshot_url) {
            out.insert(CanonicalField::ScreenshotUrls);
        }
        out
    }
}

/// Content fields of the canonical schema tracked by drift detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CanonicalField {
    Title,
    Subtitle,
    Description,
    Developer,
    Category,
    Rating,
    RatingCount,
    IconUrl,
    ScreenshotUrls,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 9] = [
        CanonicalField::Title,
        CanonicalField::Subtitle,
        CanonicalField::Description,
        CanonicalField::Developer,
        CanonicalField::Category,
        CanonicalField::Rating,
        CanonicalField::RatingCount,
        CanonicalField::IconUrl,
        CanonicalField::ScreenshotUrls,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::Title => "title",
            CanonicalField::Subtitle => "subtitle",
            CanonicalField::Description => "description",
            CanonicalField::Developer => "developer",
            CanonicalField::Category => "category",
            CanonicalField::Rating => "rating",
            CanonicalField::RatingCount => "ratingCount",
            CanonicalField::IconUrl => "iconUrl",
            CanonicalField::ScreenshotUrls => "screenshotUrls",
        }
    }
}

/// The canonical output schema consumed by downstream reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    pub identifier: String,
    pub title: String,
    pub subtitle: String,
    pub description: String,
    pub developer: String,
    pub category: String,
    pub rating: f64,
    pub rating_count: u64,
    pub icon_url: String,
    pub screenshot_urls: Vec<String>,
    pub source_name: String,
    pub schema_version: u32,
    pub normalized_at: DateTime<Utc>,
}

impl NormalizedRecord {
    /// Equality over everything except the `normalized_at` stamp.
    pub fn same_content(&self, other: &NormalizedRecord) -> bool {
        let mut a = self.clone();
        a.normalized_at = other.normalized_at;
        &a == other
    }
}

/// Per-call fetch parameters handed to adapters by the orchestrator.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub country: String,
    /// Bodies larger than this are dropped unread.
    pub max_body_bytes: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            country: "us".to_string(),
            max_body_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Binds one upstream to the common fetch / classify / transform capability set.
///
/// Adapters know nothing about each other; ordering and skipping is the
/// orchestrator's job.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Unique name, also the rate-limit bucket key.
    fn name(&self) -> &str;

    /// Network-level fetch. Non-2xx statuses other than 429/5xx come back as payloads.
    async fn fetch(&self, identifier: &str, options: &FetchOptions)
        -> Result<RawPayload, FetchError>;

    /// Media types this adapter accepts (`application/json`, `text/html`, ...).
    fn expected_content_types(&self) -> &[&'static str];

    fn classify(&self, raw: &RawPayload) -> PayloadSignature {
        crate::ingest::classify::classify(raw)
    }

    /// Pure interpretation of a payload already classified as a listing page.
    fn transform(&self, raw: &RawPayload) -> Result<CandidateRecord, String>;

    /// Canonical fields this source is expected to fill; drives drift detection.
    fn expected_fields(&self) -> BTreeSet<CanonicalField> {
        CanonicalField::ALL.into_iter().collect()
    }
}
