// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use listing_ingest::config::AdapterConfig;
use listing_ingest::error::FetchError;
use listing_ingest::ingest::drift::DriftSignal;
use listing_ingest::ingest::health::AdapterHealth;
use listing_ingest::ingest::sink::MetricsSink;
use listing_ingest::ingest::types::{
    CandidateRecord, CanonicalField, FetchOptions, RawPayload, SourceAdapter,
};

pub const LISTING_HTML: &str = r#"<html><body>
<h1 class="product-header__title">Mock App</h1>
<h2 class="product-header__subtitle">Does mock things</h2>
</body></html>"#;

pub const REVIEW_HTML: &str = r#"<div class="we-modal"><div class="we-customer-review">Great app!</div></div>"#;

pub const BLOCK_HTML: &str = "<html><body><h1>Access Denied</h1>You don't have permission to access this server.</body></html>";

pub const UNKNOWN_HTML: &str = "<html><body><p>Something else entirely</p></body></html>";

type Responder = dyn Fn(&str) -> Result<RawPayload, FetchError> + Send + Sync;

/// Scripted adapter: `respond` builds the payload, `transform` turns any
/// listing into a fixed candidate and counts its calls.
pub struct MockAdapter {
    pub name: String,
    respond: Box<Responder>,
    pub delay: Option<Duration>,
    pub fetch_calls: AtomicUsize,
    pub transform_calls: AtomicUsize,
    pub expected: Option<BTreeSet<CanonicalField>>,
    pub candidate: Box<dyn Fn(usize) -> CandidateRecord + Send + Sync>,
}

impl MockAdapter {
    pub fn new<F>(name: &str, respond: F) -> Self
    where
        F: Fn(&str) -> Result<RawPayload, FetchError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            respond: Box::new(respond),
            delay: None,
            fetch_calls: AtomicUsize::new(0),
            transform_calls: AtomicUsize::new(0),
            expected: None,
            candidate: Box::new(|_| CandidateRecord {
                title: Some("Mock App".into()),
                subtitle: Some("Does mock things".into()),
                ..Default::default()
            }),
        }
    }

    /// Always answers `status` with an HTML body.
    pub fn html(name: &str, status: u16, body: &'static str) -> Self {
        let src = name.to_string();
        Self::new(name, move |id| {
            Ok(RawPayload::new(
                src.clone(),
                id,
                status,
                "text/html; charset=utf-8",
                body,
            ))
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_expected(mut self, fields: &[CanonicalField]) -> Self {
        self.expected = Some(fields.iter().copied().collect());
        self
    }

    pub fn with_candidate<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) -> CandidateRecord + Send + Sync + 'static,
    {
        self.candidate = Box::new(f);
        self
    }

    pub fn transforms(&self) -> usize {
        self.transform_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, identifier: &str, _options: &FetchOptions) -> Result<RawPayload, FetchError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        (self.respond)(identifier)
    }

    fn expected_content_types(&self) -> &[&'static str] {
        &["text/html", "application/json"]
    }

    fn transform(&self, _raw: &RawPayload) -> Result<CandidateRecord, String> {
        let n = self.transform_calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.candidate)(n))
    }

    fn expected_fields(&self) -> BTreeSet<CanonicalField> {
        self.expected
            .clone()
            .unwrap_or_else(|| CanonicalField::ALL.into_iter().collect())
    }
}

pub fn adapter_cfg(name: &str, priority: i32) -> AdapterConfig {
    let mut cfg = AdapterConfig::new(name, priority);
    cfg.min_response_bytes = 1;
    cfg
}

pub fn entry(
    adapter: &Arc<MockAdapter>,
    priority: i32,
) -> (Arc<dyn SourceAdapter>, AdapterConfig) {
    let cfg = adapter_cfg(&adapter.name, priority);
    (adapter.clone() as Arc<dyn SourceAdapter>, cfg)
}

/// Sink that remembers everything it was told.
#[derive(Default)]
pub struct CollectingSink {
    pub health: Mutex<Vec<AdapterHealth>>,
    pub drift: Mutex<Vec<DriftSignal>>,
}

impl MetricsSink for CollectingSink {
    fn health_updated(&self, health: &AdapterHealth) {
        self.health.lock().unwrap().push(health.clone());
    }

    fn drift_signal(&self, signal: &DriftSignal) {
        self.drift.lock().unwrap().push(signal.clone());
    }
}
