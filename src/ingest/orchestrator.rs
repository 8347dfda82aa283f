// src/ingest/orchestrator.rs
//! Per-identifier resolution across prioritized adapters.
//!
//! `PENDING → TRYING(i) → {SUCCEEDED | EXHAUSTED}`; [`step`] is the whole
//! transition table. Each attempt runs rate limit → fetch (with deadline) →
//! validate → classify → transform → normalize, and every attempt is
//! persisted as a snapshot whether it produced a record or not.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{AdapterConfig, PipelineConfig};
use crate::error::{AttemptSummary, FetchError, Rejection, ResolveError};
use crate::ingest::drift::{DriftDetector, DriftParams};
use crate::ingest::health::{AdapterHealth, HealthTracker};
use crate::ingest::normalize::Normalizer;
use crate::ingest::rate_limit::RateLimiter;
use crate::ingest::sink::{MetricsSink, NoopSink};
use crate::ingest::snapshot::{
    reprocess, MetadataSnapshot, PipelineMeta, ReprocessReport, SnapshotStore,
};
use crate::ingest::types::{
    CandidateRecord, FetchOptions, NormalizedRecord, PayloadSignature, RawPayload, SourceAdapter,
};
use crate::ingest::validate::{validate, ValidationRules};

/// Result of one adapter attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Accepted(Box<NormalizedRecord>),
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveState {
    Pending,
    /// Index into the priority-ordered adapter list.
    Trying(usize),
    Succeeded(Box<NormalizedRecord>),
    Exhausted,
}

/// Transition function. `enabled[i]` tells whether adapter `i` (priority
/// order) may be tried; disabled ones are skipped.
pub fn step(state: ResolveState, outcome: Option<AttemptOutcome>, enabled: &[bool]) -> ResolveState {
    let next_from = |start: usize| {
        enabled
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, on)| **on)
            .map_or(ResolveState::Exhausted, |(i, _)| ResolveState::Trying(i))
    };
    match (state, outcome) {
        (ResolveState::Pending, _) => next_from(0),
        (ResolveState::Trying(_), Some(AttemptOutcome::Accepted(record))) => {
            ResolveState::Succeeded(record)
        }
        (ResolveState::Trying(i), _) => next_from(i + 1),
        (terminal, _) => terminal,
    }
}

pub struct RegisteredAdapter {
    adapter: Arc<dyn SourceAdapter>,
    config: AdapterConfig,
    rules: ValidationRules,
    health: HealthTracker,
}

impl RegisteredAdapter {
    fn new(adapter: Arc<dyn SourceAdapter>, config: AdapterConfig) -> Self {
        let rules = ValidationRules::new(adapter.expected_content_types(), config.min_response_bytes);
        let health = HealthTracker::new(adapter.name());
        Self {
            adapter,
            config,
            rules,
            health,
        }
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }
}

/// What an attempt left behind, for the snapshot and the drift detector.
#[derive(Default)]
struct AttemptTrace {
    raw: Option<RawPayload>,
    signature: Option<PayloadSignature>,
    candidate: Option<CandidateRecord>,
    fetch_latency: Option<Duration>,
}

pub struct Orchestrator {
    adapters: Vec<RegisteredAdapter>,
    limiter: RateLimiter,
    store: Arc<dyn SnapshotStore>,
    drift: DriftDetector,
    sink: Arc<dyn MetricsSink>,
    normalizer: Normalizer,
}

impl Orchestrator {
    /// Adapters are tried in ascending `priority`; ties keep the given order.
    /// One rate-limit bucket is registered per adapter name.
    pub fn new(
        adapters: Vec<(Arc<dyn SourceAdapter>, AdapterConfig)>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let mut adapters: Vec<RegisteredAdapter> = adapters
            .into_iter()
            .map(|(a, cfg)| RegisteredAdapter::new(a, cfg))
            .collect();
        adapters.sort_by_key(|r| r.config.priority);

        let mut limiter = RateLimiter::new();
        for r in &adapters {
            limiter.register(r.name(), &r.config.rate_limit);
        }

        Self {
            adapters,
            limiter,
            store,
            drift: DriftDetector::new(DriftParams::default()),
            sink: Arc::new(NoopSink),
            normalizer: Normalizer::default(),
        }
    }

    /// Same as [`Orchestrator::new`] with drift parameters taken from `cfg`.
    pub fn from_config(
        cfg: &PipelineConfig,
        adapters: Vec<(Arc<dyn SourceAdapter>, AdapterConfig)>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self::new(adapters, store).with_drift(DriftDetector::new(DriftParams {
            window_size: cfg.drift_window_size,
            threshold: cfg.drift_threshold,
            max_missing_fields: cfg.drift_max_missing_fields,
        }))
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_drift(mut self, drift: DriftDetector) -> Self {
        self.drift = drift;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn adapters(&self) -> &[RegisteredAdapter] {
        &self.adapters
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Copies of every adapter's health, in priority order.
    pub fn health(&self) -> Vec<AdapterHealth> {
        self.adapters.iter().map(|r| r.health.snapshot()).collect()
    }

    pub fn adapter(&self, name: &str) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .find(|r| r.name() == name)
            .map(|r| &r.adapter)
    }

    /// Resolve one identifier. No adapter is tried twice.
    pub async fn resolve(&self, identifier: &str) -> Result<NormalizedRecord, ResolveError> {
        let enabled: Vec<bool> = self.adapters.iter().map(|r| r.config.enabled).collect();
        let mut attempts: Vec<AttemptSummary> = Vec::new();
        let mut state = ResolveState::Pending;

        loop {
            state = match state {
                ResolveState::Succeeded(record) => {
                    counter!("ingest_resolved_total", "source" => record.source_name.clone())
                        .increment(1);
                    tracing::info!(
                        target: "ingest",
                        identifier,
                        source = %record.source_name,
                        failed_attempts = attempts.len(),
                        "identifier resolved"
                    );
                    return Ok(*record);
                }
                ResolveState::Exhausted => {
                    counter!("ingest_exhausted_total").increment(1);
                    tracing::warn!(
                        target: "ingest",
                        identifier,
                        attempts = attempts.len(),
                        "all sources failed"
                    );
                    return Err(ResolveError::AllSourcesFailed {
                        identifier: identifier.to_string(),
                        attempts,
                    });
                }
                ResolveState::Pending => step(ResolveState::Pending, None, &enabled),
                ResolveState::Trying(i) => {
                    let outcome = self.attempt(&self.adapters[i], identifier).await;
                    if let AttemptOutcome::Rejected(rejection) = &outcome {
                        attempts.push(AttemptSummary {
                            adapter: self.adapters[i].name().to_string(),
                            rejection: rejection.clone(),
                        });
                    }
                    step(ResolveState::Trying(i), Some(outcome), &enabled)
                }
            };
        }
    }

    async fn attempt(&self, reg: &RegisteredAdapter, identifier: &str) -> AttemptOutcome {
        let source = reg.name();
        let started = Instant::now();
        counter!("ingest_attempts_total", "source" => source.to_string()).increment(1);

        let mut trace = AttemptTrace::default();
        let result = self.run_stages(reg, identifier, &mut trace).await;
        let elapsed = started.elapsed();

        let health = reg.health.record(
            result.is_ok(),
            trace.fetch_latency.unwrap_or(elapsed),
            Utc::now(),
        );
        self.sink.health_updated(&health);

        match &result {
            Ok(_) => {
                if let Some(candidate) = &trace.candidate {
                    let signals = self.drift.observe(
                        source,
                        &reg.adapter.expected_fields(),
                        &candidate.present_fields(),
                        &candidate.unrecognized_fields,
                    );
                    for s in &signals {
                        self.sink.drift_signal(s);
                    }
                }
            }
            Err(rejection) => {
                counter!(
                    "ingest_rejections_total",
                    "source" => source.to_string(),
                    "stage" => rejection.stage()
                )
                .increment(1);
                tracing::warn!(
                    target: "ingest",
                    source,
                    identifier,
                    stage = rejection.stage(),
                    signature = trace.signature.map(|s| s.as_str()).unwrap_or("-"),
                    body_sha = %trace.raw.as_ref().map(|r| r.body_digest()).unwrap_or_default(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %rejection,
                    "attempt rejected"
                );
            }
        }

        let (record, rejection) = match &result {
            Ok(r) => (Some(r.clone()), None),
            Err(e) => (None, Some(e.clone())),
        };
        let snapshot = MetadataSnapshot::new(
            identifier,
            trace.raw,
            trace.signature,
            record,
            rejection,
            PipelineMeta {
                adapter: source.to_string(),
                schema_version: self.normalizer.schema_version(),
                elapsed_ms: elapsed.as_millis() as u64,
            },
        );
        let snapshot_id = snapshot.id.clone();
        if let Err(e) = self.store.save(snapshot).await {
            counter!("ingest_snapshot_write_errors_total").increment(1);
            tracing::error!(target: "ingest", source, identifier, error = ?e, "snapshot write failed");
        } else {
            tracing::debug!(target: "ingest", source, identifier, snapshot = %snapshot_id, "snapshot stored");
        }

        match result {
            Ok(record) => AttemptOutcome::Accepted(Box::new(record)),
            Err(rejection) => AttemptOutcome::Rejected(rejection),
        }
    }

    async fn run_stages(
        &self,
        reg: &RegisteredAdapter,
        identifier: &str,
        trace: &mut AttemptTrace,
    ) -> Result<NormalizedRecord, Rejection> {
        let source = reg.name();
        self.limiter.acquire(source, 1).await?;

        let options = FetchOptions {
            timeout: reg.config.timeout(),
            country: reg.config.country.clone(),
            max_body_bytes: reg.config.max_response_bytes,
        };
        let fetch_started = Instant::now();
        let fetched = tokio::time::timeout(options.timeout, reg.adapter.fetch(identifier, &options)).await;
        let fetch_latency = fetch_started.elapsed();
        trace.fetch_latency = Some(fetch_latency);
        histogram!("ingest_fetch_ms", "source" => source.to_string())
            .record(fetch_latency.as_secs_f64() * 1_000.0);

        let raw = match fetched {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(FetchError::Timeout {
                    after_ms: options.timeout.as_millis() as u64,
                }
                .into())
            }
        };
        tracing::debug!(
            target: "ingest",
            source,
            identifier,
            status = raw.status,
            bytes = raw.byte_len,
            body_sha = %raw.body_digest(),
            elapsed_ms = fetch_latency.as_millis() as u64,
            "fetched"
        );

        let raw = trace.raw.insert(raw);
        validate(raw, &reg.rules)?;

        let signature = reg.adapter.classify(raw);
        trace.signature = Some(signature);
        if signature != PayloadSignature::ListingPage {
            return Err(Rejection::Classification { signature });
        }

        let candidate = reg
            .adapter
            .transform(raw)
            .map_err(|message| Rejection::Transform { message })?;
        let record = self.normalizer.normalize(&candidate, identifier, source);
        trace.candidate = Some(candidate);
        Ok(record)
    }

    /// Re-derive records from `source_name`'s stored snapshots. Never fetches.
    pub async fn reprocess(
        &self,
        source_name: &str,
        since: Option<DateTime<Utc>>,
        normalizer: &Normalizer,
    ) -> Result<ReprocessReport> {
        let adapter = self
            .adapter(source_name)
            .ok_or_else(|| anyhow!("no adapter named {source_name:?}"))?;
        reprocess(self.store.as_ref(), adapter.as_ref(), since, normalizer).await
    }
}
