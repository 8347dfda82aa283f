// src/ingest/mod.rs
pub mod batch;
pub mod classify;
pub mod drift;
pub mod health;
pub mod normalize;
pub mod orchestrator;
pub mod providers;
pub mod rate_limit;
pub mod sink;
pub mod snapshot;
pub mod types;
pub mod validate;

pub use batch::{BatchFetcher, BatchResult};
pub use orchestrator::{AttemptOutcome, Orchestrator, ResolveState};
pub use types::{
    CandidateRecord, CanonicalField, FetchOptions, NormalizedRecord, PayloadSignature, RawPayload,
    SourceAdapter,
};

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_attempts_total", "Adapter attempts started, per source.");
        describe_counter!(
            "ingest_rejections_total",
            "Adapter attempts rejected, per source and stage."
        );
        describe_counter!("ingest_resolved_total", "Identifiers resolved, per winning source.");
        describe_counter!(
            "ingest_exhausted_total",
            "Identifiers for which every source failed."
        );
        describe_counter!(
            "ingest_batch_worker_failures_total",
            "Batch worker tasks that panicked or were cancelled."
        );
        describe_counter!(
            "ingest_drift_signals_total",
            "Schema drift signals, per source and kind."
        );
        describe_counter!(
            "ingest_snapshot_write_errors_total",
            "Snapshot writes that failed (resolution continued)."
        );
        describe_histogram!("ingest_fetch_ms", "Adapter fetch time in milliseconds.");
        describe_gauge!(
            "ingest_adapter_success_rate",
            "Rolling success rate per adapter."
        );
        describe_gauge!(
            "ingest_adapter_consecutive_failures",
            "Consecutive failed attempts per adapter."
        );
        describe_gauge!(
            "ingest_adapter_latency_ema_ms",
            "Exponential moving average of fetch latency per adapter."
        );
    });
}
