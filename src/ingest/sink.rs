// src/ingest/sink.rs
//! Outbound monitoring hooks. Implementations must be fire-and-forget: a
//! failing sink may log, but must never fail or block an ingestion call.

use metrics::{counter, gauge};

use crate::ingest::drift::DriftSignal;
use crate::ingest::health::AdapterHealth;

pub trait MetricsSink: Send + Sync {
    fn health_updated(&self, health: &AdapterHealth);
    fn drift_signal(&self, signal: &DriftSignal);
}

/// Discards everything.
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn health_updated(&self, _health: &AdapterHealth) {}
    fn drift_signal(&self, _signal: &DriftSignal) {}
}

/// Publishes through the `metrics` facade (Prometheus when the recorder is installed)
/// and logs drift signals as warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn health_updated(&self, health: &AdapterHealth) {
        let adapter = health.adapter.clone();
        gauge!("ingest_adapter_success_rate", "adapter" => adapter.clone())
            .set(health.success_rate);
        gauge!("ingest_adapter_consecutive_failures", "adapter" => adapter.clone())
            .set(f64::from(health.consecutive_failures));
        if let Some(ms) = health.ema_latency_ms {
            gauge!("ingest_adapter_latency_ema_ms", "adapter" => adapter).set(ms);
        }
    }

    fn drift_signal(&self, signal: &DriftSignal) {
        counter!(
            "ingest_drift_signals_total",
            "source" => signal.source().to_string(),
            "kind" => signal.kind()
        )
        .increment(1);
        tracing::warn!(
            target: "ingest",
            source = signal.source(),
            kind = signal.kind(),
            field = signal.field().unwrap_or("-"),
            "schema drift detected; adapter mapping needs review"
        );
    }
}
