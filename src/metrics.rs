use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::ingest::health::AdapterHealth;
use crate::ingest::Orchestrator;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the process-wide Prometheus recorder. Fails if one is already installed.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        crate::ingest::ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Wrap an existing handle (e.g. from a recorder that isn't installed globally).
    pub fn from_handle(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// `/metrics` in Prometheus exposition format and `/health` with per-adapter health
    /// (empty list when no orchestrator is attached).
    pub fn router(&self, orchestrator: Option<Arc<Orchestrator>>) -> Router {
        let handle = self.handle.clone();
        Router::new()
            .route(
                "/metrics",
                get(move || {
                    let h = handle.clone();
                    async move { h.render() }
                }),
            )
            .route(
                "/health",
                get(move || {
                    let orch = orchestrator.clone();
                    async move {
                        let health: Vec<AdapterHealth> =
                            orch.map(|o| o.health()).unwrap_or_default();
                        Json(health)
                    }
                }),
            )
    }
}
