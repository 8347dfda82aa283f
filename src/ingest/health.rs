//! # Adapter Health
//! Per-adapter outcome tracking: rolling success rate over the last N
//! attempts, EMA latency, consecutive failures and last success/failure times.
//!
//! Only the orchestrator records outcomes (`record` is crate-private);
//! everyone else reads copies via [`HealthTracker::snapshot`].

use std::{collections::VecDeque, sync::Mutex, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;

const DEFAULT_WINDOW: usize = 50;
/// Weight of the newest latency sample in the moving average.
const EMA_ALPHA: f64 = 0.2;

/// Read-only view of one adapter's health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterHealth {
    pub adapter: String,
    /// Successes / attempts over the rolling window; 1.0 before any attempt.
    pub success_rate: f64,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub ema_latency_ms: Option<f64>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    outcomes: VecDeque<bool>,
    attempts: u64,
    successes: u64,
    consecutive_failures: u32,
    ema_latency_ms: Option<f64>,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Thread-safe health record owned by one registered adapter.
#[derive(Debug)]
pub struct HealthTracker {
    adapter: String,
    window: usize,
    inner: Mutex<Inner>,
}

impl HealthTracker {
    pub fn new(adapter: impl Into<String>) -> Self {
        Self::with_window(adapter, DEFAULT_WINDOW)
    }

    pub fn with_window(adapter: impl Into<String>, window: usize) -> Self {
        Self {
            adapter: adapter.into(),
            window: window.max(1),
            inner: Mutex::new(Inner {
                outcomes: VecDeque::with_capacity(window.max(1)),
                attempts: 0,
                successes: 0,
                consecutive_failures: 0,
                ema_latency_ms: None,
                last_success_at: None,
                last_failure_at: None,
            }),
        }
    }

    /// Record one attempt and return the updated view.
    pub(crate) fn record(&self, success: bool, latency: Duration, at: DateTime<Utc>) -> AdapterHealth {
        let mut g = self.inner.lock().expect("health mutex poisoned");

        g.outcomes.push_back(success);
        while g.outcomes.len() > self.window {
            g.outcomes.pop_front();
        }
        g.attempts += 1;
        if success {
            g.successes += 1;
            g.consecutive_failures = 0;
            g.last_success_at = Some(at);
        } else {
            g.consecutive_failures = g.consecutive_failures.saturating_add(1);
            g.last_failure_at = Some(at);
        }

        let ms = latency.as_secs_f64() * 1_000.0;
        g.ema_latency_ms = Some(match g.ema_latency_ms {
            Some(prev) => EMA_ALPHA * ms + (1.0 - EMA_ALPHA) * prev,
            None => ms,
        });

        self.view(&g)
    }

    pub fn snapshot(&self) -> AdapterHealth {
        let g = self.inner.lock().expect("health mutex poisoned");
        self.view(&g)
    }

    fn view(&self, g: &Inner) -> AdapterHealth {
        let n = g.outcomes.len();
        let ok = g.outcomes.iter().filter(|o| **o).count();
        AdapterHealth {
            adapter: self.adapter.clone(),
            success_rate: if n > 0 { ok as f64 / n as f64 } else { 1.0 },
            attempts: g.attempts,
            successes: g.successes,
            failures: g.attempts - g.successes,
            consecutive_failures: g.consecutive_failures,
            ema_latency_ms: g.ema_latency_ms,
            last_success_at: g.last_success_at,
            last_failure_at: g.last_failure_at,
        }
    }
}
