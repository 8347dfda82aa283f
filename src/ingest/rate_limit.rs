//! Per-source token buckets.
//!
//! Refill is lazy: every `acquire` / peek recomputes tokens from the elapsed
//! monotonic time, so no background timer exists. A caller holds the bucket's
//! async mutex across its wait, which makes waiting FIFO per source and keeps
//! the token count from ever going negative. Buckets are independent; draining
//! one source never delays another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::RateLimitError;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Starts full.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec: if refill_per_sec.is_finite() && refill_per_sec > 0.0 {
                refill_per_sec
            } else {
                1.0
            },
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    fn refill(&self, st: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(st.last_refill).as_secs_f64();
        st.tokens = (st.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        st.last_refill = now;
    }

    /// Wait until `cost` tokens exist, then take them.
    pub async fn acquire(&self, cost: u32) {
        let cost = f64::from(cost);
        let mut st = self.state.lock().await;
        loop {
            self.refill(&mut st, Instant::now());
            if st.tokens >= cost {
                st.tokens -= cost;
                return;
            }
            let deficit = cost - st.tokens;
            let wait = Duration::from_secs_f64(deficit / self.refill_per_sec)
                .max(Duration::from_millis(1));
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-blocking; returns `None` while another caller holds the bucket.
    pub fn try_available(&self) -> Option<f64> {
        let mut st = self.state.try_lock().ok()?;
        self.refill(&mut st, Instant::now());
        Some(st.tokens)
    }
}

/// Registry of buckets keyed by source name.
#[derive(Debug, Default, Clone)]
pub struct RateLimiter {
    buckets: HashMap<String, Arc<TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: impl Into<String>, cfg: &RateLimitConfig) {
        self.buckets.insert(
            source.into(),
            Arc::new(TokenBucket::new(cfg.capacity, cfg.refill_per_second)),
        );
    }

    pub fn with_source(mut self, source: impl Into<String>, cfg: &RateLimitConfig) -> Self {
        self.register(source, cfg);
        self
    }

    fn bucket(&self, source: &str) -> Result<&Arc<TokenBucket>, RateLimitError> {
        self.buckets
            .get(source)
            .ok_or_else(|| RateLimitError::UnknownSource {
                source_name: source.to_string(),
            })
    }

    /// Suspend until `cost` tokens are available for `source`, then deduct them.
    pub async fn acquire(&self, source: &str, cost: u32) -> Result<(), RateLimitError> {
        let bucket = self.bucket(source)?;
        if cost > bucket.capacity() {
            return Err(RateLimitError::CostExceedsCapacity {
                source_name: source.to_string(),
                cost,
                capacity: bucket.capacity(),
            });
        }
        let t0 = Instant::now();
        bucket.acquire(cost).await;
        let waited = t0.elapsed();
        if waited >= Duration::from_millis(1) {
            tracing::debug!(
                target: "ingest",
                source,
                waited_ms = waited.as_millis() as u64,
                "rate limiter wait"
            );
        }
        Ok(())
    }

    /// Diagnostic peek. Reports 0 while a caller is parked on the bucket.
    pub fn available_tokens(&self, source: &str) -> Result<f64, RateLimitError> {
        let bucket = self.bucket(source)?;
        Ok(bucket.try_available().unwrap_or(0.0))
    }
}
