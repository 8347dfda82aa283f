// src/config/pipeline.rs
//! Pipeline configuration: per-adapter settings plus batch and drift knobs.
//!
//! TOML shape:
//! ```toml
//! batch_size = 10
//! inter_batch_delay_ms = 2000
//!
//! [[adapters]]
//! name = "itunes-lookup"
//! priority = 10
//! rate_limit = { capacity = 100, refill_per_second = 1.67 }
//! min_response_bytes = 64
//! max_response_bytes = 5242880
//! timeout_ms = 8000
//! ```

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "INGEST_CONFIG_PATH";

fn default_batch_size() -> usize {
    10
}
fn default_inter_batch_delay_ms() -> u64 {
    2_000
}
fn default_drift_window_size() -> usize {
    100
}
fn default_drift_threshold() -> f64 {
    0.5
}
fn default_drift_max_missing_fields() -> usize {
    3
}
fn default_enabled() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_max_response_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_country() -> String {
    "us".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl Default for RateLimitConfig {
    /// ~100 requests per minute.
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_per_second: 1.67,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub name: String,
    /// Lower is tried first.
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub min_response_bytes: usize,
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Overrides the adapter's built-in endpoint (tests, proxies).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_country")]
    pub country: String,
}

impl AdapterConfig {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            rate_limit: RateLimitConfig::default(),
            min_response_bytes: 0,
            max_response_bytes: default_max_response_bytes(),
            timeout_ms: default_timeout_ms(),
            base_url: None,
            country: default_country(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
    #[serde(default = "default_drift_window_size")]
    pub drift_window_size: usize,
    /// Fraction of the window in `[0, 1]`.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,
    #[serde(default = "default_drift_max_missing_fields")]
    pub drift_max_missing_fields: usize,
    #[serde(default)]
    pub adapters: Vec<AdapterConfig>,
}

impl Default for PipelineConfig {
    /// Built-in three-source setup used when no config file exists.
    fn default() -> Self {
        let mut search = AdapterConfig::new("itunes-search", 30);
        search.min_response_bytes = 64;
        search.rate_limit = RateLimitConfig {
            capacity: 20,
            refill_per_second: 0.33,
        };

        let mut lookup = AdapterConfig::new("itunes-lookup", 10);
        lookup.min_response_bytes = 64;

        let mut html = AdapterConfig::new("storefront-html", 20);
        // a real listing page is tens of kilobytes
        html.min_response_bytes = 20 * 1024;
        html.rate_limit = RateLimitConfig {
            capacity: 10,
            refill_per_second: 0.2,
        };

        Self {
            batch_size: default_batch_size(),
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            drift_window_size: default_drift_window_size(),
            drift_threshold: default_drift_threshold(),
            drift_max_missing_fields: default_drift_max_missing_fields(),
            adapters: vec![lookup, html, search],
        }
    }
}

impl PipelineConfig {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    /// Clamp out-of-range values and reject configurations that cannot work.
    pub fn sanitize(mut self) -> Result<Self> {
        if self.batch_size == 0 {
            self.batch_size = 1;
        }
        if self.drift_window_size == 0 {
            self.drift_window_size = default_drift_window_size();
        }
        if !self.drift_threshold.is_finite() {
            self.drift_threshold = default_drift_threshold();
        }
        self.drift_threshold = self.drift_threshold.clamp(0.0, 1.0);

        let mut seen = HashSet::new();
        for a in &mut self.adapters {
            a.name = a.name.trim().to_string();
            if a.name.is_empty() {
                bail!("adapter with empty name");
            }
            if !seen.insert(a.name.clone()) {
                bail!("duplicate adapter name {:?}", a.name);
            }
            if a.rate_limit.capacity == 0 {
                a.rate_limit.capacity = 1;
            }
            if !(a.rate_limit.refill_per_second.is_finite() && a.rate_limit.refill_per_second > 0.0)
            {
                a.rate_limit.refill_per_second = RateLimitConfig::default().refill_per_second;
            }
            if a.timeout_ms == 0 {
                a.timeout_ms = default_timeout_ms();
            }
            if a.max_response_bytes == 0 {
                a.max_response_bytes = default_max_response_bytes();
            }
            a.country = a.country.trim().to_ascii_lowercase();
            if a.country.is_empty() {
                a.country = default_country();
            }
        }
        Ok(self)
    }
}

/// Load config from an explicit path. Supports TOML or JSON.
pub fn load_config_from(path: &Path) -> Result<PipelineConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading pipeline config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing pipeline config {}", path.display()))?
        .sanitize()
}

/// Load config using env var + fallbacks:
/// 1) $INGEST_CONFIG_PATH
/// 2) config/ingest.toml
/// 3) config/ingest.json
/// 4) built-in defaults
pub fn load_config_default() -> Result<PipelineConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    for candidate in ["config/ingest.toml", "config/ingest.json"] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return load_config_from(&p);
        }
    }
    PipelineConfig::default().sanitize()
}

fn parse_config(s: &str, hint_ext: &str) -> Result<PipelineConfig> {
    if hint_ext == "json" || s.trim_start().starts_with('{') {
        return serde_json::from_str(s).map_err(Into::into);
    }
    toml::from_str(s).map_err(Into::into)
}
