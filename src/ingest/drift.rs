//! Schema drift detector.
//!
//! Passive side channel fed after every successful normalization. For each
//! source it keeps the last `window_size` observations and counts, per
//! canonical field, how often an expected field was absent, plus how often
//! each unrecognized raw field showed up.
//!
//! Evaluation starts once the window is full. Signals are edge-triggered:
//! one signal per (source, kind, field) when the ratio crosses
//! `threshold`, re-armed only after it drops back. Signals are advisory and
//! never block ingestion.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

use crate::ingest::types::CanonicalField;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriftSignal {
    /// An expected canonical field went missing in most recent records.
    MissingField {
        source: String,
        field: String,
        absent_ratio: f64,
    },
    /// A raw field we don't map keeps appearing.
    UnrecognizedField {
        source: String,
        field: String,
        present_ratio: f64,
    },
    /// Too many canonical fields are missing at once.
    ShapeChanged {
        source: String,
        missing_fields: Vec<String>,
    },
}

impl DriftSignal {
    pub fn source(&self) -> &str {
        match self {
            DriftSignal::MissingField { source, .. }
            | DriftSignal::UnrecognizedField { source, .. }
            | DriftSignal::ShapeChanged { source, .. } => source,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DriftSignal::MissingField { .. } => "missing_field",
            DriftSignal::UnrecognizedField { .. } => "unrecognized_field",
            DriftSignal::ShapeChanged { .. } => "shape_changed",
        }
    }

    /// Field name for per-field signals.
    pub fn field(&self) -> Option<&str> {
        match self {
            DriftSignal::MissingField { field, .. }
            | DriftSignal::UnrecognizedField { field, .. } => Some(field),
            DriftSignal::ShapeChanged { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DriftParams {
    pub window_size: usize,
    /// Fraction of the window in `[0, 1]`.
    pub threshold: f64,
    pub max_missing_fields: usize,
}

impl Default for DriftParams {
    fn default() -> Self {
        Self {
            window_size: 100,
            threshold: 0.5,
            max_missing_fields: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LatchKey {
    Missing(CanonicalField),
    Unrecognized(String),
    Shape,
}

#[derive(Debug)]
struct Observation {
    absent: Vec<CanonicalField>,
    unrecognized: Vec<String>,
}

#[derive(Debug, Default)]
struct SourceWindow {
    observations: VecDeque<Observation>,
    absent_counts: HashMap<CanonicalField, usize>,
    unrecognized_counts: HashMap<String, usize>,
    latched: HashSet<LatchKey>,
}

impl SourceWindow {
    fn push(&mut self, obs: Observation, cap: usize) {
        for f in &obs.absent {
            *self.absent_counts.entry(*f).or_default() += 1;
        }
        for f in &obs.unrecognized {
            *self.unrecognized_counts.entry(f.clone()).or_default() += 1;
        }
        self.observations.push_back(obs);

        while self.observations.len() > cap {
            let Some(old) = self.observations.pop_front() else {
                break;
            };
            for f in old.absent {
                if let Some(c) = self.absent_counts.get_mut(&f) {
                    *c = c.saturating_sub(1);
                }
            }
            for f in old.unrecognized {
                if let Some(c) = self.unrecognized_counts.get_mut(&f) {
                    *c = c.saturating_sub(1);
                    if *c == 0 {
                        self.unrecognized_counts.remove(&f);
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct DriftDetector {
    params: DriftParams,
    sources: Mutex<HashMap<String, SourceWindow>>,
}

impl DriftDetector {
    pub fn new(mut params: DriftParams) -> Self {
        params.window_size = params.window_size.max(1);
        params.threshold = if params.threshold.is_finite() {
            params.threshold.clamp(0.0, 1.0)
        } else {
            0.5
        };
        Self {
            params,
            sources: Mutex::new(HashMap::new()),
        }
    }

    pub fn params(&self) -> &DriftParams {
        &self.params
    }

    /// Feed one normalized record's field shape; returns newly raised signals.
    pub fn observe(
        &self,
        source: &str,
        expected: &BTreeSet<CanonicalField>,
        present: &BTreeSet<CanonicalField>,
        unrecognized: &BTreeSet<String>,
    ) -> Vec<DriftSignal> {
        let obs = Observation {
            absent: expected.difference(present).copied().collect(),
            unrecognized: unrecognized.iter().cloned().collect(),
        };

        let mut all = self.sources.lock().expect("drift mutex poisoned");
        let win = all.entry(source.to_string()).or_default();
        win.push(obs, self.params.window_size);

        if win.observations.len() < self.params.window_size {
            return Vec::new();
        }
        self.evaluate(source, win)
    }

    fn evaluate(&self, source: &str, win: &mut SourceWindow) -> Vec<DriftSignal> {
        let n = win.observations.len() as f64;
        let thr = self.params.threshold;
        let mut out = Vec::new();

        // 1) Missing canonical fields (stable order for deterministic output)
        let mut missing_now = Vec::new();
        for field in CanonicalField::ALL {
            let count = win.absent_counts.get(&field).copied().unwrap_or(0);
            let ratio = count as f64 / n;
            let key = LatchKey::Missing(field);
            if ratio > thr {
                missing_now.push(field.as_str().to_string());
                if win.latched.insert(key) {
                    out.push(DriftSignal::MissingField {
                        source: source.to_string(),
                        field: field.as_str().to_string(),
                        absent_ratio: ratio,
                    });
                }
            } else {
                win.latched.remove(&key);
            }
        }

        // 2) Unrecognized raw fields
        let mut names: Vec<&String> = win.unrecognized_counts.keys().collect();
        names.sort();
        let mut still_hot = HashSet::new();
        for name in names {
            let ratio = win.unrecognized_counts[name] as f64 / n;
            if ratio > thr {
                still_hot.insert(name.clone());
                if win.latched.insert(LatchKey::Unrecognized(name.clone())) {
                    out.push(DriftSignal::UnrecognizedField {
                        source: source.to_string(),
                        field: name.clone(),
                        present_ratio: ratio,
                    });
                }
            }
        }
        win.latched.retain(|k| match k {
            LatchKey::Unrecognized(f) => still_hot.contains(f),
            _ => true,
        });

        // 3) Aggregate shape break
        if missing_now.len() > self.params.max_missing_fields {
            if win.latched.insert(LatchKey::Shape) {
                out.push(DriftSignal::ShapeChanged {
                    source: source.to_string(),
                    missing_fields: missing_now,
                });
            }
        } else {
            win.latched.remove(&LatchKey::Shape);
        }

        out
    }
}
