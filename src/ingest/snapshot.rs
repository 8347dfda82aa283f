// src/ingest/snapshot.rs
//! Append-only snapshot persistence and replay.
//!
//! One [`MetadataSnapshot`] per adapter attempt, accepted or not. Snapshots
//! are never updated; [`reprocess`] re-runs the pure transform + normalizer
//! over stored raw payloads and appends [`DerivedRecord`] rows instead.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

use crate::error::Rejection;
use crate::ingest::normalize::Normalizer;
use crate::ingest::types::{NormalizedRecord, PayloadSignature, RawPayload, SourceAdapter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMeta {
    /// Adapter (= source) that produced the attempt.
    pub adapter: String,
    pub schema_version: u32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub id: String,
    pub identifier: String,
    pub recorded_at: DateTime<Utc>,
    /// Absent only when the fetch failed before any response existed.
    pub raw: Option<RawPayload>,
    pub signature: Option<PayloadSignature>,
    pub record: Option<NormalizedRecord>,
    pub rejection: Option<Rejection>,
    pub meta: PipelineMeta,
}

impl MetadataSnapshot {
    pub fn new(
        identifier: impl Into<String>,
        raw: Option<RawPayload>,
        signature: Option<PayloadSignature>,
        record: Option<NormalizedRecord>,
        rejection: Option<Rejection>,
        meta: PipelineMeta,
    ) -> Self {
        let identifier = identifier.into();
        let recorded_at = raw.as_ref().map(|r| r.fetched_at).unwrap_or_else(Utc::now);
        let id = snapshot_id(&meta.adapter, &identifier, recorded_at, raw.as_ref());
        Self {
            id,
            identifier,
            recorded_at,
            raw,
            signature,
            record,
            rejection,
            meta,
        }
    }

    pub fn source(&self) -> &str {
        &self.meta.adapter
    }

    pub fn accepted(&self) -> bool {
        self.record.is_some()
    }
}

fn snapshot_id(
    adapter: &str,
    identifier: &str,
    at: DateTime<Utc>,
    raw: Option<&RawPayload>,
) -> String {
    use sha2::{Digest, Sha256};
    static SEQ: AtomicU64 = AtomicU64::new(0);

    let mut h = Sha256::new();
    h.update(adapter.as_bytes());
    h.update([0u8]);
    h.update(identifier.as_bytes());
    h.update([0u8]);
    h.update(at.to_rfc3339().as_bytes());
    if let Some(r) = raw {
        h.update(r.body.as_bytes());
    }
    h.update(SEQ.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    let digest = h.finalize();
    let mut out = String::with_capacity(24);
    for b in digest.iter().take(12) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// A reprocessing output row referencing the snapshot it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRecord {
    pub snapshot_id: String,
    pub derived_at: DateTime<Utc>,
    pub record: NormalizedRecord,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    pub source: Option<String>,
    pub identifier: Option<String>,
    pub since: Option<DateTime<Utc>>,
    /// Only snapshots that produced a record.
    pub accepted_only: bool,
    /// Keep the newest `limit` matches.
    pub limit: Option<usize>,
}

impl SnapshotFilter {
    pub fn matches(&self, s: &MetadataSnapshot) -> bool {
        self.source.as_deref().map_or(true, |src| s.source() == src)
            && self.identifier.as_deref().map_or(true, |id| s.identifier == id)
            && self.since.map_or(true, |t| s.recorded_at >= t)
            && (!self.accepted_only || s.accepted())
    }

    fn apply(&self, mut rows: Vec<MetadataSnapshot>) -> Vec<MetadataSnapshot> {
        rows.retain(|s| self.matches(s));
        if let Some(n) = self.limit {
            let start = rows.len().saturating_sub(n);
            rows.drain(..start);
        }
        rows
    }
}

/// Append-only persistence sink. Writes are serialized by implementations.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: MetadataSnapshot) -> Result<()>;
    /// Matching snapshots in insertion order.
    async fn query(&self, filter: &SnapshotFilter) -> Result<Vec<MetadataSnapshot>>;
    async fn save_derived(&self, derived: DerivedRecord) -> Result<()>;
    async fn derived_for(&self, snapshot_id: &str) -> Result<Vec<DerivedRecord>>;
}

// ------------------------------------------------------------
// In-memory store
// ------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<Vec<MetadataSnapshot>>,
    derived: Mutex<Vec<DerivedRecord>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().expect("snapshot mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: MetadataSnapshot) -> Result<()> {
        self.snapshots
            .lock()
            .expect("snapshot mutex poisoned")
            .push(snapshot);
        Ok(())
    }

    async fn query(&self, filter: &SnapshotFilter) -> Result<Vec<MetadataSnapshot>> {
        let rows = self.snapshots.lock().expect("snapshot mutex poisoned").clone();
        Ok(filter.apply(rows))
    }

    async fn save_derived(&self, derived: DerivedRecord) -> Result<()> {
        self.derived
            .lock()
            .expect("snapshot mutex poisoned")
            .push(derived);
        Ok(())
    }

    async fn derived_for(&self, snapshot_id: &str) -> Result<Vec<DerivedRecord>> {
        let g = self.derived.lock().expect("snapshot mutex poisoned");
        Ok(g.iter()
            .filter(|d| d.snapshot_id == snapshot_id)
            .cloned()
            .collect())
    }
}

// ------------------------------------------------------------
// JSON-lines file store
// ------------------------------------------------------------

/// Two append-only JSONL files: `<path>` for snapshots and
/// `<path stem>.derived.jsonl` next to it for derived rows.
#[derive(Debug)]
pub struct JsonlSnapshotStore {
    snapshots_path: PathBuf,
    derived_path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let snapshots_path = path.into();
        let stem = snapshots_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("snapshots")
            .to_string();
        let derived_path = snapshots_path.with_file_name(format!("{stem}.derived.jsonl"));
        Self {
            snapshots_path,
            derived_path,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.snapshots_path
    }

    async fn append_line<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let mut line = serde_json::to_vec(value).context("serializing snapshot row")?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        // one write per row so a cancelled task never leaves half a record
        f.write_all(&line)
            .await
            .with_context(|| format!("appending to {}", path.display()))?;
        f.flush().await?;
        Ok(())
    }

    async fn read_rows<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let mut out = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(v) => out.push(v),
                Err(e) => {
                    tracing::warn!(path = %path.display(), line = i + 1, error = %e, "skipping unreadable snapshot row");
                }
            }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl SnapshotStore for JsonlSnapshotStore {
    async fn save(&self, snapshot: MetadataSnapshot) -> Result<()> {
        self.append_line(&self.snapshots_path, &snapshot).await
    }

    async fn query(&self, filter: &SnapshotFilter) -> Result<Vec<MetadataSnapshot>> {
        let rows = Self::read_rows(&self.snapshots_path).await?;
        Ok(filter.apply(rows))
    }

    async fn save_derived(&self, derived: DerivedRecord) -> Result<()> {
        self.append_line(&self.derived_path, &derived).await
    }

    async fn derived_for(&self, snapshot_id: &str) -> Result<Vec<DerivedRecord>> {
        let rows: Vec<DerivedRecord> = Self::read_rows(&self.derived_path).await?;
        Ok(rows
            .into_iter()
            .filter(|d| d.snapshot_id == snapshot_id)
            .collect())
    }
}

// ------------------------------------------------------------
// Replay
// ------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ReprocessReport {
    pub scanned: usize,
    pub skipped: usize,
    pub derived: Vec<DerivedRecord>,
}

/// Re-derive records for `adapter`'s accepted snapshots recorded at or after
/// `since`. Never touches the network.
pub async fn reprocess(
    store: &dyn SnapshotStore,
    adapter: &dyn SourceAdapter,
    since: Option<DateTime<Utc>>,
    normalizer: &Normalizer,
) -> Result<ReprocessReport> {
    let filter = SnapshotFilter {
        source: Some(adapter.name().to_string()),
        since,
        accepted_only: true,
        ..Default::default()
    };
    let rows = store.query(&filter).await?;

    let mut report = ReprocessReport {
        scanned: rows.len(),
        ..Default::default()
    };
    for snap in rows {
        let Some(raw) = snap.raw.as_ref() else {
            report.skipped += 1;
            continue;
        };
        let candidate = match adapter.transform(raw) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(target: "ingest", snapshot = %snap.id, error = %e, "reprocess transform failed");
                report.skipped += 1;
                continue;
            }
        };
        let derived = DerivedRecord {
            snapshot_id: snap.id.clone(),
            derived_at: Utc::now(),
            record: normalizer.normalize(&candidate, &snap.identifier, adapter.name()),
        };
        store
            .save_derived(derived.clone())
            .await
            .context("saving derived record")?;
        report.derived.push(derived);
    }

    tracing::info!(
        target: "ingest",
        source = adapter.name(),
        scanned = report.scanned,
        derived = report.derived.len(),
        skipped = report.skipped,
        schema_version = normalizer.schema_version(),
        "reprocess finished"
    );
    Ok(report)
}
