// src/ingest/batch.rs
//! Fan identifiers out to the orchestrator in fixed-size concurrent groups.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinSet;

use crate::config::PipelineConfig;
use crate::error::ResolveError;
use crate::ingest::orchestrator::Orchestrator;
use crate::ingest::types::NormalizedRecord;

pub type BatchResult = HashMap<String, Result<NormalizedRecord, ResolveError>>;

#[derive(Clone)]
pub struct BatchFetcher {
    orchestrator: Arc<Orchestrator>,
    batch_size: usize,
    inter_batch_delay: Duration,
}

impl BatchFetcher {
    pub fn new(orchestrator: Arc<Orchestrator>, batch_size: usize, inter_batch_delay: Duration) -> Self {
        Self {
            orchestrator,
            batch_size: batch_size.max(1),
            inter_batch_delay,
        }
    }

    pub fn from_config(orchestrator: Arc<Orchestrator>, cfg: &PipelineConfig) -> Self {
        Self::new(orchestrator, cfg.batch_size, cfg.inter_batch_delay())
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Resolve every distinct identifier. One entry per identifier; a failing
    /// or panicking resolution only affects its own entry.
    pub async fn fetch_batch<I, S>(&self, identifiers: I) -> BatchResult
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let ids: Vec<String> = identifiers
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();

        let mut out: BatchResult = HashMap::with_capacity(ids.len());
        let groups: Vec<&[String]> = ids.chunks(self.batch_size).collect();
        let n_groups = groups.len();

        for (gi, group) in groups.into_iter().enumerate() {
            let mut set = JoinSet::new();
            for id in group {
                let orch = Arc::clone(&self.orchestrator);
                let id = id.clone();
                set.spawn(async move {
                    let res = orch.resolve(&id).await;
                    (id, res)
                });
            }

            let mut lost: Vec<String> = Vec::new();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((id, res)) => {
                        out.insert(id, res);
                    }
                    Err(e) => {
                        let reason = if e.is_panic() {
                            "worker task panicked".to_string()
                        } else {
                            "worker task cancelled".to_string()
                        };
                        tracing::error!(target: "ingest", error = %e, "batch worker failed");
                        counter!("ingest_batch_worker_failures_total").increment(1);
                        lost.push(reason);
                    }
                }
            }
            // A dead task cannot report its identifier; every id of the group
            // without an entry belongs to one of them.
            if !lost.is_empty() {
                let missing: Vec<String> = group
                    .iter()
                    .filter(|id| !out.contains_key(id.as_str()))
                    .cloned()
                    .collect();
                for id in missing {
                    let reason = lost.pop().unwrap_or_else(|| "worker task failed".to_string());
                    out.insert(
                        id.clone(),
                        Err(ResolveError::Aborted {
                            identifier: id,
                            reason,
                        }),
                    );
                }
            }

            tracing::info!(
                target: "ingest",
                group = gi + 1,
                groups = n_groups,
                size = group.len(),
                "batch group done"
            );
            if gi + 1 < n_groups && !self.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.inter_batch_delay).await;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::error::FetchError;
    use crate::ingest::snapshot::MemorySnapshotStore;
    use crate::ingest::types::{CandidateRecord, FetchOptions, RawPayload, SourceAdapter};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SourceAdapter for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn fetch(&self, identifier: &str, _o: &FetchOptions) -> Result<RawPayload, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if identifier == "boom" {
                panic!("adapter bug");
            }
            let body = format!(r#"{{"results":[{{"trackName":"App {identifier}"}}]}}"#);
            Ok(RawPayload::new("echo", identifier, 200, "application/json", body))
        }

        fn expected_content_types(&self) -> &[&'static str] {
            &["application/json"]
        }

        fn transform(&self, raw: &RawPayload) -> Result<CandidateRecord, String> {
            Ok(CandidateRecord {
                title: Some(format!("App {}", raw.identifier)),
                ..Default::default()
            })
        }
    }

    fn fetcher(batch: usize) -> (BatchFetcher, Arc<Echo>) {
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let mut cfg = AdapterConfig::new("echo", 1);
        cfg.min_response_bytes = 1;
        let orch = Orchestrator::new(
            vec![(echo.clone() as Arc<dyn SourceAdapter>, cfg)],
            Arc::new(MemorySnapshotStore::new()),
        );
        (BatchFetcher::new(Arc::new(orch), batch, Duration::ZERO), echo)
    }

    #[tokio::test]
    async fn duplicates_collapse_to_one_entry() {
        let (f, echo) = fetcher(2);
        let out = f.fetch_batch(["1", "2", "1", " 2 ", "3", ""]).await;
        assert_eq!(out.len(), 3);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 3);
        assert_eq!(out["3"].as_ref().unwrap().title, "App 3");
    }

    #[tokio::test]
    async fn panicking_worker_only_fails_its_identifier() {
        let (f, _) = fetcher(4);
        let out = f.fetch_batch(["a", "boom", "c"]).await;
        assert_eq!(out.len(), 3);
        assert!(out["a"].is_ok());
        assert!(out["c"].is_ok());
        assert!(matches!(out["boom"], Err(ResolveError::Aborted { .. })));
    }
}
