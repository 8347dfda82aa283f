// tests/orchestrator.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use common::{entry, CollectingSink, MockAdapter, BLOCK_HTML, LISTING_HTML, REVIEW_HTML, UNKNOWN_HTML};
use listing_ingest::error::{FetchError, Rejection, ResolveError, ValidationError};
use listing_ingest::ingest::snapshot::{
    DerivedRecord, MemorySnapshotStore, MetadataSnapshot, SnapshotFilter, SnapshotStore,
};
use listing_ingest::ingest::types::PayloadSignature;
use listing_ingest::ingest::Orchestrator;

#[tokio::test]
async fn blocked_primary_falls_back_to_secondary() {
    let primary = Arc::new(MockAdapter::html("primary", 403, BLOCK_HTML));
    let secondary = Arc::new(MockAdapter::html("secondary", 200, LISTING_HTML));
    let store = Arc::new(MemorySnapshotStore::new());
    let sink = Arc::new(CollectingSink::default());

    // given out of order on purpose: priority decides
    let orch = Orchestrator::new(vec![entry(&secondary, 20), entry(&primary, 10)], store.clone())
        .with_sink(sink.clone());

    let rec = orch.resolve("123").await.unwrap();
    assert_eq!(rec.source_name, "secondary");
    assert_eq!(rec.title, "Mock App");
    assert_eq!(rec.subtitle, "Does mock things");
    assert_eq!(primary.transforms(), 0);

    let health = orch.health();
    assert_eq!(health[0].adapter, "primary");
    assert_eq!((health[0].failures, health[0].successes), (1, 0));
    assert_eq!(health[1].adapter, "secondary");
    assert_eq!((health[1].failures, health[1].successes), (0, 1));
    assert_eq!(sink.health.lock().unwrap().len(), 2);

    let snaps = store.query(&SnapshotFilter::default()).await.unwrap();
    assert_eq!(snaps.len(), 2);
    assert_eq!(
        snaps[0].rejection,
        Some(Rejection::Validation {
            error: ValidationError::BadStatus { status: 403 }
        })
    );
    assert!(snaps[0].raw.is_some());
    assert!(snaps[1].accepted());
}

#[tokio::test]
async fn all_unknown_exhausts_with_one_snapshot_per_adapter() {
    let adapters: Vec<Arc<MockAdapter>> = ["a", "b", "c"]
        .iter()
        .map(|n| Arc::new(MockAdapter::html(n, 200, UNKNOWN_HTML)))
        .collect();
    let store = Arc::new(MemorySnapshotStore::new());
    let orch = Orchestrator::new(
        adapters
            .iter()
            .enumerate()
            .map(|(i, a)| entry(a, i as i32))
            .collect(),
        store.clone(),
    );

    let err = orch.resolve("42").await.unwrap_err();
    match err {
        ResolveError::AllSourcesFailed { identifier, attempts } => {
            assert_eq!(identifier, "42");
            let names: Vec<_> = attempts.iter().map(|a| a.adapter.as_str()).collect();
            assert_eq!(names, ["a", "b", "c"]);
            assert!(attempts.iter().all(|a| a.rejection
                == Rejection::Classification {
                    signature: PayloadSignature::Unknown
                }));
        }
        other => panic!("unexpected {other:?}"),
    }

    let snaps = store.query(&SnapshotFilter::default()).await.unwrap();
    assert_eq!(snaps.len(), 3);
    assert!(snaps.iter().all(|s| s.record.is_none()));
    assert!(snaps
        .iter()
        .all(|s| s.signature == Some(PayloadSignature::Unknown)));
    assert!(adapters.iter().all(|a| a.transforms() == 0));
}

#[tokio::test]
async fn review_and_block_pages_are_kept_but_never_transformed() {
    let reviews = Arc::new(MockAdapter::html("reviews", 200, REVIEW_HTML));
    let walled = Arc::new(MockAdapter::html("walled", 200, BLOCK_HTML));
    let listing = Arc::new(MockAdapter::html("listing", 200, LISTING_HTML));
    let store = Arc::new(MemorySnapshotStore::new());
    let orch = Orchestrator::new(
        vec![entry(&reviews, 1), entry(&walled, 2), entry(&listing, 3)],
        store.clone(),
    );

    let rec = orch.resolve("7").await.unwrap();
    assert_eq!(rec.source_name, "listing");
    assert_eq!(reviews.fetches(), 1);
    assert_eq!(reviews.transforms(), 0);
    assert_eq!(walled.transforms(), 0);
    assert_eq!(listing.transforms(), 1);

    let snaps = store.query(&SnapshotFilter::default()).await.unwrap();
    assert_eq!(snaps.len(), 3);
    for (snap, signature, body) in [
        (&snaps[0], PayloadSignature::ReviewFragment, REVIEW_HTML),
        (&snaps[1], PayloadSignature::BlockPage, BLOCK_HTML),
    ] {
        assert_eq!(snap.signature, Some(signature));
        assert_eq!(snap.raw.as_ref().map(|r| r.body.as_str()), Some(body));
        assert!(snap.record.is_none());
        assert_eq!(snap.rejection, Some(Rejection::Classification { signature }));
    }
    assert_eq!(snaps[2].signature, Some(PayloadSignature::ListingPage));
    assert!(snaps[2].record.is_some());
}

#[tokio::test]
async fn disabled_adapter_is_skipped_without_health_event() {
    let off = Arc::new(MockAdapter::html("off", 200, LISTING_HTML));
    let on = Arc::new(MockAdapter::html("on", 200, LISTING_HTML));
    let sink = Arc::new(CollectingSink::default());
    let (a, mut cfg) = entry(&off, 1);
    cfg.enabled = false;
    let orch = Orchestrator::new(vec![(a, cfg), entry(&on, 2)], Arc::new(MemorySnapshotStore::new()))
        .with_sink(sink.clone());

    let rec = orch.resolve("1").await.unwrap();
    assert_eq!(rec.source_name, "on");
    assert_eq!(off.fetches(), 0);
    assert_eq!(orch.health()[0].attempts, 0);
    let events = sink.health.lock().unwrap();
    assert!(events.iter().all(|h| h.adapter == "on"));
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_times_out_and_advances() {
    let slow = Arc::new(
        MockAdapter::html("slow", 200, LISTING_HTML).with_delay(Duration::from_secs(60)),
    );
    let fast = Arc::new(MockAdapter::html("fast", 200, LISTING_HTML));
    let (a, mut cfg) = entry(&slow, 1);
    cfg.timeout_ms = 500;
    let store = Arc::new(MemorySnapshotStore::new());
    let orch = Orchestrator::new(vec![(a, cfg), entry(&fast, 2)], store.clone());

    let started = tokio::time::Instant::now();
    let rec = orch.resolve("1").await.unwrap();
    assert_eq!(rec.source_name, "fast");
    assert!(started.elapsed() < Duration::from_secs(60));

    let snaps = store.query(&SnapshotFilter::default()).await.unwrap();
    assert!(snaps[0].raw.is_none());
    assert_eq!(
        snaps[0].rejection,
        Some(Rejection::Fetch {
            error: FetchError::Timeout { after_ms: 500 }
        })
    );
}

#[tokio::test]
async fn fetch_errors_are_recovered_locally() {
    let down = Arc::new(MockAdapter::new("down", |_| {
        Err(FetchError::HttpStatus { status: 503 })
    }));
    let up = Arc::new(MockAdapter::html("up", 200, LISTING_HTML));
    let orch = Orchestrator::new(
        vec![entry(&down, 1), entry(&up, 2)],
        Arc::new(MemorySnapshotStore::new()),
    );
    assert_eq!(orch.resolve("1").await.unwrap().source_name, "up");
    assert_eq!(orch.health()[0].consecutive_failures, 1);
}

#[tokio::test]
async fn wrong_content_type_is_a_validation_rejection() {
    let odd = Arc::new(MockAdapter::new("odd", |id| {
        Ok(listing_ingest::ingest::RawPayload::new("odd", id, 200, "image/png", LISTING_HTML))
    }));
    let orch = Orchestrator::new(vec![entry(&odd, 1)], Arc::new(MemorySnapshotStore::new()));
    match orch.resolve("1").await.unwrap_err() {
        ResolveError::AllSourcesFailed { attempts, .. } => {
            assert!(matches!(
                attempts[0].rejection,
                Rejection::Validation {
                    error: ValidationError::BadContentType { .. }
                }
            ));
        }
        other => panic!("unexpected {other:?}"),
    }
}

struct BrokenStore;

#[async_trait]
impl SnapshotStore for BrokenStore {
    async fn save(&self, _snapshot: MetadataSnapshot) -> Result<()> {
        anyhow::bail!("disk full")
    }
    async fn query(&self, _filter: &SnapshotFilter) -> Result<Vec<MetadataSnapshot>> {
        Ok(Vec::new())
    }
    async fn save_derived(&self, _derived: DerivedRecord) -> Result<()> {
        anyhow::bail!("disk full")
    }
    async fn derived_for(&self, _snapshot_id: &str) -> Result<Vec<DerivedRecord>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn store_failure_does_not_fail_resolution() {
    let ok = Arc::new(MockAdapter::html("ok", 200, LISTING_HTML));
    let orch = Orchestrator::new(vec![entry(&ok, 1)], Arc::new(BrokenStore));
    assert!(orch.resolve("1").await.is_ok());
}
