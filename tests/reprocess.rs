// tests/reprocess.rs
mod common;

use std::sync::Arc;

use common::{entry, MockAdapter, LISTING_HTML, UNKNOWN_HTML};
use listing_ingest::ingest::normalize::Normalizer;
use listing_ingest::ingest::snapshot::{
    JsonlSnapshotStore, MemorySnapshotStore, SnapshotFilter, SnapshotStore,
};
use listing_ingest::ingest::types::CandidateRecord;
use listing_ingest::ingest::Orchestrator;

fn listing_adapter() -> Arc<MockAdapter> {
    Arc::new(
        MockAdapter::html("store", 200, LISTING_HTML).with_candidate(|_| CandidateRecord {
            title: Some("Mock&nbsp;App".into()),
            subtitle: Some("Mock App".into()),
            rating: Some(7.0),
            screenshot_urls: vec!["https://a.example/1.png".into(), "nope".into()],
            screenshot_url: Some("https://a.example/1.png".into()),
            ..Default::default()
        }),
    )
}

#[tokio::test]
async fn reprocess_twice_yields_equal_records() {
    let store = Arc::new(MemorySnapshotStore::new());
    let adapter = listing_adapter();
    let orch = Orchestrator::new(vec![entry(&adapter, 1)], store.clone());

    let original = orch.resolve("1").await.unwrap();
    assert_eq!(original.title, "Mock App");
    assert_eq!(original.subtitle, "");
    assert_eq!(original.rating, 5.0);
    assert_eq!(original.screenshot_urls, vec!["https://a.example/1.png"]);

    let fetches_before = adapter.fetches();
    let n = Normalizer::default();
    let first = orch.reprocess("store", None, &n).await.unwrap();
    let second = orch.reprocess("store", None, &n).await.unwrap();
    assert_eq!(adapter.fetches(), fetches_before, "reprocess must not fetch");

    assert_eq!(first.derived.len(), 1);
    assert_eq!(second.derived.len(), 1);
    let (a, b) = (&first.derived[0].record, &second.derived[0].record);
    assert!(a.same_content(b));
    assert!(a.same_content(&original));

    // append-only: both derivations are kept, the snapshot itself is untouched
    let snaps = store.query(&SnapshotFilter::default()).await.unwrap();
    assert_eq!(snaps.len(), 1);
    assert_eq!(store.derived_for(&snaps[0].id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn reprocess_skips_rejected_snapshots_and_tags_new_version() {
    let store = Arc::new(MemorySnapshotStore::new());
    let good = listing_adapter();
    let bad = Arc::new(MockAdapter::html("bad", 200, UNKNOWN_HTML));
    let orch = Orchestrator::new(vec![entry(&bad, 1), entry(&good, 2)], store.clone());
    orch.resolve("1").await.unwrap();

    let bad_report = orch.reprocess("bad", None, &Normalizer::default()).await.unwrap();
    assert_eq!(bad_report.scanned, 0);
    assert!(bad_report.derived.is_empty());

    let v3 = Normalizer::new(3);
    let report = orch.reprocess("store", None, &v3).await.unwrap();
    assert_eq!(report.derived[0].record.schema_version, 3);

    assert!(orch.reprocess("missing", None, &v3).await.is_err());
}

#[tokio::test]
async fn since_filter_excludes_older_snapshots() {
    let store = Arc::new(MemorySnapshotStore::new());
    let adapter = listing_adapter();
    let orch = Orchestrator::new(vec![entry(&adapter, 1)], store.clone());
    orch.resolve("1").await.unwrap();

    let later = chrono::Utc::now() + chrono::Duration::seconds(60);
    let report = orch
        .reprocess("store", Some(later), &Normalizer::default())
        .await
        .unwrap();
    assert_eq!(report.scanned, 0);
}

#[tokio::test]
async fn jsonl_store_supports_replay() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonlSnapshotStore::new(dir.path().join("snapshots.jsonl")));
    let adapter = listing_adapter();
    let orch = Orchestrator::new(vec![entry(&adapter, 1)], store.clone());
    let original = orch.resolve("1").await.unwrap();

    let report = orch
        .reprocess("store", None, &Normalizer::default())
        .await
        .unwrap();
    assert_eq!(report.derived.len(), 1);
    assert!(report.derived[0].record.same_content(&original));

    let snaps = store.query(&SnapshotFilter::default()).await.unwrap();
    assert_eq!(snaps.len(), 1);
    assert_eq!(store.derived_for(&snaps[0].id).await.unwrap().len(), 1);
}
