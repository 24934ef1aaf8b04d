// tests/metrics.rs
//
// One test per process: the Prometheus recorder is global.
use std::path::Path;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use dobre_zpravy::ingest::fetcher::StaticFetcher;
use dobre_zpravy::ingest::{IngestOptions, Ingestor};
use dobre_zpravy::metrics::Metrics;
use dobre_zpravy::moderation::classifier::CategoryClassifier;
use dobre_zpravy::moderation::gate::ScriptedGate;
use dobre_zpravy::moderation::policy::{PolicyHandle, PolicyTables};
use dobre_zpravy::moderation::ModerationPipeline;
use dobre_zpravy::store::MemoryStore;
use dobre_zpravy::Source;

const FEED_URL: &str = "https://www.region-zpravy.cz/rss";

#[tokio::test]
async fn ingest_run_shows_up_in_exposition() {
    let metrics = Metrics::init(7).expect("recorder installs once per process");

    let policy = PolicyTables::load_from(Path::new("config/policy.toml")).unwrap();
    let classifier = CategoryClassifier::load_from(Path::new("config/categories.toml")).unwrap();
    let moderation = Arc::new(ModerationPipeline::new(
        PolicyHandle::new(policy),
        Arc::new(classifier),
        Arc::new(ScriptedGate::always("POSITIVE")),
    ));
    let fetcher = StaticFetcher::new().with_page(FEED_URL, include_str!("fixtures/rss_cz.xml"));
    let ingestor = Ingestor::new(
        Arc::new(fetcher),
        Arc::new(MemoryStore::new()),
        moderation,
        IngestOptions::default(),
    );
    let report = ingestor
        .process_source(&Source {
            name: "Region Zprávy".into(),
            url: FEED_URL.into(),
            domain: "region-zpravy.cz".into(),
            language: "cs".into(),
            location: "czech".into(),
        })
        .await;
    assert_eq!(report.inserted, 2);

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap(); // 1 MiB
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "scheduler_batch_size 7",
        "ingest_items_total 3",
        "ingest_inserted_total 2",
        "moderation_passed_total 2",
        "moderation_rejected_total{stage=",
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }
}
