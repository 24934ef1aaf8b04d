// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use dobre_zpravy::api::{self, AppState, ADMIN_TOKEN_HEADER};
use dobre_zpravy::ingest::dedup::article_id;
use dobre_zpravy::ingest::fetcher::StaticFetcher;
use dobre_zpravy::ingest::scheduler::{BatchQueue, MemoryCursorStore, Scheduler};
use dobre_zpravy::ingest::types::Fetcher;
use dobre_zpravy::ingest::{IngestOptions, Ingestor};
use dobre_zpravy::moderation::classifier::CategoryClassifier;
use dobre_zpravy::moderation::gate::ScriptedGate;
use dobre_zpravy::moderation::policy::{PolicyHandle, PolicyTables};
use dobre_zpravy::moderation::ModerationPipeline;
use dobre_zpravy::scraper::ArticleScraper;
use dobre_zpravy::store::{Article, ArticleStore, MemoryStore};
use dobre_zpravy::{Source, SourceRegistry};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests
const TOKEN: &str = "test-admin-token";
const ARTICLE_URL: &str = "https://www.region-zpravy.cz/zpravy/vysadba-stromu";

fn article(url: &str, title: &str, domain: &str) -> Article {
    let now = Utc::now();
    Article {
        id: article_id(url),
        title: title.into(),
        description: "Akce se konala o víkendu.".into(),
        content: None,
        url: url.into(),
        image_url: None,
        source_name: "Region Zprávy".into(),
        source_domain: domain.into(),
        language: "cs".into(),
        category: "environment".into(),
        location: "czech".into(),
        is_adult: false,
        positivity_score: 0.10,
        published_at: now,
        created_at: now,
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
}

fn test_app(admin_token: Option<&str>) -> TestApp {
    let store = Arc::new(MemoryStore::with_articles(vec![
        article(ARTICLE_URL, "Dobrovolníci vysadili tisíc stromů", "region-zpravy.cz"),
        article(
            "https://www.aeronet.cz/news/clanek",
            "Lesy se vracejí do krajiny",
            "aeronet.cz",
        ),
        article(
            "https://www.region-zpravy.cz/zpravy/darujte-krev",
            "Sponzorovaný obsah: darujte krev",
            "region-zpravy.cz",
        ),
    ]));

    let page = format!(
        "<html><head><meta property=\"og:image\" content=\"https://cdn.region-zpravy.cz/og.jpg\"></head>\
         <body><article><p>{}</p><p>{}</p><p>{}</p></article></body></html>",
        "Dobrovolníci z Brna během víkendu vysadili přes tisíc stromů v lužním lese u Soutoku.",
        "Akci podpořilo město i místní školy, které přivedly stovky dětí s rodiči a učiteli na brigádu.",
        "Organizátoři plánují další výsadbu na jaře a zvou všechny, kdo chtějí pomoci s péčí o les."
    );
    let fetcher: Arc<dyn Fetcher> = Arc::new(StaticFetcher::new().with_page(ARTICLE_URL, page));

    let policy = PolicyTables::load_from(Path::new("config/policy.toml")).unwrap();
    let classifier = CategoryClassifier::load_from(Path::new("config/categories.toml")).unwrap();
    let moderation = Arc::new(ModerationPipeline::new(
        PolicyHandle::new(policy),
        Arc::new(classifier),
        Arc::new(ScriptedGate::always("POSITIVE")),
    ));
    let ingestor = Arc::new(Ingestor::new(
        fetcher.clone(),
        store.clone(),
        moderation.clone(),
        IngestOptions::default(),
    ));
    let registry = SourceRegistry::new(vec![Source {
        name: "Region Zprávy".into(),
        url: "https://www.region-zpravy.cz/rss".into(),
        domain: "region-zpravy.cz".into(),
        language: "cs".into(),
        location: "czech".into(),
    }]);
    let scheduler = Arc::new(Scheduler::new(
        BatchQueue::new(registry, 10, Arc::new(MemoryCursorStore::new(0))),
        ingestor,
    ));

    let state = AppState {
        scheduler,
        store: store.clone(),
        moderation,
        scraper: Arc::new(ArticleScraper::new(fetcher)),
        admin_token: admin_token.map(Arc::from),
    };
    TestApp {
        router: api::router(state),
        store,
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET")
}

fn admin_post(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut b = Request::builder().method("POST").uri(uri);
    if let Some(t) = token {
        b = b.header(ADMIN_TOKEN_HEADER, t);
    }
    if !body.is_empty() {
        b = b.header("content-type", "application/json");
    }
    b.body(Body::from(body.to_string())).expect("build POST")
}

#[tokio::test]
async fn health_returns_ok() {
    let app = test_app(None);
    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap().trim(), "OK");
}

#[tokio::test]
async fn unknown_article_is_404() {
    let app = test_app(None);
    let (status, _) = send(&app.router, get("/api/articles/0000000000000000")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn first_read_scrapes_and_backfills() {
    let app = test_app(None);
    let id = article_id(ARTICLE_URL);
    let (status, body) = send(&app.router, get(&format!("/api/articles/{id}"))).await;
    assert_eq!(status, StatusCode::OK);

    let v: Json = serde_json::from_slice(&body).expect("article json");
    assert_eq!(v["id"], id.as_str());
    let content = v["content"].as_str().expect("content backfilled");
    assert!(content.starts_with("Dobrovolníci z Brna"));
    assert_eq!(v["image_url"], "https://cdn.region-zpravy.cz/og.jpg");

    let stored = app.store.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.content.as_deref(), Some(content));
}

#[tokio::test]
async fn listing_filters_by_category() {
    let app = test_app(None);
    let (status, body) = send(&app.router, get("/api/articles?category=health")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v.as_array().map(Vec::len), Some(0));

    let (_, body) = send(&app.router, get("/api/articles?limit=2")).await;
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn admin_routes_require_the_token_when_set() {
    let app = test_app(Some(TOKEN));
    let (status, _) = send(&app.router, admin_post("/admin/purge", None, "")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app.router, admin_post("/admin/purge", Some("wrong"), "")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.store.len(), 3);

    let (status, body) = send(&app.router, admin_post("/admin/purge", Some(TOKEN), "")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["purged"], 3);
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn cleanup_by_pattern() {
    let app = test_app(Some(TOKEN));
    let (status, body) = send(
        &app.router,
        admin_post("/admin/cleanup", Some(TOKEN), r#"{"patterns": ["Sponzorovaný"]}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["scanned"], 3);
    assert_eq!(v["deleted"], 1);
    assert_eq!(app.store.len(), 2);
}

#[tokio::test]
async fn cleanup_without_patterns_reapplies_the_prefilter() {
    let app = test_app(None);
    let (status, body) = send(&app.router, admin_post("/admin/cleanup", None, "")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    let ids: Vec<&str> = v["ids"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Json::as_str)
        .collect();
    assert!(ids.contains(&article_id("https://www.aeronet.cz/news/clanek").as_str()));
    assert!(!ids.contains(&article_id(ARTICLE_URL).as_str()));
}

#[tokio::test]
async fn cleanup_rejects_malformed_body() {
    let app = test_app(None);
    let (status, _) = send(&app.router, admin_post("/admin/cleanup", None, "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn run_batch_reports_cursor_movement() {
    let app = test_app(Some(TOKEN));
    let (status, body) = send(&app.router, admin_post("/admin/run-batch", Some(TOKEN), "")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["start"], 0);
    assert_eq!(v["next_cursor"], 0);
    assert_eq!(v["failures"], 1, "the fixture fetcher has no feed page");
}

#[tokio::test]
async fn run_all_with_purge_clears_first() {
    let app = test_app(None);
    let (status, body) = send(&app.router, admin_post("/admin/run-all?purge=1", None, "")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["purged"], 3);
    assert_eq!(v["report"]["sources"].as_array().map(Vec::len), Some(1));
}
