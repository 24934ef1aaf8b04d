use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::ingest::scheduler::{BatchReport, Scheduler};
use crate::moderation::{moderation_text, ModerationInput, ModerationPipeline};
use crate::scraper::ArticleScraper;
use crate::store::{Article, ArticleStore};

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

type ApiError = (StatusCode, String);

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<dyn ArticleStore>,
    pub moderation: Arc<ModerationPipeline>,
    pub scraper: Arc<ArticleScraper>,
    /// `None` leaves admin routes open (local dev).
    pub admin_token: Option<Arc<str>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/articles", get(list_articles))
        .route("/api/articles/{id}", get(get_article))
        .route("/admin/run-batch", post(admin_run_batch))
        .route("/admin/run-all", post(admin_run_all))
        .route("/admin/purge", post(admin_purge))
        .route("/admin/cleanup", post(admin_cleanup))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn internal(e: anyhow::Error) -> ApiError {
    tracing::error!(target: "api", error = %format!("{e:#}"), "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .map(str::trim);
    if presented == Some(expected) {
        Ok(())
    } else {
        tracing::warn!(target: "api", "admin request rejected: bad or missing token");
        Err((StatusCode::UNAUTHORIZED, "admin token required".to_string()))
    }
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    category: Option<String>,
    /// Include adult-flagged articles (hidden by default).
    #[serde(default)]
    adult: Option<u8>,
}

async fn list_articles(
    State(state): State<AppState>,
    Query(q): Query<ListParams>,
) -> Result<Json<Vec<Article>>, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let include_adult = q.adult == Some(1);
    let rows = state.store.list().await.map_err(internal)?;
    let out = rows
        .into_iter()
        .filter(|a| include_adult || !a.is_adult)
        .filter(|a| {
            q.category
                .as_deref()
                .map_or(true, |c| a.category.eq_ignore_ascii_case(c))
        })
        .take(limit)
        .collect();
    Ok(Json(out))
}

/// Stored article; content is scraped and backfilled on first read when missing.
async fn get_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Article>, ApiError> {
    let article = state
        .store
        .get(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("article {id} not found")))?;

    let has_content = article
        .content
        .as_deref()
        .is_some_and(|c| !c.trim().is_empty());
    if has_content {
        return Ok(Json(article));
    }

    let scraped = state.scraper.scrape(&article.url).await;
    if scraped.content.is_none() && scraped.image.is_none() {
        return Ok(Json(article));
    }
    if let Err(e) = state
        .store
        .backfill(&id, scraped.content, scraped.image)
        .await
    {
        tracing::warn!(target: "api", %id, error = %format!("{e:#}"), "backfill failed");
        return Ok(Json(article));
    }
    let refreshed = state.store.get(&id).await.map_err(internal)?;
    Ok(Json(refreshed.unwrap_or(article)))
}

async fn admin_run_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BatchReport>, ApiError> {
    authorize(&state, &headers)?;
    let report = state.scheduler.run_one_batch().await.map_err(internal)?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct RunAllParams {
    #[serde(default)]
    purge: Option<u8>,
}

#[derive(Serialize)]
struct RunAllResp {
    purged: usize,
    report: BatchReport,
}

async fn admin_run_all(
    State(state): State<AppState>,
    Query(q): Query<RunAllParams>,
    headers: HeaderMap,
) -> Result<Json<RunAllResp>, ApiError> {
    authorize(&state, &headers)?;
    let purged = if q.purge == Some(1) {
        let n = state.store.purge().await.map_err(internal)?;
        tracing::warn!(target: "api", purged = n, "store purged before run-all");
        n
    } else {
        0
    };
    let report = state.scheduler.run_all().await;
    Ok(Json(RunAllResp { purged, report }))
}

#[derive(Serialize)]
struct PurgeResp {
    purged: usize,
}

async fn admin_purge(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PurgeResp>, ApiError> {
    authorize(&state, &headers)?;
    let purged = state.store.purge().await.map_err(internal)?;
    tracing::warn!(target: "api", purged, "store purged");
    Ok(Json(PurgeResp { purged }))
}

#[derive(Deserialize, Default)]
struct CleanupReq {
    #[serde(default)]
    patterns: Vec<String>,
}

#[derive(Serialize)]
struct CleanupResp {
    scanned: usize,
    deleted: usize,
    ids: Vec<String>,
}

/// Delete stored articles matching any pattern, or (no patterns) those the
/// current policy prefilter would now reject.
async fn admin_cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CleanupResp>, ApiError> {
    authorize(&state, &headers)?;
    let req: CleanupReq = if body.iter().all(u8::is_ascii_whitespace) {
        CleanupReq::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid cleanup body: {e}")))?
    };
    let patterns: Vec<String> = req
        .patterns
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();

    let rows = state.store.list().await.map_err(internal)?;
    let scanned = rows.len();
    let ids: Vec<String> = rows
        .iter()
        .filter(|a| {
            if patterns.is_empty() {
                state
                    .moderation
                    .prefilter(&ModerationInput {
                        title: &a.title,
                        description: &a.description,
                        url: &a.url,
                        domain: &a.source_domain,
                        language: &a.language,
                    })
                    .is_some()
            } else {
                let text = moderation_text(&a.title, &a.description);
                patterns.iter().any(|p| text.contains(p.as_str()))
            }
        })
        .map(|a| a.id.clone())
        .collect();

    let deleted = if ids.is_empty() {
        0
    } else {
        state.store.delete(&ids).await.map_err(internal)?
    };
    tracing::info!(
        target: "api",
        scanned,
        deleted,
        by_patterns = !patterns.is_empty(),
        "cleanup finished"
    );
    Ok(Json(CleanupResp {
        scanned,
        deleted,
        ids,
    }))
}
