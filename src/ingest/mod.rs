// src/ingest/mod.rs
pub mod dedup;
pub mod fetcher;
pub mod parser;
pub mod scheduler;
pub mod types;

use chrono::{DateTime, NaiveDateTime, Utc};
use futures::FutureExt;
use metrics::{counter, describe_counter, describe_gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::ingest::dedup::Deduplicator;
use crate::ingest::fetcher::retrieve_feed;
use crate::ingest::types::{FeedItem, Fetcher};
use crate::moderation::{ModerationInput, ModerationPipeline, ModerationVerdict};
use crate::sources::Source;
use crate::store::{Article, ArticleStore};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_total", "Feed items parsed from sources.");
        describe_counter!(
            "ingest_dedup_skipped_total",
            "Items skipped because their id or url is already stored."
        );
        describe_counter!("ingest_inserted_total", "Articles admitted and stored.");
        describe_counter!(
            "ingest_source_failures_total",
            "Sources whose feed could not be retrieved."
        );
        describe_counter!(
            "ingest_item_errors_total",
            "Items that failed (error or panic) and were skipped."
        );
        describe_counter!("scheduler_batches_total", "Scheduled batches run.");
        describe_gauge!("scheduler_cursor", "Persisted source cursor after the last batch.");
    });
}

/// Parse a feed date (RFC 2822, RFC 3339 or a few common shapes). `None` if unparsable.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d.%m.%Y %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    None
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Stop the current run at the first `ai_unavailable` verdict.
    pub halt_on_gate_unavailable: bool,
}

/// What happened to one feed item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Duplicate,
    Rejected(ModerationVerdict),
    Inserted(ModerationVerdict),
}

/// Per-source tally.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SourceReport {
    pub source: String,
    pub fetched: bool,
    pub items: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub inserted: usize,
    pub gate_unavailable: usize,
    pub errors: usize,
    pub halted: bool,
}

/// retrieve → parse → dedup → moderate → insert, one source at a time.
pub struct Ingestor {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn ArticleStore>,
    moderation: Arc<ModerationPipeline>,
    opts: IngestOptions,
}

impl Ingestor {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn ArticleStore>,
        moderation: Arc<ModerationPipeline>,
        opts: IngestOptions,
    ) -> Self {
        ensure_metrics_described();
        Self {
            fetcher,
            store,
            moderation,
            opts,
        }
    }

    pub fn options(&self) -> IngestOptions {
        self.opts
    }

    pub fn store(&self) -> &Arc<dyn ArticleStore> {
        &self.store
    }

    pub fn moderation(&self) -> &Arc<ModerationPipeline> {
        &self.moderation
    }

    pub async fn process_source(&self, source: &Source) -> SourceReport {
        let mut report = SourceReport {
            source: source.name.clone(),
            ..Default::default()
        };
        let Some(body) = retrieve_feed(self.fetcher.as_ref(), source).await else {
            return report;
        };
        report.fetched = true;
        let items = parser::parse_feed(&body);
        self.process_items(source, items, &mut report).await;
        tracing::info!(
            target: "ingest",
            source = %source.name,
            items = report.items,
            inserted = report.inserted,
            duplicates = report.duplicates,
            rejected = report.rejected,
            errors = report.errors,
            "source processed"
        );
        report
    }

    /// Items are isolated: an error or panic in one is logged and the rest continue.
    pub async fn process_items(
        &self,
        source: &Source,
        items: Vec<FeedItem>,
        report: &mut SourceReport,
    ) {
        for item in items {
            report.items += 1;
            let fut = AssertUnwindSafe(self.process_item(source, &item)).catch_unwind();
            match fut.await {
                Ok(Ok(ItemOutcome::Duplicate)) => report.duplicates += 1,
                Ok(Ok(ItemOutcome::Inserted(_))) => report.inserted += 1,
                Ok(Ok(ItemOutcome::Rejected(v))) => {
                    report.rejected += 1;
                    if v.ai_unavailable {
                        report.gate_unavailable += 1;
                        if self.opts.halt_on_gate_unavailable {
                            tracing::warn!(
                                target: "ingest",
                                source = %source.name,
                                "semantic gate unavailable; halting run"
                            );
                            report.halted = true;
                            return;
                        }
                    }
                }
                Ok(Err(e)) => {
                    report.errors += 1;
                    counter!("ingest_item_errors_total").increment(1);
                    tracing::error!(
                        target: "ingest",
                        source = %source.name,
                        title = %item.title,
                        error = %format!("{e:#}"),
                        "item failed"
                    );
                }
                Err(_) => {
                    report.errors += 1;
                    counter!("ingest_item_errors_total").increment(1);
                    tracing::error!(
                        target: "ingest",
                        source = %source.name,
                        title = %item.title,
                        "item panicked"
                    );
                }
            }
        }
    }

    pub async fn process_item(&self, source: &Source, item: &FeedItem) -> anyhow::Result<ItemOutcome> {
        let (id, known) = Deduplicator::new(self.store.as_ref()).check(&item.link).await?;
        if known {
            return Ok(ItemOutcome::Duplicate);
        }

        let verdict = self
            .moderation
            .moderate(&ModerationInput {
                title: &item.title,
                description: &item.description,
                url: &item.link,
                domain: &source.domain,
                language: &source.language,
            })
            .await;
        if !verdict.pass {
            return Ok(ItemOutcome::Rejected(verdict));
        }

        let now = Utc::now();
        let article = Article {
            id,
            title: item.title.clone(),
            description: item.description.clone(),
            content: item.content.clone().filter(|c| !c.trim().is_empty()),
            url: item.link.clone(),
            image_url: item.image_url.clone(),
            source_name: source.name.clone(),
            source_domain: source.domain.clone(),
            language: source.language.clone(),
            category: verdict.category.clone(),
            location: source.location.clone(),
            is_adult: verdict.is_adult,
            positivity_score: verdict.positivity_score,
            published_at: item
                .pub_date
                .as_deref()
                .and_then(parse_pub_date)
                .unwrap_or(now),
            created_at: now,
        };
        if self.store.insert(article).await? {
            counter!("ingest_inserted_total").increment(1);
            tracing::info!(
                target: "ingest",
                source = %source.name,
                title = %item.title,
                category = %verdict.category,
                "article admitted"
            );
            Ok(ItemOutcome::Inserted(verdict))
        } else {
            Ok(ItemOutcome::Duplicate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn pub_date_formats() {
        let d = parse_pub_date("Tue, 14 Jan 2025 08:30:00 +0100").unwrap();
        assert_eq!((d.hour(), d.minute()), (7, 30));
        let d = parse_pub_date("2025-01-14T08:30:00Z").unwrap();
        assert_eq!(d.day(), 14);
        assert!(parse_pub_date("2025-01-14 08:30:00").is_some());
        assert!(parse_pub_date("2025-01-14").is_some());
        assert!(parse_pub_date("včera").is_none());
        assert!(parse_pub_date("  ").is_none());
    }
}
