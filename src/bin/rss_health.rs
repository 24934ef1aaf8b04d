//! Health check across every configured source: fetch and parse each feed
//! with a small worker pool and print a status table (ERROR, then WARNING, then OK).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Parser;
use futures::stream::{self, StreamExt};

use dobre_zpravy::ingest::fetcher::HttpFetcher;
use dobre_zpravy::ingest::parse_pub_date;
use dobre_zpravy::ingest::parser::parse_feed;
use dobre_zpravy::ingest::types::{Accept, Fetcher};
use dobre_zpravy::{Source, SourceRegistry};

#[derive(Parser, Debug)]
#[command(name = "rss-health", about = "Check that every configured feed answers and is fresh")]
struct Args {
    /// Sources file (default: $SOURCES_PATH or config/sources.toml)
    #[arg(long)]
    sources: Option<PathBuf>,
    #[arg(long, default_value_t = 10)]
    workers: usize,
    #[arg(long, default_value_t = 15)]
    timeout_secs: u64,
    /// Newest item older than this is a warning.
    #[arg(long, default_value_t = 30)]
    stale_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Status {
    Error,
    Warning,
    Ok,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::Error => "ERROR",
            Status::Warning => "WARNING",
            Status::Ok => "OK",
        }
    }
}

#[derive(Debug)]
struct Row {
    name: String,
    status: Status,
    items: usize,
    newest: Option<DateTime<Utc>>,
    note: String,
}

/// Status of a fetched feed from its item count and newest date.
fn classify(
    items: usize,
    newest: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    stale_days: i64,
) -> (Status, String) {
    if items == 0 {
        return (Status::Warning, "no items".into());
    }
    match newest {
        Some(d) if (now - d).num_days() > stale_days => (
            Status::Warning,
            format!("stale: newest item {} days old", (now - d).num_days()),
        ),
        Some(_) => (Status::Ok, String::new()),
        None => (Status::Ok, "no parsable dates".into()),
    }
}

async fn check(fetcher: &dyn Fetcher, source: &Source, stale_days: i64) -> Row {
    let body = match fetcher.get_text(&source.url, Accept::Feed).await {
        Ok(b) => b,
        Err(e) => {
            return Row {
                name: source.name.clone(),
                status: Status::Error,
                items: 0,
                newest: None,
                note: format!("{e:#}"),
            }
        }
    };
    let items = parse_feed(&body);
    let newest = items
        .iter()
        .filter_map(|i| i.pub_date.as_deref().and_then(parse_pub_date))
        .max();
    let (status, note) = classify(items.len(), newest, Utc::now(), stale_days);
    Row {
        name: source.name.clone(),
        status,
        items: items.len(),
        newest,
        note,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
        )
        .init();
    let args = Args::parse();

    let registry = match &args.sources {
        Some(p) => SourceRegistry::load_from(p)?,
        None => SourceRegistry::load_default()?,
    };
    let fetcher: Arc<dyn Fetcher> =
        Arc::new(HttpFetcher::new(Duration::from_secs(args.timeout_secs))?);

    println!(
        "Checking {} sources with {} workers...",
        registry.len(),
        args.workers
    );
    let mut rows: Vec<Row> = stream::iter(registry.iter().cloned())
        .map(|source| {
            let fetcher = fetcher.clone();
            async move { check(fetcher.as_ref(), &source, args.stale_days).await }
        })
        .buffer_unordered(args.workers.max(1))
        .collect()
        .await;
    rows.sort_by(|a, b| a.status.cmp(&b.status).then_with(|| a.name.cmp(&b.name)));

    let width = rows.iter().map(|r| r.name.chars().count()).max().unwrap_or(6).max(6);
    println!("{:<8} {:<width$} {:>6}  {:<10}  NOTE", "STATUS", "SOURCE", "ITEMS", "NEWEST");
    for r in &rows {
        println!(
            "{:<8} {:<width$} {:>6}  {:<10}  {}",
            r.status.as_str(),
            r.name,
            r.items,
            r.newest
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".into()),
            r.note
        );
    }

    let count = |s: Status| rows.iter().filter(|r| r.status == s).count();
    println!(
        "\nOK: {}  WARNING: {}  ERROR: {}",
        count(Status::Ok),
        count(Status::Warning),
        count(Status::Error)
    );
    Ok(())
}
