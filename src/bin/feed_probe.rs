//! Run one feed through parse + moderation and print what would be admitted.
//! Nothing is stored. Stops at the first item the semantic gate cannot decide.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use dobre_zpravy::ingest::fetcher::HttpFetcher;
use dobre_zpravy::ingest::parser::parse_feed;
use dobre_zpravy::ingest::types::{Accept, Fetcher};
use dobre_zpravy::moderation::classifier::CategoryClassifier;
use dobre_zpravy::moderation::gate::{build_gate, GateConfig};
use dobre_zpravy::moderation::policy::{PolicyHandle, PolicyTables};
use dobre_zpravy::{ModerationInput, ModerationPipeline};

#[derive(Parser, Debug)]
#[command(name = "feed-probe", about = "Dry-run one feed through the moderation pipeline")]
struct Args {
    /// Feed URL
    url: String,
    /// Domain used for blacklist/trusted checks (default: the URL host without `www.`)
    #[arg(long)]
    domain: Option<String>,
    #[arg(long, default_value = "cs")]
    language: String,
    /// Only look at the first N items
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    policy: Option<PathBuf>,
    #[arg(long)]
    categories: Option<PathBuf>,
    #[arg(long)]
    gate_config: Option<PathBuf>,
}

fn host_domain(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

fn shorten(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
    let args = Args::parse();

    let policy = match &args.policy {
        Some(p) => PolicyTables::load_from(p)?,
        None => PolicyTables::load_default()?,
    };
    let classifier = match &args.categories {
        Some(p) => CategoryClassifier::load_from(p)?,
        None => CategoryClassifier::load_default()?,
    };
    let gate_cfg = match &args.gate_config {
        Some(p) => GateConfig::load_from_file(p)?,
        None => GateConfig::load_default()?,
    };
    let pipeline = ModerationPipeline::new(
        PolicyHandle::new(policy),
        Arc::new(classifier),
        build_gate(&gate_cfg)?,
    );

    let domain = args
        .domain
        .clone()
        .or_else(|| host_domain(&args.url))
        .ok_or_else(|| anyhow::anyhow!("cannot derive a domain from {}", args.url))?;

    let fetcher = HttpFetcher::new(Duration::from_secs(15))?;
    let body = fetcher.get_text(&args.url, Accept::Feed).await?;
    let mut items = parse_feed(&body);
    if let Some(n) = args.limit {
        items.truncate(n);
    }
    println!(
        "{} items from {} (domain {}, gate {})\n",
        items.len(),
        args.url,
        domain,
        pipeline.gate_provider()
    );

    let mut passed = 0usize;
    for (i, item) in items.iter().enumerate() {
        let v = pipeline
            .moderate(&ModerationInput {
                title: &item.title,
                description: &item.description,
                url: &item.link,
                domain: &domain,
                language: &args.language,
            })
            .await;
        if v.pass {
            passed += 1;
        }
        println!(
            "{:>3}. {:<4} {:<12} {:<18} {}",
            i + 1,
            if v.pass { "PASS" } else { "-" },
            v.category,
            v.stage.as_str(),
            shorten(&item.title, 80)
        );
        if !v.pass {
            println!("          {}", v.reason);
        }
        if v.ai_unavailable {
            println!("\nSemantic gate unavailable; stopping so nothing is judged without it.");
            std::process::exit(2);
        }
    }
    println!("\n{passed}/{} would be admitted", items.len());
    Ok(())
}
