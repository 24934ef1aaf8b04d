// tests/scraper_fallback.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use dobre_zpravy::ingest::fetcher::StaticFetcher;
use dobre_zpravy::scraper::{region_text, ArticleScraper, ScrapeResult};

const PAGE_URL: &str = "https://www.region-zpravy.cz/zpravy/vysadba-stromu";
const PAGE: &str = include_str!("fixtures/article_nested.html");

const P1: &str = "Dobrovolníci z Brna během víkendu vysadili přes tisíc stromů v lužním lese u Soutoku.";
const P2: &str = "Akci podpořilo město i místní školy, které přivedly stovky dětí s rodiči a učiteli.";
const P3: &str = "Organizátoři plánují další výsadbu na jaře a zvou všechny, kdo chtějí pomoci s péčí o les.";

fn scraper_for(page: &str) -> ArticleScraper {
    ArticleScraper::new(Arc::new(StaticFetcher::new().with_page(PAGE_URL, page)))
}

#[tokio::test]
async fn third_selector_wins_when_first_two_are_too_short() {
    let r = scraper_for(PAGE).scrape(PAGE_URL).await;
    let content = r.content.expect("article body extracted");
    assert_eq!(content, format!("{P1}\n\n{P2}\n\n{P3}"));
    assert_eq!(
        r.image.as_deref(),
        Some("https://cdn.region-zpravy.cz/og/stromy.jpg")
    );
}

#[tokio::test]
async fn nested_region_excludes_siblings_and_junk() {
    let r = scraper_for(PAGE).scrape(PAGE_URL).await;
    let content = r.content.unwrap();
    for absent in ["Komentář čtenáře", "Sdílejte", "Skrytý komentář", "Region Zprávy, všechna", "dataLayer"] {
        assert!(!content.contains(absent), "{absent:?} leaked into {content:?}");
    }
}

#[tokio::test]
async fn inline_image_used_without_meta_tags() {
    let page: String = PAGE
        .lines()
        .filter(|l| !l.contains("og:image"))
        .collect::<Vec<_>>()
        .join("\n");
    let r = scraper_for(&page).scrape(PAGE_URL).await;
    assert!(r.content.is_some());
    assert_eq!(
        r.image.as_deref(),
        Some("https://www.region-zpravy.cz/img/stromy-inline.jpg")
    );
}

#[test]
fn text_before_an_unclosed_paragraph_is_kept() {
    let t = region_text(&format!("<p>{P1}<p>{P2}</p><p>{P3}</p>"));
    assert_eq!(t, format!("{P1}\n\n{P2}\n\n{P3}"));
}

#[tokio::test]
async fn implicitly_closed_lead_paragraph_survives_scraping() {
    let page = PAGE.replacen(&format!("{P1}</p>"), P1, 1);
    assert_ne!(page, PAGE);
    let r = scraper_for(&page).scrape(PAGE_URL).await;
    assert_eq!(r.content.unwrap(), format!("{P1}\n\n{P2}\n\n{P3}"));
}

#[test]
fn many_unclosed_paragraphs_scale_linearly() {
    let mut html = String::from("<div class=\"article-body\">");
    for i in 0..20_000 {
        html.push_str(&format!("<p>Odstavec číslo {i} bez uzavírací značky "));
    }
    html.push_str("</div>");

    let started = Instant::now();
    let t = region_text(&html);
    let elapsed = started.elapsed();

    assert!(t.starts_with("Odstavec číslo 0 bez"));
    assert!(t.contains("Odstavec číslo 19999"));
    assert_eq!(t.split("\n\n").count(), 20_000);
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
}

#[tokio::test]
async fn unreachable_page_is_empty_not_an_error() {
    let s = ArticleScraper::new(Arc::new(StaticFetcher::new()));
    assert_eq!(s.scrape(PAGE_URL).await, ScrapeResult::default());
}

#[test]
fn selector_priority_is_data() {
    let s = ArticleScraper::new(Arc::new(StaticFetcher::new()));
    let order: Vec<String> = s.selectors().iter().map(|s| s.to_string()).collect();
    assert_eq!(order.first().map(String::as_str), Some("article"));
    assert_eq!(order.get(1).map(String::as_str), Some("[role=\"article\"]"));
    assert_eq!(order.get(2).map(String::as_str), Some(".article-body"));
    assert_eq!(order.last().map(String::as_str), Some("main"));
    assert_eq!(order.len(), 9);
}
