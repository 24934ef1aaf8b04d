// src/scraper.rs
//! Best-effort full-text and image extraction from an article page.
//!
//! Called lazily when a stored article has no content. Any failure yields an
//! empty `ScrapeResult`; serving an article never depends on this.

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;

use crate::ingest::parser::qualifies_inline_image;
use crate::ingest::types::{Accept, Fetcher};
use crate::markup::{self, OpenTag, Selector};
use crate::text;

/// Content regions, most specific first.
pub const SELECTORS: &[&str] = &[
    "article",
    "[role=\"article\"]",
    ".article-body",
    ".article-content",
    ".post-content",
    ".entry-content",
    ".story-body",
    ".content-body",
    "main",
];

pub const MIN_CONTENT_CHARS: usize = 200;
pub const MIN_PARAGRAPH_CHARS: usize = 20;

const STRIPPED_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "iframe", "form",
];

/// class/id fragments of widgets that are never article text.
const JUNK_FRAGMENTS: &[&str] = &[
    "related",
    "share",
    "social",
    "newsletter",
    "subscribe",
    "advert",
    "sponsor",
    "promo",
    "banner",
    "comment",
    "cookie",
    "sidebar",
    "recommend",
    "popular",
    "breadcrumb",
    "author-bio",
    "souvisejici",
    "reklama",
    "diskuse",
];

/// Exact class/id tokens (or their `-`/`_` prefixes) too short to match as fragments.
const JUNK_TOKENS: &[&str] = &["ad", "ads", "tags", "widget"];

/// Lines that start trailing boilerplate.
const FOOTER_MARKERS: &[&str] = &[
    "related reading",
    "related articles",
    "read more",
    "read also",
    "share this",
    "share:",
    "source:",
    "sources:",
    "tags:",
    "související",
    "čtěte také",
    "přečtěte si také",
    "mohlo by vás zajímat",
    "sdílet",
    "zdroj:",
    "štítky:",
    "tagy:",
    "súvisiace",
    "čítajte aj",
];

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "scraper_runs_total",
            "Article scrapes, labelled by outcome (content, image_only, empty, failed)."
        );
    });
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeResult {
    pub content: Option<String>,
    pub image: Option<String>,
}

impl ScrapeResult {
    fn outcome(&self) -> &'static str {
        match (&self.content, &self.image) {
            (Some(_), _) => "content",
            (None, Some(_)) => "image_only",
            (None, None) => "empty",
        }
    }
}

pub struct ArticleScraper {
    fetcher: Arc<dyn Fetcher>,
    selectors: Vec<Selector>,
}

impl ArticleScraper {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        ensure_metrics_described();
        let selectors = SELECTORS
            .iter()
            .filter_map(|s| s.parse::<Selector>().ok())
            .collect();
        Self { fetcher, selectors }
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    pub async fn scrape(&self, url: &str) -> ScrapeResult {
        let html = match self.fetcher.get_text(url, Accept::Html).await {
            Ok(h) => h,
            Err(e) => {
                counter!("scraper_runs_total", "outcome" => "failed").increment(1);
                tracing::warn!(target: "scraper", %url, error = %format!("{e:#}"), "page fetch failed");
                return ScrapeResult::default();
            }
        };
        let result = self.extract(url, &html);
        counter!("scraper_runs_total", "outcome" => result.outcome()).increment(1);
        tracing::debug!(
            target: "scraper",
            %url,
            outcome = result.outcome(),
            chars = result.content.as_deref().map_or(0, |c| c.chars().count()),
            "scraped"
        );
        result
    }

    /// Pure extraction over an already fetched page.
    pub fn extract(&self, page_url: &str, html: &str) -> ScrapeResult {
        let meta = meta_image(html);

        let mut found: Option<(String, &str)> = None;
        for sel in &self.selectors {
            let Some(region) = markup::extract_region(html, sel) else {
                continue;
            };
            let text = region_text(region);
            if text.chars().count() >= MIN_CONTENT_CHARS {
                tracing::trace!(target: "scraper", selector = %sel, "region accepted");
                found = Some((text, region));
                break;
            }
        }
        if found.is_none() {
            if let Some(body) = markup::first_element(html, "body") {
                let text = region_text(body.inner);
                if text.chars().count() >= MIN_CONTENT_CHARS {
                    found = Some((text, body.inner));
                }
            }
        }

        let (content, region) = match found {
            Some((text, region)) => (Some(trim_footer(&text)), Some(region)),
            None => (None, None),
        };
        let image = meta.or_else(|| region.and_then(|r| inline_image(r, page_url)));
        ScrapeResult { content, image }
    }
}

/// `og:image`, then `twitter:image`, in any attribute order.
pub fn meta_image(html: &str) -> Option<String> {
    let metas: Vec<OpenTag<'_>> = markup::open_tags(html, "meta").collect();
    ["og:image", "twitter:image", "twitter:image:src"]
        .iter()
        .find_map(|key| {
            metas.iter().find_map(|m| {
                let named = m.attr("property").or_else(|| m.attr("name"))?;
                if !named.trim().eq_ignore_ascii_case(key) {
                    return None;
                }
                m.attr("content")
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
            })
        })
}

fn is_junk(tag: &OpenTag<'_>) -> bool {
    let ident = format!(
        "{} {}",
        tag.attr("class").unwrap_or_default(),
        tag.attr("id").unwrap_or_default()
    )
    .to_lowercase();
    ident.split_whitespace().any(|tok| {
        JUNK_FRAGMENTS.iter().any(|f| tok.contains(f))
            || JUNK_TOKENS.iter().any(|t| {
                tok == *t
                    || tok
                        .strip_prefix(t)
                        .is_some_and(|rest| rest.starts_with('-') || rest.starts_with('_'))
            })
    })
}

/// Readable text of a region: boilerplate removed, `<p>` texts joined by blank lines.
pub fn region_text(region: &str) -> String {
    let cleaned = markup::strip_comments(region);
    let cleaned = markup::strip_elements(&cleaned, |t| {
        STRIPPED_TAGS.iter().any(|n| t.name.eq_ignore_ascii_case(n))
    });
    let cleaned = markup::strip_elements(&cleaned, is_junk);

    let paragraphs: Vec<String> = markup::paragraphs(&cleaned)
        .into_iter()
        .map(plain)
        .filter(|t| t.chars().count() > MIN_PARAGRAPH_CHARS)
        .collect();
    if paragraphs.len() >= 2 {
        return paragraphs.join("\n\n");
    }
    plain(&cleaned)
}

fn plain(markup: &str) -> String {
    text::collapse_whitespace(&text::clean(&text::strip_tags(markup)))
}

/// Cut trailing boilerplate: the first marker line found past the first third.
pub fn trim_footer(text: &str) -> String {
    let total = text.len();
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        if start * 3 < total {
            continue;
        }
        let lower = line.trim().to_lowercase();
        if FOOTER_MARKERS.iter().any(|m| lower.starts_with(m)) {
            return text[..start].trim_end().to_string();
        }
    }
    text.trim_end().to_string()
}

fn inline_image(region: &str, page_url: &str) -> Option<String> {
    let src = markup::open_tags(region, "img")
        .filter(qualifies_inline_image)
        .find_map(|t| t.attr("src"))?;
    let src = src.trim();
    if src.starts_with("//") {
        return Some(format!("https:{src}"));
    }
    match url::Url::parse(page_url).and_then(|base| base.join(src)) {
        Ok(u) => Some(u.to_string()),
        Err(_) => Some(src.to_string()),
    }
}
