// src/ingest/fetcher.rs
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::ingest::types::{Accept, Fetcher};
use crate::sources::Source;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
pub const ACCEPT_LANGUAGE_VALUE: &str = "cs,sk;q=0.9,en;q=0.8";

/// reqwest-backed fetcher with browser-like headers. Follows redirects.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE),
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        let http = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(Duration::from_secs(5).min(timeout))
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get_text(&self, url: &str, accept: Accept) -> Result<String> {
        let resp = self
            .http
            .get(url)
            .header(ACCEPT, accept.header_value())
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("GET {url}: HTTP {status}");
        }
        resp.text()
            .await
            .with_context(|| format!("reading body of {url}"))
    }
}

/// Fetch a source's feed. Any failure is logged and becomes `None`.
pub async fn retrieve_feed(fetcher: &dyn Fetcher, source: &Source) -> Option<String> {
    match fetcher.get_text(&source.url, Accept::Feed).await {
        Ok(body) => Some(body),
        Err(e) => {
            tracing::warn!(target: "ingest", source = %source.name, error = %e, "feed retrieval failed");
            counter!("ingest_source_failures_total").increment(1);
            None
        }
    }
}

/// Canned responses keyed by URL; unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    pages: HashMap<String, std::result::Result<String, u16>>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(url.into(), Ok(body.into()));
        self
    }

    pub fn with_status(mut self, url: impl Into<String>, status: u16) -> Self {
        self.pages.insert(url.into(), Err(status));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn get_text(&self, url: &str, _accept: Accept) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.pages.get(url) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(status)) => Err(anyhow!("GET {url}: HTTP {status}")),
            None => Err(anyhow!("GET {url}: HTTP 404")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(url: &str) -> Source {
        Source {
            name: "Test".into(),
            url: url.into(),
            domain: "test.cz".into(),
            language: "cs".into(),
            location: "czech".into(),
        }
    }

    #[tokio::test]
    async fn non_success_becomes_none() {
        let f = StaticFetcher::new()
            .with_page("https://ok.cz/rss", "<rss/>")
            .with_status("https://gone.cz/rss", 410);
        assert_eq!(
            retrieve_feed(&f, &source("https://ok.cz/rss")).await.as_deref(),
            Some("<rss/>")
        );
        assert!(retrieve_feed(&f, &source("https://gone.cz/rss")).await.is_none());
        assert!(retrieve_feed(&f, &source("https://nowhere.cz/rss")).await.is_none());
        assert_eq!(f.calls(), 3);
    }

    #[test]
    fn http_client_builds() {
        assert!(HttpFetcher::new(Duration::from_secs(15)).is_ok());
    }
}
