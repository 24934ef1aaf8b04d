// src/ingest/types.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// One parsed feed entry. Ephemeral: consumed by dedup/moderation, never persisted as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Full body when the feed embeds one.
    pub content: Option<String>,
    /// Raw publish-date string; parsed at insert time.
    pub pub_date: Option<String>,
    pub image_url: Option<String>,
}

/// What the caller expects back; drives the `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Feed,
    Html,
}

impl Accept {
    pub fn header_value(self) -> &'static str {
        match self {
            Accept::Feed => {
                "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.7"
            }
            Accept::Html => "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        }
    }
}

/// Outbound HTTP GET seam. Non-2xx must be an `Err`.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn get_text(&self, url: &str, accept: Accept) -> Result<String>;
}
