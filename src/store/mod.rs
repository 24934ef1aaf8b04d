// src/store/mod.rs
//! Persisted articles and the small read/write contract the pipeline needs.

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    /// `ingest::dedup::article_id(url)`
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub content: Option<String>,
    pub url: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub source_name: String,
    pub source_domain: String,
    pub language: String,
    pub category: String,
    pub location: String,
    pub is_adult: bool,
    pub positivity_score: f32,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Storage contract consumed by ingest, the API and admin operations.
#[async_trait::async_trait]
pub trait ArticleStore: Send + Sync {
    /// True when a row has this id *or* this literal url.
    async fn exists(&self, id_or_url: &str) -> Result<bool>;
    /// Insert-or-ignore. Returns `false` on an id/url conflict.
    async fn insert(&self, article: Article) -> Result<bool>;
    /// Coalesce-only update: fills `content` / `image_url` only where currently empty.
    async fn backfill(&self, id: &str, content: Option<String>, image_url: Option<String>)
        -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Article>>;
    /// Newest first.
    async fn list(&self) -> Result<Vec<Article>>;
    async fn delete(&self, ids: &[String]) -> Result<usize>;
    async fn purge(&self) -> Result<usize>;
}

/// Shared in-memory index behind both store implementations.
#[derive(Debug, Default)]
pub(crate) struct ArticleIndex {
    by_id: HashMap<String, Article>,
    urls: HashSet<String>,
}

fn is_blank(v: &Option<String>) -> bool {
    v.as_deref().map(|s| s.trim().is_empty()).unwrap_or(true)
}

impl ArticleIndex {
    pub(crate) fn from_articles(articles: Vec<Article>) -> Self {
        let mut idx = Self::default();
        for a in articles {
            idx.insert(a);
        }
        idx
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn exists(&self, id_or_url: &str) -> bool {
        self.by_id.contains_key(id_or_url) || self.urls.contains(id_or_url)
    }

    pub(crate) fn insert(&mut self, article: Article) -> bool {
        if self.by_id.contains_key(&article.id) || self.urls.contains(&article.url) {
            return false;
        }
        self.urls.insert(article.url.clone());
        self.by_id.insert(article.id.clone(), article);
        true
    }

    pub(crate) fn backfill(
        &mut self,
        id: &str,
        content: Option<String>,
        image_url: Option<String>,
    ) -> bool {
        let Some(a) = self.by_id.get_mut(id) else {
            return false;
        };
        let mut changed = false;
        if is_blank(&a.content) && !is_blank(&content) {
            a.content = content;
            changed = true;
        }
        if is_blank(&a.image_url) && !is_blank(&image_url) {
            a.image_url = image_url;
            changed = true;
        }
        changed
    }

    pub(crate) fn get(&self, id: &str) -> Option<Article> {
        self.by_id.get(id).cloned()
    }

    pub(crate) fn list(&self) -> Vec<Article> {
        let mut v: Vec<Article> = self.by_id.values().cloned().collect();
        v.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        v
    }

    pub(crate) fn delete(&mut self, ids: &[String]) -> usize {
        let mut n = 0;
        for id in ids {
            if let Some(a) = self.by_id.remove(id) {
                self.urls.remove(&a.url);
                n += 1;
            }
        }
        n
    }

    pub(crate) fn purge(&mut self) -> usize {
        let n = self.by_id.len();
        self.by_id.clear();
        self.urls.clear();
        n
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn article(id: &str, url: &str) -> Article {
        let now = Utc::now();
        Article {
            id: id.into(),
            title: "Vlk se vrátil do Krkonoš".into(),
            description: "Po sto letech".into(),
            content: None,
            url: url.into(),
            image_url: None,
            source_name: "Test".into(),
            source_domain: "test.cz".into(),
            language: "cs".into(),
            category: "environment".into(),
            location: "czech".into(),
            is_adult: false,
            positivity_score: 0.1,
            published_at: now,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::article;
    use super::*;

    #[test]
    fn insert_ignores_id_and_url_conflicts() {
        let mut idx = ArticleIndex::default();
        assert!(idx.insert(article("a", "https://x.cz/1")));
        assert!(!idx.insert(article("a", "https://x.cz/2")));
        assert!(!idx.insert(article("b", "https://x.cz/1")));
        assert!(idx.exists("a"));
        assert!(idx.exists("https://x.cz/1"));
        assert!(!idx.exists("https://x.cz/2"));
    }

    #[test]
    fn backfill_never_overwrites() {
        let mut idx = ArticleIndex::default();
        let mut a = article("a", "https://x.cz/1");
        a.image_url = Some("https://x.cz/orig.jpg".into());
        idx.insert(a);

        assert!(idx.backfill("a", Some("body".into()), Some("https://x.cz/new.jpg".into())));
        let got = idx.get("a").unwrap();
        assert_eq!(got.content.as_deref(), Some("body"));
        assert_eq!(got.image_url.as_deref(), Some("https://x.cz/orig.jpg"));

        assert!(!idx.backfill("a", Some("other".into()), None));
        assert_eq!(idx.get("a").unwrap().content.as_deref(), Some("body"));
        assert!(!idx.backfill("missing", Some("x".into()), None));
    }

    #[test]
    fn delete_frees_url() {
        let mut idx = ArticleIndex::default();
        idx.insert(article("a", "https://x.cz/1"));
        assert_eq!(idx.delete(&["a".into(), "zz".into()]), 1);
        assert!(!idx.exists("https://x.cz/1"));
        assert!(idx.insert(article("a", "https://x.cz/1")));
        assert_eq!(idx.purge(), 1);
    }
}
