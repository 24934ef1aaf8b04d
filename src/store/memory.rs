// src/store/memory.rs
use anyhow::{anyhow, Result};
use std::sync::RwLock;

use super::{Article, ArticleIndex, ArticleStore};

/// Process-local store. Used by tests and as the fallback when no store path is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<ArticleIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_articles(articles: Vec<Article>) -> Self {
        Self {
            inner: RwLock::new(ArticleIndex::from_articles(articles)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("article store lock poisoned")
}

#[async_trait::async_trait]
impl ArticleStore for MemoryStore {
    async fn exists(&self, id_or_url: &str) -> Result<bool> {
        Ok(self.inner.read().map_err(poisoned)?.exists(id_or_url))
    }

    async fn insert(&self, article: Article) -> Result<bool> {
        Ok(self.inner.write().map_err(poisoned)?.insert(article))
    }

    async fn backfill(
        &self,
        id: &str,
        content: Option<String>,
        image_url: Option<String>,
    ) -> Result<()> {
        self.inner
            .write()
            .map_err(poisoned)?
            .backfill(id, content, image_url);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Article>> {
        Ok(self.inner.read().map_err(poisoned)?.get(id))
    }

    async fn list(&self) -> Result<Vec<Article>> {
        Ok(self.inner.read().map_err(poisoned)?.list())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        Ok(self.inner.write().map_err(poisoned)?.delete(ids))
    }

    async fn purge(&self) -> Result<usize> {
        Ok(self.inner.write().map_err(poisoned)?.purge())
    }
}
