// src/store/file.rs
//! Durable JSON snapshot store. Every mutation rewrites the snapshot via tmp + rename.
//!
//! Disk writes run on the blocking pool. The index lock is held until the
//! write lands, so snapshots reach disk in mutation order.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{Article, ArticleIndex, ArticleStore};

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: Mutex<ArticleIndex>,
}

impl JsonFileStore {
    /// Open (or create on first write) a snapshot at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let articles: Vec<Article> = match fs::read_to_string(&path) {
            Ok(s) if s.trim().is_empty() => Vec::new(),
            Ok(s) => serde_json::from_str(&s)
                .with_context(|| format!("parsing article snapshot {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };
        tracing::info!(target: "store", path = %path.display(), articles = articles.len(), "article store opened");
        Ok(Self {
            path,
            inner: Mutex::new(ArticleIndex::from_articles(articles)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_index<T>(&self, f: impl FnOnce(&mut ArticleIndex) -> (T, bool)) -> Result<T> {
        let mut guard = self.inner.lock().await;
        let (out, dirty) = f(&mut *guard);
        if dirty {
            let json = serde_json::to_vec_pretty(&guard.list())?;
            write_atomic(&self.path, json).await?;
        }
        Ok(out)
    }
}

/// Replace `path` with `body` via a sibling `.json.tmp` and rename, off the async workers.
pub async fn write_atomic(path: &Path, body: Vec<u8>) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &body))
        .await
        .context("snapshot writer task")?
}

fn write_atomic_blocking(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    f.write_all(body)?;
    f.sync_all()?;
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[async_trait::async_trait]
impl ArticleStore for JsonFileStore {
    async fn exists(&self, id_or_url: &str) -> Result<bool> {
        self.with_index(|idx| (idx.exists(id_or_url), false)).await
    }

    async fn insert(&self, article: Article) -> Result<bool> {
        self.with_index(|idx| {
            let inserted = idx.insert(article);
            (inserted, inserted)
        })
        .await
    }

    async fn backfill(
        &self,
        id: &str,
        content: Option<String>,
        image_url: Option<String>,
    ) -> Result<()> {
        self.with_index(|idx| ((), idx.backfill(id, content, image_url))).await
    }

    async fn get(&self, id: &str) -> Result<Option<Article>> {
        self.with_index(|idx| (idx.get(id), false)).await
    }

    async fn list(&self) -> Result<Vec<Article>> {
        self.with_index(|idx| (idx.list(), false)).await
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        self.with_index(|idx| {
            let n = idx.delete(ids);
            (n, n > 0)
        })
        .await
    }

    async fn purge(&self) -> Result<usize> {
        self.with_index(|idx| {
            let n = idx.purge();
            (n, true)
        })
        .await
    }
}
