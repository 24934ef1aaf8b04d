// src/ingest/scheduler.rs
//! Bounded batch work queue over the immutable source registry.
//!
//! The only state shared across runs is a single cursor. A run *claims* its
//! slice with compare-and-swap before touching the network, so the cursor
//! advances even when every source in the slice fails or the process dies
//! mid-batch (at-least-once coverage; dedup absorbs the repeats).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::ingest::{Ingestor, SourceReport};
use crate::sources::SourceRegistry;
use crate::store::file::write_atomic;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_INTERVAL_SECS: u64 = 30 * 60;
const MAX_CLAIM_ATTEMPTS: usize = 8;

/// Persisted cursor with an atomic claim primitive.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Current raw value (0 when never written).
    async fn load(&self) -> Result<usize>;
    /// Write `next` only if the stored value is still `expected`.
    async fn compare_and_swap(&self, expected: usize, next: usize) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    value: AtomicUsize,
}

impl MemoryCursorStore {
    pub fn new(start: usize) -> Self {
        Self {
            value: AtomicUsize::new(start),
        }
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<usize> {
        Ok(self.value.load(Ordering::SeqCst))
    }

    async fn compare_and_swap(&self, expected: usize, next: usize) -> Result<bool> {
        Ok(self
            .value
            .compare_exchange(expected, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorFile {
    cursor: usize,
    #[serde(default)]
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// JSON file cursor (`{"cursor": n}`), written via tmp + rename.
/// CAS is serialized in-process by a mutex.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<usize> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) if s.trim().is_empty() => Ok(0),
            Ok(s) => {
                let f: CursorFile = serde_json::from_str(&s)
                    .with_context(|| format!("parsing cursor {}", self.path.display()))?;
                Ok(f.cursor)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e).with_context(|| format!("reading cursor {}", self.path.display())),
        }
    }

    async fn write(&self, cursor: usize) -> Result<()> {
        let body = serde_json::to_vec(&CursorFile {
            cursor,
            updated_at: Some(chrono::Utc::now()),
        })?;
        write_atomic(&self.path, body)
            .await
            .with_context(|| format!("writing cursor {}", self.path.display()))
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<usize> {
        let _g = self.lock.lock().await;
        self.read().await
    }

    async fn compare_and_swap(&self, expected: usize, next: usize) -> Result<bool> {
        let _g = self.lock.lock().await;
        if self.read().await? != expected {
            return Ok(false);
        }
        self.write(next).await?;
        Ok(true)
    }
}

/// Indices of the slice starting at `start` (wrapping), at most `len` long.
pub fn slice_indices(start: usize, batch_size: usize, len: usize) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    let start = if start >= len { 0 } else { start };
    (0..batch_size.min(len)).map(|k| (start + k) % len).collect()
}

/// `start + batch_size`, reset to 0 once it reaches the registry length.
pub fn next_cursor(start: usize, batch_size: usize, len: usize) -> usize {
    let start = if start >= len { 0 } else { start };
    let next = start + batch_size;
    if next >= len {
        0
    } else {
        next
    }
}

/// A claimed slice of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub start: usize,
    pub next: usize,
    pub indices: Vec<usize>,
}

pub struct BatchQueue {
    registry: SourceRegistry,
    batch_size: usize,
    cursor: Arc<dyn CursorStore>,
}

impl BatchQueue {
    pub fn new(registry: SourceRegistry, batch_size: usize, cursor: Arc<dyn CursorStore>) -> Self {
        Self {
            registry,
            batch_size: batch_size.max(1),
            cursor,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Atomically read the cursor, compute the slice and advance.
    pub async fn claim(&self) -> Result<Claim> {
        let len = self.registry.len();
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let raw = self.cursor.load().await?;
            let start = if raw >= len { 0 } else { raw };
            let next = next_cursor(start, self.batch_size, len);
            if self.cursor.compare_and_swap(raw, next).await? {
                return Ok(Claim {
                    start,
                    next,
                    indices: slice_indices(start, self.batch_size, len),
                });
            }
        }
        Err(anyhow!(
            "cursor contention: gave up after {MAX_CLAIM_ATTEMPTS} attempts"
        ))
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BatchReport {
    pub start: usize,
    pub next_cursor: usize,
    pub sources: Vec<SourceReport>,
    pub inserted: usize,
    pub failures: usize,
    pub halted: bool,
}

impl BatchReport {
    fn push(&mut self, r: SourceReport) {
        self.inserted += r.inserted;
        if !r.fetched {
            self.failures += 1;
        }
        self.halted |= r.halted;
        self.sources.push(r);
    }
}

pub struct Scheduler {
    queue: BatchQueue,
    ingestor: Arc<Ingestor>,
}

impl Scheduler {
    pub fn new(queue: BatchQueue, ingestor: Arc<Ingestor>) -> Self {
        Self { queue, ingestor }
    }

    pub fn queue(&self) -> &BatchQueue {
        &self.queue
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    /// Claim the next slice and process it strictly sequentially.
    pub async fn run_one_batch(&self) -> Result<BatchReport> {
        let claim = self.queue.claim().await?;
        counter!("scheduler_batches_total").increment(1);
        gauge!("scheduler_cursor").set(claim.next as f64);

        let mut report = BatchReport {
            start: claim.start,
            next_cursor: claim.next,
            ..Default::default()
        };
        for idx in claim.indices {
            let Some(source) = self.queue.registry.get(idx) else {
                continue;
            };
            let r = self.ingestor.process_source(source).await;
            report.push(r);
            if report.halted {
                break;
            }
        }
        tracing::info!(
            target: "scheduler",
            start = report.start,
            next = report.next_cursor,
            sources = report.sources.len(),
            inserted = report.inserted,
            failures = report.failures,
            halted = report.halted,
            "batch finished"
        );
        Ok(report)
    }

    /// Every source once, in registry order. The cursor is left alone.
    pub async fn run_all(&self) -> BatchReport {
        let mut report = BatchReport::default();
        for chunk in self.queue.registry.as_slice().chunks(self.queue.batch_size) {
            for source in chunk {
                let r = self.ingestor.process_source(source).await;
                report.push(r);
                if report.halted {
                    break;
                }
            }
            if report.halted {
                break;
            }
            tracing::info!(
                target: "scheduler",
                done = report.sources.len(),
                total = self.queue.registry.len(),
                inserted = report.inserted,
                "run-all progress"
            );
        }
        report
    }
}

/// Run one batch every `interval`. Errors are logged; the loop keeps ticking.
pub fn spawn_scheduler(scheduler: Arc<Scheduler>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = scheduler.run_one_batch().await {
                tracing::error!(target: "scheduler", error = %format!("{e:#}"), "batch failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_wraps_and_is_capped() {
        assert_eq!(slice_indices(8, 5, 10), vec![8, 9, 0, 1, 2]);
        assert_eq!(slice_indices(0, 20, 3), vec![0, 1, 2]);
        assert_eq!(slice_indices(99, 2, 3), vec![0, 1]);
        assert!(slice_indices(0, 10, 0).is_empty());
    }

    #[test]
    fn cursor_resets_at_end() {
        assert_eq!(next_cursor(0, 10, 25), 10);
        assert_eq!(next_cursor(20, 10, 25), 0);
        assert_eq!(next_cursor(15, 10, 25), 0);
        assert_eq!(next_cursor(40, 10, 25), 10);
        assert_eq!(next_cursor(0, 10, 0), 0);
    }

    #[tokio::test]
    async fn file_cursor_cas_and_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/cursor.json");
        let store = FileCursorStore::new(&path);
        assert_eq!(store.load().await.unwrap(), 0);
        assert!(store.compare_and_swap(0, 10).await.unwrap());
        assert!(!store.compare_and_swap(0, 20).await.unwrap());
        assert_eq!(FileCursorStore::new(&path).load().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn claim_treats_stale_cursor_as_zero() {
        let reg = SourceRegistry::new(
            (0..3)
                .map(|i| crate::sources::Source {
                    name: format!("s{i}"),
                    url: format!("https://s{i}.cz/rss"),
                    domain: format!("s{i}.cz"),
                    language: "cs".into(),
                    location: "czech".into(),
                })
                .collect(),
        );
        let q = BatchQueue::new(reg, 2, Arc::new(MemoryCursorStore::new(7)));
        let c = q.claim().await.unwrap();
        assert_eq!(c.start, 0);
        assert_eq!(c.indices, vec![0, 1]);
        assert_eq!(c.next, 2);
        let c = q.claim().await.unwrap();
        assert_eq!(c.indices, vec![2, 0]);
        assert_eq!(c.next, 0);
    }
}
