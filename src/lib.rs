// src/lib.rs
// Public library surface for the service binary, the tools in src/bin and integration tests.

pub mod text;
pub mod markup;
pub mod sources;

// retrieve → parse → dedup → moderate → insert, plus the batch scheduler
pub mod ingest;
pub mod moderation;
pub mod scraper;
pub mod store;

pub mod config;
pub mod api;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::AppConfig;
pub use crate::ingest::scheduler::{BatchQueue, BatchReport, Scheduler};
pub use crate::ingest::{Ingestor, IngestOptions, SourceReport};
pub use crate::moderation::{ModerationInput, ModerationPipeline, ModerationVerdict};
pub use crate::sources::{Source, SourceRegistry};
pub use crate::store::{Article, ArticleStore};

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::ingest::fetcher::HttpFetcher;
use crate::ingest::scheduler::FileCursorStore;
use crate::ingest::types::Fetcher;
use crate::moderation::classifier::CategoryClassifier;
use crate::moderation::gate::{build_gate, GateConfig};
use crate::moderation::policy::{PolicyHandle, PolicyTables};
use crate::scraper::ArticleScraper;
use crate::store::JsonFileStore;

/// Everything the service needs, wired from config.
pub struct Pipeline {
    pub registry: SourceRegistry,
    pub policy: PolicyHandle,
    pub policy_path: PathBuf,
    pub moderation: Arc<ModerationPipeline>,
    pub store: Arc<dyn ArticleStore>,
    pub scheduler: Arc<Scheduler>,
    pub scraper: Arc<ArticleScraper>,
}

impl Pipeline {
    /// Load every table and open the durable stores. Any invalid table is a startup error.
    pub fn build(cfg: &AppConfig) -> Result<Self> {
        let registry = match &cfg.sources_path {
            Some(p) => SourceRegistry::load_from(p)?,
            None => SourceRegistry::load_default()?,
        };
        let policy_path = cfg
            .policy_path
            .clone()
            .unwrap_or_else(PolicyTables::default_path);
        let policy = PolicyHandle::new(PolicyTables::load_from(&policy_path)?);
        let classifier = match &cfg.categories_path {
            Some(p) => CategoryClassifier::load_from(p)?,
            None => CategoryClassifier::load_default()?,
        };
        let gate_cfg = match &cfg.gate_config_path {
            Some(p) => GateConfig::load_from_file(p)?,
            None => GateConfig::load_default()?,
        };
        let gate = build_gate(&gate_cfg).context("building semantic gate")?;
        let moderation = Arc::new(ModerationPipeline::new(
            policy.clone(),
            Arc::new(classifier),
            gate,
        ));

        let store: Arc<dyn ArticleStore> = Arc::new(JsonFileStore::open(&cfg.store_path)?);
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(cfg.http_timeout())?);

        let ingestor = Arc::new(Ingestor::new(
            fetcher.clone(),
            store.clone(),
            moderation.clone(),
            IngestOptions {
                halt_on_gate_unavailable: cfg.halt_on_gate_unavailable,
            },
        ));
        let queue = BatchQueue::new(
            registry.clone(),
            cfg.batch_size,
            Arc::new(FileCursorStore::new(&cfg.cursor_path)),
        );
        let scheduler = Arc::new(Scheduler::new(queue, ingestor));
        let scraper = Arc::new(ArticleScraper::new(fetcher));

        ::metrics::gauge!("sources_configured").set(registry.len() as f64);
        tracing::info!(
            sources = registry.len(),
            batch_size = cfg.batch_size,
            gate = moderation.gate_provider(),
            policy_version = %policy.snapshot().version,
            "pipeline ready"
        );

        Ok(Self {
            registry,
            policy,
            policy_path,
            moderation,
            store,
            scheduler,
            scraper,
        })
    }

    pub fn app_state(&self, cfg: &AppConfig) -> AppState {
        AppState {
            scheduler: self.scheduler.clone(),
            store: self.store.clone(),
            moderation: self.moderation.clone(),
            scraper: self.scraper.clone(),
            admin_token: cfg.admin_token.as_deref().map(Arc::from),
        }
    }
}
