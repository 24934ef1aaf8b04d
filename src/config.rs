// src/config.rs
//! Pipeline settings: `config/pipeline.toml` plus env overrides.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::scheduler::{DEFAULT_BATCH_SIZE, DEFAULT_INTERVAL_SECS};

pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const ENV_BATCH_SIZE: &str = "BATCH_SIZE";
pub const ENV_FETCH_INTERVAL_SECS: &str = "FETCH_INTERVAL_SECS";
pub const ENV_ADMIN_TOKEN: &str = "ADMIN_TOKEN";

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}
fn default_cursor_path() -> PathBuf {
    PathBuf::from("data/cursor.json")
}
fn default_store_path() -> PathBuf {
    PathBuf::from("data/articles.json")
}
fn default_http_timeout_secs() -> u64 {
    15
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Sources per scheduled tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Run the periodic scheduler inside the service.
    #[serde(default = "default_true")]
    pub scheduler_enabled: bool,
    #[serde(default = "default_cursor_path")]
    pub cursor_path: PathBuf,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub halt_on_gate_unavailable: bool,
    /// Data tables; `None` means each table's own env var / default path.
    #[serde(default)]
    pub sources_path: Option<PathBuf>,
    #[serde(default)]
    pub policy_path: Option<PathBuf>,
    #[serde(default)]
    pub categories_path: Option<PathBuf>,
    #[serde(default)]
    pub gate_config_path: Option<PathBuf>,
    /// Never read from the file; only `ADMIN_TOKEN`.
    #[serde(skip)]
    pub admin_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            interval_secs: default_interval_secs(),
            scheduler_enabled: true,
            cursor_path: default_cursor_path(),
            store_path: default_store_path(),
            http_timeout_secs: default_http_timeout_secs(),
            halt_on_gate_unavailable: false,
            sources_path: None,
            policy_path: None,
            categories_path: None,
            gate_config_path: None,
            admin_token: None,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        env::var(ENV_PIPELINE_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PIPELINE_CONFIG_PATH))
    }

    /// File (if present) then env overrides. A missing default file is fine.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let explicit = env::var(ENV_PIPELINE_CONFIG_PATH).is_ok();
        let mut cfg = if path.exists() || explicit {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = env::var(ENV_BATCH_SIZE) {
            self.batch_size = v
                .trim()
                .parse()
                .map_err(|_| anyhow!("{ENV_BATCH_SIZE} must be a positive integer, got {v:?}"))?;
        }
        if let Ok(v) = env::var(ENV_FETCH_INTERVAL_SECS) {
            self.interval_secs = v.trim().parse().map_err(|_| {
                anyhow!("{ENV_FETCH_INTERVAL_SECS} must be a positive integer, got {v:?}")
            })?;
        }
        self.admin_token = env::var(ENV_ADMIN_TOKEN)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        if self.interval_secs == 0 {
            anyhow::bail!("interval_secs must be at least 1");
        }
        if self.http_timeout_secs == 0 {
            anyhow::bail!("http_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
