// src/moderation/policy.rs
//! Editorial policy tables (blacklist, URL segments, stems, overrides, ...) loaded
//! from TOML, plus a shared handle that can hot-swap them from disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, SystemTime};

use crate::sources::domain_matches;

pub const DEFAULT_POLICY_PATH: &str = "config/policy.toml";
pub const ENV_POLICY_PATH: &str = "POLICY_PATH";
pub const ENV_POLICY_HOT_RELOAD: &str = "POLICY_HOT_RELOAD";

fn default_trusted_score() -> f32 {
    0.05
}
fn default_gate_score() -> f32 {
    0.10
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Scores {
    #[serde(default = "default_trusted_score")]
    pub trusted: f32,
    #[serde(default = "default_gate_score")]
    pub gate: f32,
}

impl Default for Scores {
    fn default() -> Self {
        Self {
            trusted: default_trusted_score(),
            gate: default_gate_score(),
        }
    }
}

/// All stems must be present for the rule to fire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverrideRule {
    pub triggers: Vec<String>,
}

impl OverrideRule {
    pub fn matches(&self, text_lower: &str) -> bool {
        !self.triggers.is_empty() && self.triggers.iter().all(|t| text_lower.contains(t.as_str()))
    }
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    version: String,
    #[serde(default)]
    blocked_categories: Vec<String>,
    #[serde(default)]
    scores: Scores,
    domains: DomainTables,
    text: TextTables,
    #[serde(rename = "override", default)]
    overrides: Vec<OverrideRule>,
}

#[derive(Debug, Deserialize)]
struct DomainTables {
    #[serde(default)]
    trusted: Vec<String>,
    blacklist: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TextTables {
    url_segments: Vec<String>,
    hard_block: Vec<String>,
    #[serde(default)]
    negative_keywords: Vec<String>,
    #[serde(default)]
    adult: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTables {
    pub version: String,
    pub blacklist: Vec<String>,
    pub trusted_sources: Vec<String>,
    pub url_segments: Vec<String>,
    pub hard_block: Vec<String>,
    pub negative_keywords: Vec<String>,
    pub adult_keywords: Vec<String>,
    pub overrides: Vec<OverrideRule>,
    pub blocked_categories: Vec<String>,
    pub scores: Scores,
}

/// Lowercase, trim, drop empties and duplicates; keep first-seen order.
pub(crate) fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

/// Like `clean_list` but keeps a trailing space, which some stems use as a word end.
fn clean_stems(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim_start().to_lowercase())
        .filter(|s| !s.trim().is_empty() && seen.insert(s.clone()))
        .collect()
}

impl PolicyTables {
    pub fn default_path() -> PathBuf {
        std::env::var(ENV_POLICY_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_POLICY_PATH))
    }

    pub fn load_default() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading policy from {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: PolicyFile = toml::from_str(raw)?;

        let tables = Self {
            version: file.version.trim().to_string(),
            blacklist: clean_list(file.domains.blacklist),
            trusted_sources: clean_list(file.domains.trusted),
            url_segments: clean_list(file.text.url_segments),
            hard_block: clean_stems(file.text.hard_block),
            negative_keywords: clean_stems(file.text.negative_keywords),
            adult_keywords: clean_list(file.text.adult),
            overrides: file
                .overrides
                .into_iter()
                .map(|r| OverrideRule {
                    triggers: clean_list(r.triggers),
                })
                .filter(|r| !r.triggers.is_empty())
                .collect(),
            blocked_categories: clean_list(file.blocked_categories),
            scores: file.scores,
        };

        if tables.blacklist.is_empty() {
            anyhow::bail!("policy: domains.blacklist must not be empty");
        }
        if tables.url_segments.is_empty() {
            anyhow::bail!("policy: text.url_segments must not be empty");
        }
        if tables.hard_block.is_empty() {
            anyhow::bail!("policy: text.hard_block must not be empty");
        }
        for (name, v) in [
            ("scores.trusted", tables.scores.trusted),
            ("scores.gate", tables.scores.gate),
        ] {
            if !(0.0..=1.0).contains(&v) {
                anyhow::bail!("policy: {name} must be within 0..=1, got {v}");
            }
        }
        Ok(tables)
    }

    pub fn is_blacklisted(&self, domain: &str) -> bool {
        self.blacklist.iter().any(|d| domain_matches(domain, d))
    }

    pub fn is_trusted(&self, domain: &str) -> bool {
        self.trusted_sources.iter().any(|d| domain_matches(domain, d))
    }

    /// First disallowed section marker found in the URL path.
    pub fn blocked_url_segment(&self, url: &str) -> Option<&str> {
        let path = match url::Url::parse(url) {
            Ok(u) => u.path().to_lowercase(),
            Err(_) => url.to_lowercase(),
        };
        self.url_segments
            .iter()
            .find(|seg| path.contains(seg.as_str()))
            .map(String::as_str)
    }

    pub fn matching_override(&self, text_lower: &str) -> Option<&OverrideRule> {
        self.overrides.iter().find(|r| r.matches(text_lower))
    }

    pub fn hard_block_hit(&self, text_lower: &str) -> Option<&str> {
        first_hit(&self.hard_block, text_lower)
    }

    pub fn negative_hit(&self, text_lower: &str) -> Option<&str> {
        first_hit(&self.negative_keywords, text_lower)
    }

    pub fn is_adult(&self, text_lower: &str) -> bool {
        first_hit(&self.adult_keywords, text_lower).is_some()
    }

    pub fn is_blocked_category(&self, category: &str) -> bool {
        self.blocked_categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
    }
}

fn first_hit<'a>(stems: &'a [String], text_lower: &str) -> Option<&'a str> {
    stems
        .iter()
        .find(|s| text_lower.contains(s.as_str()))
        .map(String::as_str)
}

/// Shared, swappable policy. Readers take a cheap `Arc` snapshot.
#[derive(Clone, Debug)]
pub struct PolicyHandle {
    inner: Arc<RwLock<Arc<PolicyTables>>>,
}

impl PolicyHandle {
    pub fn new(tables: PolicyTables) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(tables))),
        }
    }

    pub fn snapshot(&self) -> Arc<PolicyTables> {
        match self.inner.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, tables: PolicyTables) {
        match self.inner.write() {
            Ok(mut g) => *g = Arc::new(tables),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(tables),
        }
    }

    /// Re-read `path`; on error the current tables stay in place.
    pub fn reload_from(&self, path: &Path) -> Result<()> {
        let tables = PolicyTables::load_from(path)?;
        let version = tables.version.clone();
        self.replace(tables);
        tracing::info!(target: "moderation", %version, path = %path.display(), "policy reloaded");
        Ok(())
    }
}

fn hot_reload_enabled() -> bool {
    std::env::var(ENV_POLICY_HOT_RELOAD)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Poll the policy file's mtime and swap tables on change. No-op unless
/// `POLICY_HOT_RELOAD=1`.
pub fn start_hot_reload_thread(handle: PolicyHandle, path: PathBuf) {
    if !hot_reload_enabled() {
        return;
    }

    thread::spawn(move || {
        let poll = Duration::from_secs(2);
        let mut last_mtime: Option<SystemTime> = None;

        loop {
            if let Ok(mtime) = fs::metadata(&path).and_then(|m| m.modified()) {
                let changed = match last_mtime {
                    None => {
                        last_mtime = Some(mtime);
                        false
                    }
                    Some(prev) => mtime > prev,
                };
                if changed {
                    if let Err(e) = handle.reload_from(&path) {
                        tracing::warn!(target: "moderation", error = %e, "policy reload failed; keeping previous tables");
                    }
                    last_mtime = Some(mtime);
                }
            }
            thread::sleep(poll);
        }
    });
}
