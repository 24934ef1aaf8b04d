// src/sources.rs
//! Immutable, ordered feed registry. The order defines the scheduler's cursor space.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_SOURCES_PATH: &str = "config/sources.toml";
pub const ENV_SOURCES_PATH: &str = "SOURCES_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub url: String,
    /// Registrable domain used by blacklist / trusted-source matching.
    pub domain: String,
    pub language: String,
    pub location: String,
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    #[serde(rename = "source", default)]
    sources: Vec<Source>,
}

/// Cheap to clone; all clones share one arena.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Arc<[Source]>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            sources: sources.into(),
        }
    }

    /// Path from `$SOURCES_PATH` or the default.
    pub fn default_path() -> PathBuf {
        std::env::var(ENV_SOURCES_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOURCES_PATH))
    }

    pub fn load_default() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading sources from {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: SourcesFile = toml::from_str(raw)?;
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(file.sources.len());
        for mut s in file.sources {
            s.name = s.name.trim().to_string();
            s.url = s.url.trim().to_string();
            s.domain = s.domain.trim().to_ascii_lowercase();
            s.language = s.language.trim().to_ascii_lowercase();
            if s.name.is_empty() || s.url.is_empty() || s.domain.is_empty() {
                anyhow::bail!("source entry missing name/url/domain: {:?}", s.name);
            }
            if !seen.insert(s.url.clone()) {
                tracing::warn!(target: "ingest", url = %s.url, "duplicate source url skipped");
                continue;
            }
            out.push(s);
        }
        Ok(Self::new(out))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Source> {
        self.sources.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter()
    }

    pub fn as_slice(&self) -> &[Source] {
        &self.sources
    }
}

/// `host` equals `domain` or is a subdomain of it.
pub fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.');
    let domain = domain.trim_end_matches('.');
    if host.eq_ignore_ascii_case(domain) {
        return true;
    }
    host.len() > domain.len()
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
        && host.as_bytes()[host.len() - domain.len()..].eq_ignore_ascii_case(domain.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_entries() {
        let raw = r#"
[[source]]
name = " Positive News "
url = "https://www.positive.news/feed/"
domain = "Positive.News"
language = "EN"
location = "world"

[[source]]
name = "dup"
url = "https://www.positive.news/feed/"
domain = "positive.news"
language = "en"
location = "world"
"#;
        let reg = SourceRegistry::from_toml_str(raw).unwrap();
        assert_eq!(reg.len(), 1);
        let s = reg.get(0).unwrap();
        assert_eq!(s.name, "Positive News");
        assert_eq!(s.domain, "positive.news");
        assert_eq!(s.language, "en");
    }

    #[test]
    fn rejects_entry_without_domain() {
        let raw = r#"
[[source]]
name = "x"
url = "https://x.cz/rss"
domain = ""
language = "cs"
location = "czech"
"#;
        assert!(SourceRegistry::from_toml_str(raw).is_err());
    }

    #[test]
    fn bundled_registry_loads() {
        let reg = SourceRegistry::load_from(Path::new("config/sources.toml")).unwrap();
        assert!(reg.len() > 100);
        assert!(reg.iter().all(|s| s.url.starts_with("http")));
    }

    #[test]
    fn parent_domain_matching() {
        assert!(domain_matches("aeronet.cz", "aeronet.cz"));
        assert!(domain_matches("www.aeronet.cz", "aeronet.cz"));
        assert!(domain_matches("News.Example.ORG", "example.org"));
        assert!(!domain_matches("notaeronet.cz", "aeronet.cz"));
        assert!(!domain_matches("cz", "aeronet.cz"));
    }
}
