// src/moderation/classifier.rs
//! Keyword-count category classifier.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::policy::clean_list;

pub const DEFAULT_CATEGORIES_PATH: &str = "config/categories.toml";
pub const ENV_CATEGORIES_PATH: &str = "CATEGORIES_PATH";
pub const FALLBACK_CATEGORY: &str = "other";
/// Keywords up to this many chars must match as whole words.
pub const WHOLE_WORD_MAX_CHARS: usize = 4;

#[derive(Debug, Deserialize)]
struct CategoriesFile {
    #[serde(default)]
    version: String,
    #[serde(rename = "category")]
    categories: Vec<CategoryEntry>,
}

#[derive(Debug, Deserialize)]
struct CategoryEntry {
    name: String,
    keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Keyword {
    Word(String),
    Stem(String),
}

impl Keyword {
    fn new(kw: String) -> Self {
        if kw.chars().count() <= WHOLE_WORD_MAX_CHARS {
            Keyword::Word(kw)
        } else {
            Keyword::Stem(kw)
        }
    }

    fn count_in(&self, text: &str) -> usize {
        match self {
            Keyword::Stem(s) => text.matches(s.as_str()).count(),
            Keyword::Word(w) => count_whole_words(text, w),
        }
    }
}

/// Non-overlapping occurrences of `word` bounded by non-alphanumerics (or text edges).
fn count_whole_words(text: &str, word: &str) -> usize {
    let mut count = 0;
    let mut from = 0;
    while let Some(rel) = text[from..].find(word) {
        let start = from + rel;
        let end = start + word.len();
        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = text[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            count += 1;
            from = end;
        } else {
            // step one char past this occurrence's start
            from = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
    }
    count
}

#[derive(Debug)]
struct CategoryRule {
    name: String,
    keywords: Vec<Keyword>,
}

/// Ordered categories; the first one wins ties.
#[derive(Debug)]
pub struct CategoryClassifier {
    version: String,
    rules: Vec<CategoryRule>,
    invocations: AtomicU64,
}

impl CategoryClassifier {
    pub fn default_path() -> PathBuf {
        std::env::var(ENV_CATEGORIES_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CATEGORIES_PATH))
    }

    pub fn load_default() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading categories from {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: CategoriesFile = toml::from_str(raw)?;
        let mut rules = Vec::with_capacity(file.categories.len());
        for c in file.categories {
            let name = c.name.trim().to_lowercase();
            if name.is_empty() {
                anyhow::bail!("categories: entry with empty name");
            }
            if rules.iter().any(|r: &CategoryRule| r.name == name) {
                anyhow::bail!("categories: duplicate category {name}");
            }
            let keywords: Vec<Keyword> = clean_list(c.keywords).into_iter().map(Keyword::new).collect();
            if keywords.is_empty() {
                anyhow::bail!("categories: {name} has no keywords");
            }
            rules.push(CategoryRule { name, keywords });
        }
        if rules.is_empty() {
            anyhow::bail!("categories: at least one category is required");
        }
        Ok(Self {
            version: file.version,
            rules,
            invocations: AtomicU64::new(0),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.name.as_str())
    }

    /// Per-category scores for already-lowercased text, in rule order.
    pub fn scores(&self, text_lower: &str) -> Vec<(&str, usize)> {
        self.rules
            .iter()
            .map(|r| {
                let score: usize = r.keywords.iter().map(|k| k.count_in(text_lower)).sum();
                (r.name.as_str(), score)
            })
            .collect()
    }

    /// Classify already-lowercased text. Strictly highest nonzero score wins.
    pub fn classify_text(&self, text_lower: &str) -> String {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let mut best = FALLBACK_CATEGORY;
        let mut best_score = 0usize;
        for (name, score) in self.scores(text_lower) {
            if score > best_score {
                best = name;
                best_score = score;
            }
        }
        best.to_string()
    }

    pub fn classify(&self, title: &str, description: &str) -> String {
        self.classify_text(&format!("{title} {description}").to_lowercase())
    }

    /// How many times `classify*` ran (diagnostics and tests).
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> CategoryClassifier {
        CategoryClassifier::from_toml_str(
            r#"
[[category]]
name = "culture"
keywords = ["art", "festival"]

[[category]]
name = "science"
keywords = ["research", "space"]
"#,
        )
        .unwrap()
    }

    #[test]
    fn short_keywords_need_word_boundaries() {
        let c = tiny();
        assert_eq!(c.classify("Party starts", "smart start"), "other");
        assert_eq!(c.classify("Street art", "by kids"), "culture");
        assert_eq!(c.classify("Art!", ""), "culture");
    }

    #[test]
    fn long_keywords_match_inflections() {
        let c = tiny();
        assert_eq!(c.classify("Researchers", "outer spaces"), "science");
    }

    #[test]
    fn ties_go_to_first_category() {
        let c = tiny();
        assert_eq!(c.classify("festival", "research"), "culture");
        assert_eq!(c.invocations(), 1);
    }

    #[test]
    fn word_count_handles_unicode_neighbours() {
        assert_eq!(count_whole_words("les lesy les", "les"), 2);
        assert_eq!(count_whole_words("dárek dar", "dar"), 1);
        assert_eq!(count_whole_words("ždar", "dar"), 0);
        assert_eq!(count_whole_words("", "dar"), 0);
    }

    #[test]
    fn bundled_categories_load_in_order() {
        let c = CategoryClassifier::load_from(Path::new("config/categories.toml")).unwrap();
        let names: Vec<&str> = c.category_names().collect();
        assert_eq!(names.first(), Some(&"environment"));
        assert_eq!(names.last(), Some(&"business"));
        assert_eq!(names.len(), 9);
    }

    #[test]
    fn duplicate_category_rejected() {
        let raw = r#"
[[category]]
name = "a"
keywords = ["x"]
[[category]]
name = "A"
keywords = ["y"]
"#;
        assert!(CategoryClassifier::from_toml_str(raw).is_err());
    }
}
