// src/moderation/gate.rs
//! Semantic gate: the final, fail-closed arbiter. Provider abstraction, config
//! (versioned prompt + fixtures), verdict parsing and test doubles.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_GATE_CONFIG_PATH: &str = "config/gate.toml";
pub const ENV_GATE_CONFIG_PATH: &str = "GATE_CONFIG_PATH";
pub const ENV_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_AI_TEST_MODE: &str = "AI_TEST_MODE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Positive,
    Negative,
    Neutral,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Positive => "POSITIVE",
            Verdict::Negative => "NEGATIVE",
            Verdict::Neutral => "NEUTRAL",
        }
    }
}

/// What a gate call produced. `Unavailable` covers transport errors, timeouts,
/// missing credentials and unrecognised answers alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Verdict(Verdict),
    Unavailable(String),
}

/// Tolerant single-word verdict parsing: the earliest recognised word wins.
pub fn parse_verdict(response: &str) -> Option<Verdict> {
    let upper = response.to_uppercase();
    [Verdict::Positive, Verdict::Negative, Verdict::Neutral]
        .into_iter()
        .filter_map(|v| upper.find(v.as_str()).map(|i| (i, v)))
        .min_by_key(|(i, _)| *i)
        .map(|(_, v)| v)
}

/// Gate provider. Implementations must never panic on remote failure.
pub trait SemanticGate: Send + Sync {
    fn classify<'a>(
        &'a self,
        title: &'a str,
        description: &'a str,
    ) -> Pin<Box<dyn Future<Output = GateOutcome> + Send + 'a>>;
    fn provider_name(&self) -> &'static str;
}

pub type DynGate = Arc<dyn SemanticGate>;

fn default_true() -> bool {
    true
}
fn default_provider() -> String {
    "anthropic".into()
}
fn default_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".into()
}
fn default_model() -> String {
    "claude-haiku-4-5-20251001".into()
}
fn default_anthropic_version() -> String {
    "2023-06-01".into()
}
fn default_max_tokens() -> u32 {
    10
}
fn default_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixtureExpect {
    Positive,
    Negative,
    Neutral,
    Unavailable,
}

impl FixtureExpect {
    pub fn from_parsed(v: Option<Verdict>) -> Self {
        match v {
            Some(Verdict::Positive) => FixtureExpect::Positive,
            Some(Verdict::Negative) => FixtureExpect::Negative,
            Some(Verdict::Neutral) => FixtureExpect::Neutral,
            None => FixtureExpect::Unavailable,
        }
    }
}

/// Example input with a recorded model reply and the verdict it must parse to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateFixture {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub response: String,
    pub expect: FixtureExpect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// "anthropic" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_anthropic_version")]
    pub anthropic_version: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// "ENV" means: read from ANTHROPIC_API_KEY
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub version: String,
    /// Template with `{title}` and `{description}` placeholders.
    pub prompt: String,
    #[serde(rename = "fixture", default)]
    pub fixtures: Vec<GateFixture>,
}

impl GateConfig {
    pub fn default_path() -> PathBuf {
        std::env::var(ENV_GATE_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_GATE_CONFIG_PATH))
    }

    pub fn load_default() -> Result<Self> {
        Self::load_from_file(Self::default_path())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading gate config from {}", path.display()))?;
        Self::from_toml_str(&data).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(data: &str) -> Result<Self> {
        let mut cfg: GateConfig = toml::from_str(data)?;
        cfg.provider = cfg.provider.trim().to_lowercase();

        if !cfg.prompt.contains("{title}") {
            anyhow::bail!("gate prompt must contain a {{title}} placeholder");
        }

        // A missing key is not fatal: the gate reports Unavailable and the
        // pipeline fails closed.
        if cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = std::env::var(ENV_API_KEY).unwrap_or_default();
        }
        if cfg.max_tokens == 0 {
            cfg.max_tokens = default_max_tokens();
        }
        if cfg.timeout_secs == 0 {
            cfg.timeout_secs = default_timeout_secs();
        }
        Ok(cfg)
    }

    pub fn render_prompt(&self, title: &str, description: &str) -> String {
        self.prompt
            .replace("{title}", title)
            .replace("{description}", description)
            .trim()
            .to_string()
    }
}

/// Anthropic Messages API provider.
pub struct AnthropicGate {
    http: reqwest::Client,
    cfg: GateConfig,
}

impl AnthropicGate {
    pub fn new(cfg: GateConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("dobre-zpravy/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building gate http client")?;
        Ok(Self { http, cfg })
    }

    async fn call(&self, prompt: &str) -> Result<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            max_tokens: u32,
            messages: Vec<Msg<'a>>,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            content: Vec<Block>,
        }
        #[derive(Deserialize)]
        struct Block {
            #[serde(default)]
            text: Option<String>,
        }

        let req = Req {
            model: &self.cfg.model,
            max_tokens: self.cfg.max_tokens,
            messages: vec![Msg {
                role: "user",
                content: prompt,
            }],
        };
        let resp = self
            .http
            .post(&self.cfg.endpoint)
            .header("x-api-key", &self.cfg.api_key)
            .header("anthropic-version", &self.cfg.anthropic_version)
            .json(&req)
            .send()
            .await
            .context("gate request")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("gate HTTP {status}");
        }
        let body: Resp = resp.json().await.context("gate response json")?;
        body.content
            .into_iter()
            .next()
            .and_then(|b| b.text)
            .ok_or_else(|| anyhow::anyhow!("gate response had no text block"))
    }
}

impl SemanticGate for AnthropicGate {
    fn classify<'a>(
        &'a self,
        title: &'a str,
        description: &'a str,
    ) -> Pin<Box<dyn Future<Output = GateOutcome> + Send + 'a>> {
        Box::pin(async move {
            if self.cfg.api_key.is_empty() {
                return GateOutcome::Unavailable("missing api key".into());
            }
            let prompt = self.cfg.render_prompt(title, description);
            match self.call(&prompt).await {
                Ok(text) => match parse_verdict(&text) {
                    Some(v) => GateOutcome::Verdict(v),
                    None => GateOutcome::Unavailable(format!(
                        "unrecognized answer: {}",
                        text.chars().take(40).collect::<String>()
                    )),
                },
                Err(e) => GateOutcome::Unavailable(format!("{e:#}")),
            }
        })
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}

/// Used when the gate is switched off. Everything it sees is Unavailable,
/// so nothing is admitted through it.
pub struct DisabledGate;

impl SemanticGate for DisabledGate {
    fn classify<'a>(
        &'a self,
        _title: &'a str,
        _description: &'a str,
    ) -> Pin<Box<dyn Future<Output = GateOutcome> + Send + 'a>> {
        Box::pin(async { GateOutcome::Unavailable("semantic gate disabled".into()) })
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Deterministic gate for tests and `AI_TEST_MODE`. Replies are raw model text,
/// parsed the same way as a live answer. Counts calls.
pub struct ScriptedGate {
    default_reply: Option<String>,
    by_title: HashMap<String, String>,
    calls: AtomicUsize,
}

impl ScriptedGate {
    /// Always answer `reply`.
    pub fn always(reply: impl Into<String>) -> Self {
        Self {
            default_reply: Some(reply.into()),
            by_title: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Behaves like an unreachable provider.
    pub fn failing() -> Self {
        Self {
            default_reply: None,
            by_title: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Reply with each fixture's recorded response, keyed by title.
    pub fn from_fixtures(fixtures: &[GateFixture]) -> Self {
        Self {
            default_reply: None,
            by_title: fixtures
                .iter()
                .map(|f| (f.title.clone(), f.response.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SemanticGate for ScriptedGate {
    fn classify<'a>(
        &'a self,
        title: &'a str,
        _description: &'a str,
    ) -> Pin<Box<dyn Future<Output = GateOutcome> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.by_title.get(title).or(self.default_reply.as_ref());
            match reply {
                Some(text) => match parse_verdict(text) {
                    Some(v) => GateOutcome::Verdict(v),
                    None => GateOutcome::Unavailable(format!("unrecognized answer: {text}")),
                },
                None => GateOutcome::Unavailable("scripted failure".into()),
            }
        })
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// Build the gate from config and environment.
///
/// * `AI_TEST_MODE=mock-positive|mock-negative|error` returns a scripted gate.
/// * `enabled = false` returns [`DisabledGate`].
/// * Otherwise the configured provider.
pub fn build_gate(cfg: &GateConfig) -> Result<DynGate> {
    match std::env::var(ENV_AI_TEST_MODE).ok().as_deref() {
        Some("mock-positive") => return Ok(Arc::new(ScriptedGate::always("POSITIVE"))),
        Some("mock-negative") => return Ok(Arc::new(ScriptedGate::always("NEGATIVE"))),
        Some("error") => return Ok(Arc::new(ScriptedGate::failing())),
        _ => {}
    }

    if !cfg.enabled {
        tracing::warn!(target: "gate", "semantic gate disabled; every non-trusted item will be rejected");
        return Ok(Arc::new(DisabledGate));
    }

    match cfg.provider.as_str() {
        "anthropic" | "claude" => {
            // Safe diagnostics: only model + key length
            tracing::info!(
                target: "gate",
                model = %cfg.model,
                prompt_version = %cfg.version,
                key_len = cfg.api_key.len(),
                "semantic gate configured"
            );
            Ok(Arc::new(AnthropicGate::new(cfg.clone())?))
        }
        other => anyhow::bail!("unsupported gate provider: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_tolerant_and_earliest_wins() {
        assert_eq!(parse_verdict("POSITIVE"), Some(Verdict::Positive));
        assert_eq!(parse_verdict("  negative.\n"), Some(Verdict::Negative));
        assert_eq!(parse_verdict("Verdict: Neutral"), Some(Verdict::Neutral));
        assert_eq!(
            parse_verdict("NEUTRAL, definitely not POSITIVE"),
            Some(Verdict::Neutral)
        );
        assert_eq!(parse_verdict(""), None);
        assert_eq!(parse_verdict("I'm not sure"), None);
    }

    #[test]
    fn bundled_config_fixtures_parse_as_expected() {
        let cfg = GateConfig::load_from_file("config/gate.toml").unwrap();
        assert!(!cfg.fixtures.is_empty());
        for f in &cfg.fixtures {
            assert_eq!(
                FixtureExpect::from_parsed(parse_verdict(&f.response)),
                f.expect,
                "fixture {:?}",
                f.title
            );
        }
    }

    #[test]
    fn prompt_renders_placeholders() {
        let cfg = GateConfig::from_toml_str(
            r#"
api_key = "literal"
prompt = """
Rate it.
Title: {title}
Description: {description}
"""
"#,
        )
        .unwrap();
        let p = cfg.render_prompt("Ježek", "v mlze");
        assert!(p.starts_with("Rate it."));
        assert!(p.ends_with("Title: Ježek\nDescription: v mlze"));
        assert_eq!(cfg.provider, "anthropic");
        assert_eq!(cfg.max_tokens, 10);
    }

    #[test]
    fn prompt_without_title_is_rejected() {
        assert!(GateConfig::from_toml_str(r#"prompt = "no placeholders""#).is_err());
    }

    #[tokio::test]
    async fn missing_key_is_unavailable_not_a_pass() {
        let cfg = GateConfig::from_toml_str(
            r#"
api_key = ""
prompt = "Title: {title}"
"#,
        )
        .unwrap();
        let gate = AnthropicGate::new(cfg).unwrap();
        assert!(matches!(
            gate.classify("t", "d").await,
            GateOutcome::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn scripted_gate_counts_and_fails_closed() {
        let g = ScriptedGate::failing();
        assert!(matches!(g.classify("a", "b").await, GateOutcome::Unavailable(_)));
        let g2 = ScriptedGate::always("maybe?");
        assert!(matches!(g2.classify("a", "b").await, GateOutcome::Unavailable(_)));
        assert_eq!(g.calls() + g2.calls(), 2);
        assert!(matches!(
            DisabledGate.classify("a", "b").await,
            GateOutcome::Unavailable(_)
        ));
    }

    #[serial_test::serial]
    #[test]
    fn test_mode_env_overrides_provider() {
        let cfg = GateConfig::from_toml_str(
            r#"
enabled = false
api_key = "x"
prompt = "Title: {title}"
"#,
        )
        .unwrap();
        std::env::set_var(ENV_AI_TEST_MODE, "mock-positive");
        assert_eq!(build_gate(&cfg).unwrap().provider_name(), "scripted");
        std::env::remove_var(ENV_AI_TEST_MODE);
        assert_eq!(build_gate(&cfg).unwrap().provider_name(), "disabled");
    }
}
