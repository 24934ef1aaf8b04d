// src/moderation/mod.rs
//! Layered editorial decision: cheap deterministic stages first, the semantic
//! gate last. Every stage except adult flagging short-circuits on rejection.

pub mod classifier;
pub mod gate;
pub mod policy;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use self::classifier::{CategoryClassifier, FALLBACK_CATEGORY};
use self::gate::{DynGate, GateOutcome, Verdict};
use self::policy::{PolicyHandle, PolicyTables};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "moderation_rejected_total",
            "Items rejected, labelled by deciding stage."
        );
        describe_counter!("moderation_passed_total", "Items admitted.");
        describe_counter!(
            "gate_unavailable_total",
            "Items rejected because the semantic gate could not decide."
        );
        describe_histogram!("gate_latency_ms", "Semantic gate round trip in milliseconds.");
    });
}

/// Which stage produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Blacklist,
    UrlSegment,
    HardBlock,
    NegativeKeyword,
    Category,
    Trusted,
    Gate,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Blacklist => "blacklist",
            Stage::UrlSegment => "url_segment",
            Stage::HardBlock => "hard_block",
            Stage::NegativeKeyword => "negative_keyword",
            Stage::Category => "category",
            Stage::Trusted => "trusted",
            Stage::Gate => "gate",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ModerationInput<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub url: &'a str,
    /// Source's registrable domain.
    pub domain: &'a str,
    pub language: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModerationVerdict {
    pub pass: bool,
    pub category: String,
    pub positivity_score: f32,
    pub is_adult: bool,
    pub reason: String,
    /// Rejected because the gate could not be reached / understood, not by policy.
    pub ai_unavailable: bool,
    pub stage: Stage,
}

impl ModerationVerdict {
    fn reject(stage: Stage, reason: String) -> Self {
        Self {
            pass: false,
            category: FALLBACK_CATEGORY.to_string(),
            positivity_score: 0.0,
            is_adult: false,
            reason,
            ai_unavailable: false,
            stage,
        }
    }
}

/// Lowercased "title description" that every text stage matches against.
pub fn moderation_text(title: &str, description: &str) -> String {
    format!("{title} {description}").to_lowercase()
}

/// Stages 1 to 5. `Some` is a rejection.
fn prefilter_with(
    policy: &PolicyTables,
    input: &ModerationInput<'_>,
    text: &str,
) -> Option<ModerationVerdict> {
    if policy.is_blacklisted(input.domain) {
        return Some(ModerationVerdict::reject(
            Stage::Blacklist,
            format!("blacklisted domain: {}", input.domain),
        ));
    }
    if let Some(seg) = policy.blocked_url_segment(input.url) {
        return Some(ModerationVerdict::reject(
            Stage::UrlSegment,
            format!("blocked url segment: {seg}"),
        ));
    }
    if policy.matching_override(text).is_some() {
        return None;
    }
    if let Some(stem) = policy.hard_block_hit(text) {
        return Some(ModerationVerdict::reject(
            Stage::HardBlock,
            format!("hard-block stem: {}", stem.trim_end()),
        ));
    }
    if let Some(kw) = policy.negative_hit(text) {
        return Some(ModerationVerdict::reject(
            Stage::NegativeKeyword,
            format!("negative keyword: {}", kw.trim_end()),
        ));
    }
    None
}

pub struct ModerationPipeline {
    policy: PolicyHandle,
    classifier: Arc<CategoryClassifier>,
    gate: DynGate,
}

impl ModerationPipeline {
    pub fn new(policy: PolicyHandle, classifier: Arc<CategoryClassifier>, gate: DynGate) -> Self {
        ensure_metrics_described();
        Self {
            policy,
            classifier,
            gate,
        }
    }

    pub fn policy(&self) -> &PolicyHandle {
        &self.policy
    }

    pub fn classifier(&self) -> &CategoryClassifier {
        &self.classifier
    }

    pub fn gate_provider(&self) -> &'static str {
        self.gate.provider_name()
    }

    /// Stages 1 to 5 only (no classifier, no gate). Used to re-screen stored articles.
    pub fn prefilter(&self, input: &ModerationInput<'_>) -> Option<ModerationVerdict> {
        let policy = self.policy.snapshot();
        let text = moderation_text(input.title, input.description);
        prefilter_with(&policy, input, &text)
    }

    pub async fn moderate(&self, input: &ModerationInput<'_>) -> ModerationVerdict {
        let verdict = self.decide(input).await;
        if verdict.pass {
            counter!("moderation_passed_total").increment(1);
        } else {
            counter!("moderation_rejected_total", "stage" => verdict.stage.as_str()).increment(1);
        }
        tracing::debug!(
            target: "moderation",
            title = %input.title,
            domain = %input.domain,
            pass = verdict.pass,
            stage = verdict.stage.as_str(),
            category = %verdict.category,
            reason = %verdict.reason,
            "moderated"
        );
        verdict
    }

    async fn decide(&self, input: &ModerationInput<'_>) -> ModerationVerdict {
        let policy = self.policy.snapshot();
        let text = moderation_text(input.title, input.description);

        if let Some(rejected) = prefilter_with(&policy, input, &text) {
            return rejected;
        }

        let is_adult = policy.is_adult(&text);
        let category = self.classifier.classify_text(&text);
        let trusted = policy.is_trusted(input.domain);

        let verdict = |pass: bool, score: f32, stage: Stage, reason: String| ModerationVerdict {
            pass,
            category: category.clone(),
            positivity_score: score,
            is_adult,
            reason,
            ai_unavailable: false,
            stage,
        };

        if policy.is_blocked_category(&category) && !trusted {
            return verdict(
                false,
                0.0,
                Stage::Category,
                format!("blocked category: {category}"),
            );
        }
        if trusted {
            return verdict(
                true,
                policy.scores.trusted,
                Stage::Trusted,
                format!("trusted source: {}", input.domain),
            );
        }

        let started = Instant::now();
        let outcome = self.gate.classify(input.title, input.description).await;
        histogram!("gate_latency_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        match outcome {
            GateOutcome::Verdict(Verdict::Positive) => verdict(
                true,
                policy.scores.gate,
                Stage::Gate,
                "semantic gate: POSITIVE".into(),
            ),
            GateOutcome::Verdict(v) => verdict(
                false,
                0.0,
                Stage::Gate,
                format!("semantic gate: {}", v.as_str()),
            ),
            GateOutcome::Unavailable(why) => {
                counter!("gate_unavailable_total").increment(1);
                tracing::warn!(
                    target: "gate",
                    provider = self.gate.provider_name(),
                    title = %input.title,
                    reason = %why,
                    "semantic gate unavailable; rejecting"
                );
                ModerationVerdict {
                    ai_unavailable: true,
                    ..verdict(
                        false,
                        0.0,
                        Stage::Gate,
                        format!("semantic gate unavailable: {why}"),
                    )
                }
            }
        }
    }
}
