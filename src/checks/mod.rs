//! The five content checks and the evaluator boundary they share.
//!
//! Four checks (metadata, editorial, compliance, accuracy) are prompt
//! definitions over an opaque [`Evaluator`]; the fifth (`empty_tag`) is a
//! deterministic markup scan. All of them honor the check contract: they
//! never propagate an error out of `execute`.

pub mod empty_tag;
pub mod judge;
pub mod llm;

use std::sync::Arc;

use async_trait::async_trait;

use crate::content::{truncate_at_boundary, ContentSnapshot};
use crate::pipeline::state::{StateUpdate, VerdictRecord};
use crate::pipeline::steps::{CheckStep, StepContext};

/// Opaque judgment boundary. Production uses the chat-completions client
/// in [`llm`]; tests substitute canned responses.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> anyhow::Result<serde_json::Value>;
}

/// The evaluator-backed check kinds. Each carries its own prompts and
/// pass threshold; everything else is shared by [`LlmCheck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Metadata,
    Editorial,
    Compliance,
    Accuracy,
}

impl CheckKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Editorial => "editorial",
            Self::Compliance => "compliance",
            Self::Accuracy => "accuracy",
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            Self::Metadata => {
                "You are an SEO and metadata reviewer for a medical publisher. \
                 Evaluate the page's metadata for completeness and quality. \
                 Respond ONLY with valid JSON.\n\n\
                 Score criteria (0.0 to 1.0):\n\
                 - Title present, descriptive, 30-65 characters\n\
                 - Meta description present, 120-160 characters\n\
                 - Canonical URL present and consistent with the page URL\n\
                 - Open Graph tags present (og:title, og:type at minimum)\n\
                 - Structured data (JSON-LD) declares a relevant page type\n\n\
                 A page passes if score >= 0.7."
            }
            Self::Editorial => {
                "You are an editorial reviewer for a medical publisher. \
                 Evaluate writing quality, structure, and reading level. \
                 Respond ONLY with valid JSON.\n\n\
                 Score criteria (0.0 to 1.0):\n\
                 - Exactly one H1; heading levels nest without gaps\n\
                 - Clear, plain-language prose suited to a general audience\n\
                 - Logical section structure; no orphaned or duplicated headings\n\
                 - Content is dated or carries a review date\n\n\
                 A page passes if score >= 0.7."
            }
            Self::Compliance => {
                "You are a compliance reviewer for a medical publisher. \
                 Flag prohibited or risky language. Respond ONLY with valid JSON.\n\n\
                 Prohibited: guarantees of cure ('cures', 'guaranteed', '100% effective', \
                 'miracle'), superlative medical claims without citation ('best treatment', \
                 'safest drug'), dosage instructions without professional-consultation \
                 disclaimers, and fear-based urgency language.\n\n\
                 Score criteria (0.0 to 1.0): start at 1.0 and deduct for each violation \
                 by severity. A page passes if score >= 0.75."
            }
            Self::Accuracy => {
                "You are a medical accuracy reviewer. Assess whether the page's \
                 medical claims are plausible, current, and internally consistent. \
                 Identify statements that contradict mainstream clinical guidance. \
                 Respond ONLY with valid JSON.\n\n\
                 Score criteria (0.0 to 1.0):\n\
                 - 1.0: all verifiable claims align with mainstream guidance\n\
                 - 0.8-0.9: minor discrepancies (outdated statistics, imprecise terms)\n\
                 - 0.5-0.7: moderate inaccuracies\n\
                 - below 0.5: significant factual errors\n\n\
                 A page passes if score >= 0.75."
            }
        }
    }

    fn user_prompt(&self, content: &ContentSnapshot) -> String {
        let headings = content
            .headings
            .iter()
            .map(|h| format!("H{}: {}", h.level, h.text))
            .collect::<Vec<_>>()
            .join("\n");

        let common = format!(
            "URL: {url}\nTitle: {title}\nMeta description: {meta}\nCanonical: {canonical}\n\
             OG tags: {og}\nJSON-LD types: {ld}\nLast reviewed: {reviewed}\n\
             Headings:\n{headings}\n\nBody text:\n{body}",
            url = content.url,
            title = content.title.as_deref().unwrap_or("(missing)"),
            meta = content.meta_description.as_deref().unwrap_or("(missing)"),
            canonical = content.canonical_url.as_deref().unwrap_or("(missing)"),
            og = serde_json::to_string(&content.og_tags).unwrap_or_default(),
            ld = content.json_ld_types.join(", "),
            reviewed = content.last_reviewed.as_deref().unwrap_or("(missing)"),
            headings = headings,
            body = truncate_at_boundary(&content.body_text, 4_000),
        );

        format!(
            "Review the following page.\n\n{common}\n\n\
             Respond with this exact JSON structure:\n\
             {{\n  \"passed\": true or false,\n  \"score\": 0.0 to 1.0,\n\
             \"observations\": [\"notable positives\"],\n\
             \"issues\": [\"specific problems found\"],\n\
             \"recommendations\": [\"specific fixes\"]\n}}"
        )
    }
}

/// Shared driver for the evaluator-backed checks: builds the prompt, calls
/// the evaluator, and parses its JSON into a verdict. Evaluator failures
/// and malformed responses become zero-score failed verdicts.
pub struct LlmCheck {
    kind: CheckKind,
    evaluator: Arc<dyn Evaluator>,
}

impl LlmCheck {
    pub fn new(kind: CheckKind, evaluator: Arc<dyn Evaluator>) -> Self {
        Self { kind, evaluator }
    }
}

#[async_trait]
impl CheckStep for LlmCheck {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    async fn execute(&self, content: Arc<ContentSnapshot>, ctx: &StepContext) -> StateUpdate {
        let system = self.kind.system_prompt();
        let user = self.kind.user_prompt(&content);

        match self.evaluator.evaluate(system, &user).await {
            Ok(value) => StateUpdate::verdict(parse_verdict(self.kind.name(), &value)),
            Err(e) => {
                tracing::warn!(
                    run_id = %ctx.run_id,
                    check = self.kind.name(),
                    error = %e,
                    "Check evaluator failed"
                );
                let message = format!("{} check failed: {}", self.kind.name(), e);
                StateUpdate::verdict(VerdictRecord::failed(self.kind.name(), message.clone()))
                    .with_error(message)
            }
        }
    }
}

/// Map an evaluator's JSON response onto a verdict. Missing fields take
/// conservative defaults (`passed` false, `score` 0.0); the score is
/// clamped to [0, 1].
pub fn parse_verdict(step: &str, value: &serde_json::Value) -> VerdictRecord {
    let string_list = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };

    VerdictRecord {
        step: step.to_string(),
        passed: value.get("passed").and_then(|v| v.as_bool()).unwrap_or(false),
        score: value
            .get("score")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0),
        observations: string_list("observations"),
        issues: string_list("issues"),
        recommendations: string_list("recommendations"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FailingEvaluator;

    #[async_trait]
    impl Evaluator for FailingEvaluator {
        async fn evaluate(
            &self,
            _system: &str,
            _user: &str,
        ) -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("model unavailable")
        }
    }

    fn snapshot() -> ContentSnapshot {
        crate::content::extract_snapshot(
            "https://example.org/flu",
            "<html><head><title>Flu basics</title></head><body><h1>Flu</h1></body></html>",
        )
    }

    #[test]
    fn parse_verdict_reads_all_fields() {
        let value = json!({
            "passed": true,
            "score": 0.85,
            "observations": ["title present"],
            "issues": ["meta description short"],
            "recommendations": ["lengthen description"]
        });
        let v = parse_verdict("metadata", &value);
        assert!(v.passed);
        assert_eq!(v.score, 0.85);
        assert_eq!(v.observations, vec!["title present"]);
        assert_eq!(v.issues, vec!["meta description short"]);
    }

    #[test]
    fn parse_verdict_defaults_are_conservative() {
        let v = parse_verdict("editorial", &json!({}));
        assert!(!v.passed);
        assert_eq!(v.score, 0.0);
        assert!(v.issues.is_empty());
    }

    #[test]
    fn parse_verdict_clamps_score() {
        let v = parse_verdict("accuracy", &json!({"passed": true, "score": 1.7}));
        assert_eq!(v.score, 1.0);
        let v = parse_verdict("accuracy", &json!({"score": -0.2}));
        assert_eq!(v.score, 0.0);
    }

    #[tokio::test]
    async fn evaluator_failure_becomes_failed_verdict() {
        let check = LlmCheck::new(CheckKind::Accuracy, Arc::new(FailingEvaluator));
        let ctx = StepContext {
            run_id: "r1".to_string(),
            url: "https://example.org/flu".to_string(),
        };

        let update = check.execute(Arc::new(snapshot()), &ctx).await;

        assert_eq!(update.verdicts.len(), 1);
        let v = &update.verdicts[0];
        assert_eq!(v.step, "accuracy");
        assert!(!v.passed);
        assert_eq!(v.score, 0.0);
        assert_eq!(update.errors.len(), 1);
        assert!(update.errors[0].contains("model unavailable"));
    }

    #[test]
    fn each_kind_has_distinct_prompts() {
        let snap = snapshot();
        let kinds = [
            CheckKind::Metadata,
            CheckKind::Editorial,
            CheckKind::Compliance,
            CheckKind::Accuracy,
        ];
        for kind in kinds {
            let user = kind.user_prompt(&snap);
            assert!(user.contains("https://example.org/flu"));
            assert!(user.contains("JSON"));
        }
        assert_ne!(
            CheckKind::Metadata.system_prompt(),
            CheckKind::Compliance.system_prompt()
        );
    }
}
