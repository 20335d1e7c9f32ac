//! Advisory synthesis of the check verdicts, produced just before the run
//! suspends for human review.
//!
//! Strictly advisory: the recommendation is attached to the run state for
//! the reviewer to read, and any failure here is logged and swallowed so
//! it can never block the human gate.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use super::Evaluator;
use crate::pipeline::state::{JudgeRecommendation, VerdictRecord};

const SYSTEM_PROMPT: &str = "You are a senior content reviewer synthesizing the output of \
several automated checks into a recommendation for a human approver. \
Respond ONLY with valid JSON:\n\
{\n  \"recommendation\": \"approve\" | \"reject\" | \"needs_revision\",\n\
  \"confidence\": \"high\" | \"medium\" | \"low\",\n\
  \"key_concerns\": [\"most important problems, if any\"],\n\
  \"strengths\": [\"what the content does well\"],\n\
  \"rationale\": \"one short paragraph\"\n}";

pub struct JudgeAdvisor {
    evaluator: Arc<dyn Evaluator>,
}

impl JudgeAdvisor {
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self { evaluator }
    }

    pub async fn recommend(
        &self,
        url: &str,
        verdicts: &[VerdictRecord],
        overall_score: f64,
        overall_passed: bool,
    ) -> Option<JudgeRecommendation> {
        let summary = json!({
            "url": url,
            "overall_score": overall_score,
            "overall_passed": overall_passed,
            "verdicts": verdicts,
        });
        let user = format!(
            "Here are the check results for a page. Weigh severity, not just \
             the score, and recommend a decision.\n\n{}",
            summary
        );

        match self.evaluator.evaluate(SYSTEM_PROMPT, &user).await {
            Ok(value) => match serde_json::from_value::<JudgeRecommendation>(value) {
                Ok(rec) => Some(rec),
                Err(e) => {
                    warn!(url, error = %e, "Judge returned unparseable recommendation");
                    None
                }
            },
            Err(e) => {
                warn!(url, error = %e, "Judge evaluation failed");
                None
            }
        }
    }
}
