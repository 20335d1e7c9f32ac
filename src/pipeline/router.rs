//! Deterministic routing: decides, from the URL alone, which checks a run
//! dispatches and records a reason for every check it skips.

use crate::pipeline::state::{RoutingDecision, SkippedStep};

/// Checks that run for every submission, in dispatch order.
pub const STANDARD_CHECKS: [&str; 4] = ["metadata", "editorial", "compliance", "accuracy"];

/// A conditional rule: when the URL contains `pattern`, the rule's extra
/// checks are dispatched and the run is classified as `content_class`.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub pattern: String,
    pub extra_steps: Vec<String>,
    pub content_class: String,
}

/// Default rule catalog: lifestyle pages get the markup-hygiene check on
/// top of the standard set.
pub fn default_rules(lifestyle_patterns: &[String]) -> Vec<RouteRule> {
    lifestyle_patterns
        .iter()
        .map(|pattern| RouteRule {
            pattern: pattern.clone(),
            extra_steps: vec!["empty_tag".to_string()],
            content_class: "lifestyle".to_string(),
        })
        .collect()
}

/// Pure function of the URL and rule catalog. Same URL, same decision.
pub fn route(url: &str, rules: &[RouteRule]) -> RoutingDecision {
    let mut dispatch: Vec<String> = STANDARD_CHECKS.iter().map(|s| s.to_string()).collect();
    let mut skipped = Vec::new();
    let mut content_class = "standard".to_string();

    let url_lower = url.to_ascii_lowercase();
    for rule in rules {
        if url_lower.contains(&rule.pattern.to_ascii_lowercase()) {
            content_class = rule.content_class.clone();
            for step in &rule.extra_steps {
                if !dispatch.contains(step) {
                    dispatch.push(step.clone());
                }
            }
        } else {
            for step in &rule.extra_steps {
                if !dispatch.contains(step)
                    && !skipped.iter().any(|s: &SkippedStep| &s.step == step)
                {
                    skipped.push(SkippedStep {
                        step: step.clone(),
                        reason: format!("URL does not match pattern '{}'", rule.pattern),
                    });
                }
            }
        }
    }

    RoutingDecision {
        content_class,
        dispatch,
        skipped,
    }
}
