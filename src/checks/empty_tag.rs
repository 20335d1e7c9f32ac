//! Deterministic markup-hygiene check: scans raw HTML for self-closing or
//! empty tags that should carry content.
//!
//! Runs against the raw page source on purpose. DOM parsers silently
//! repair malformed tags like `<title/>`, which would hide exactly the
//! defects this check exists to find.

use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::content::ContentSnapshot;
use crate::pipeline::state::{StateUpdate, VerdictRecord};
use crate::pipeline::steps::{CheckStep, StepContext};

/// Tags expected to always contain text.
const CONTENT_TAGS: &str = "title|h1|h2|h3|h4|p|a|li|td|th|label|button";

const DEDUCTION_PER_ISSUE: f64 = 0.05;
const PASS_THRESHOLD: f64 = 0.8;

static SELF_CLOSING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)<({CONTENT_TAGS})(\s[^>]*)?\s*/>")).unwrap()
});

static EMPTY_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)<({CONTENT_TAGS})(\s[^>]*)?>\s*</({CONTENT_TAGS})>")).unwrap()
});

pub struct EmptyTagCheck;

fn scan(raw_html: &str) -> Vec<String> {
    let mut issues = Vec::new();
    for (idx, line) in raw_html.lines().enumerate() {
        let line_num = idx + 1;
        for cap in SELF_CLOSING_RE.captures_iter(line) {
            let tag = cap[1].to_ascii_lowercase();
            issues.push(format!(
                "Self-closing <{tag}/> at line {line_num}: should have content"
            ));
        }
        for cap in EMPTY_TAG_RE.captures_iter(line) {
            let open = cap[1].to_ascii_lowercase();
            // The regex crate has no backreferences; require the closing
            // tag to match the opening one here instead.
            if cap[3].eq_ignore_ascii_case(&open) {
                issues.push(format!(
                    "Empty <{open}></{open}> at line {line_num}: tag exists but has no content"
                ));
            }
        }
    }
    issues
}

#[async_trait]
impl CheckStep for EmptyTagCheck {
    fn name(&self) -> &'static str {
        "empty_tag"
    }

    async fn execute(&self, content: Arc<ContentSnapshot>, _ctx: &StepContext) -> StateUpdate {
        if content.raw_html.is_empty() {
            return StateUpdate::verdict(VerdictRecord {
                step: "empty_tag".to_string(),
                passed: true,
                score: 1.0,
                observations: vec!["Raw HTML not available, skipping tag scan".to_string()],
                issues: vec![],
                recommendations: vec![],
            });
        }

        let issues = scan(&content.raw_html);
        let verdict = if issues.is_empty() {
            VerdictRecord {
                step: "empty_tag".to_string(),
                passed: true,
                score: 1.0,
                observations: vec!["No self-closing or empty content tags found".to_string()],
                issues: vec![],
                recommendations: vec![],
            }
        } else {
            let score =
                ((1.0 - issues.len() as f64 * DEDUCTION_PER_ISSUE).max(0.0) * 100.0).round()
                    / 100.0;
            let count = issues.len();
            VerdictRecord {
                step: "empty_tag".to_string(),
                passed: score >= PASS_THRESHOLD,
                score,
                observations: vec![],
                issues,
                recommendations: vec![format!(
                    "Fix {count} empty/self-closing tag(s) that should contain content"
                )],
            }
        };

        StateUpdate::verdict(verdict)
    }
}
