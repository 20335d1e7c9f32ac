//! Chat-completions backed [`Evaluator`] implementation.
//!
//! Talks to any OpenAI-compatible endpoint. Requests `json_object` output
//! but still runs the response through a tolerant extractor, since models
//! occasionally wrap JSON in code fences or prose.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::Evaluator;

pub struct LlmEvaluator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl LlmEvaluator {
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build evaluator HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    async fn evaluate(&self, system_prompt: &str, user_prompt: &str) -> Result<serde_json::Value> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Evaluator request failed")?
            .error_for_status()
            .context("Evaluator returned an error status")?;

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to decode evaluator response")?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .context("Evaluator response had no choices")?;

        let raw = extract_json(content)
            .with_context(|| format!("No JSON object in evaluator output: {}", content))?;
        serde_json::from_str(&raw).context("Evaluator output was not valid JSON")
    }
}

/// Pull a JSON object out of model output: fenced ```json block first,
/// then any fenced block containing an object, then a raw brace-balanced
/// scan.
pub fn extract_json(output: &str) -> Option<String> {
    if let Some(start) = output.find("```json") {
        let after_marker = &output[start + 7..];
        if let Some(end) = after_marker.find("```") {
            return Some(after_marker[..end].trim().to_string());
        }
    }

    if let Some(start) = output.find("```") {
        let after_marker = &output[start + 3..];
        if let Some(end) = after_marker.find("```") {
            if let Some(json_start) = after_marker[..end].find('{') {
                let content = &after_marker[json_start..end];
                if !content.is_empty() {
                    return Some(content.trim().to_string());
                }
            }
        }
    }

    if let Some(start) = output.find('{') {
        let mut depth = 0;
        let mut end = start;
        for (i, c) in output[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = start + i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        if depth == 0 && end > start {
            return Some(output[start..end].to_string());
        }
    }

    None
}
