//! Environment-driven configuration. `.env` is loaded by `main` before
//! this is read.

use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub fetch_timeout: Duration,
    pub evaluator_timeout: Duration,
    /// URL substrings that classify a page as lifestyle content.
    pub lifestyle_patterns: Vec<String>,
    /// Whether the advisory judge runs before the human gate.
    pub judge_enabled: bool,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let port = env_or("VERITY_PORT", "8000")
            .parse()
            .context("VERITY_PORT is not a valid port")?;
        let fetch_timeout = env_or("VERITY_FETCH_TIMEOUT_SECS", "30")
            .parse()
            .map(Duration::from_secs)
            .context("VERITY_FETCH_TIMEOUT_SECS is not a number")?;
        let evaluator_timeout = env_or("VERITY_EVALUATOR_TIMEOUT_SECS", "60")
            .parse()
            .map(Duration::from_secs)
            .context("VERITY_EVALUATOR_TIMEOUT_SECS is not a number")?;
        let lifestyle_patterns = env_or("VERITY_LIFESTYLE_PATTERNS", "healthy-lifestyle")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host: env_or("VERITY_HOST", "127.0.0.1"),
            port,
            db_path: env_or("VERITY_DB_PATH", "verity.db"),
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .context("OPENAI_API_KEY is not set")?,
            openai_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_model: env_or("OPENAI_MODEL", "gpt-4o"),
            fetch_timeout,
            evaluator_timeout,
            lifestyle_patterns,
            judge_enabled: env_or("VERITY_JUDGE_ENABLED", "true") == "true",
        })
    }
}
