use anyhow::{Result, bail};
use std::env;

const DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";
const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
}

impl Config {
    /// Loads configuration from the process environment. `GEMINI_API_KEY` is
    /// required; everything else falls back to defaults. A missing or blank
    /// key is fatal and must be reported before any network call is made.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| env::var(key).ok())
    }

    fn from_env_with(mut get_var: impl FnMut(&str) -> Option<String>) -> Result<Self> {
        let api_key = match get_var("GEMINI_API_KEY") {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => bail!(
                "GEMINI_API_KEY is not set. \
                 Export it or add it to a .env file before starting."
            ),
        };

        Ok(Self {
            api_key,
            model: get_var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base_url: get_var("GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            request_timeout_secs: parse_request_timeout_secs(
                get_var("REQUEST_TIMEOUT_SECS").as_deref(),
            ),
        })
    }
}

fn parse_request_timeout_secs(raw: Option<&str>) -> u64 {
    raw.and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
}
