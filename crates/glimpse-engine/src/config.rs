use std::env;
use std::time::Duration;

use anyhow::{bail, Result};

pub const DEFAULT_MODEL: &str = "gpt-oss:20b";
pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
pub const DEFAULT_PROVIDER: &str = "ollama";

const MODEL_ENV: &[&str] = &["GLIMPSE_MODEL", "OLLAMA_MODEL"];
const HOST_ENV: &[&str] = &["GLIMPSE_OLLAMA_HOST", "OLLAMA_HOST"];
const PROVIDER_ENV: &[&str] = &["GLIMPSE_PROVIDER"];
const TIMEOUT_ENV: &[&str] = &["GLIMPSE_TIMEOUT_SECS"];

/// Where model calls go. Fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub host: String,
    pub timeout: Option<Duration>,
}

/// Values given on the command line; `None` falls through to env, then defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelOverrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub host: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl ModelConfig {
    pub fn resolve(overrides: ModelOverrides) -> Result<Self> {
        Self::resolve_with(overrides, |key| env::var(key).ok())
    }

    pub fn resolve_with(
        overrides: ModelOverrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let first = |keys: &[&str]| first_non_empty(keys, &lookup);

        let provider = non_empty(overrides.provider)
            .or_else(|| first(PROVIDER_ENV))
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string())
            .to_ascii_lowercase();
        let model = non_empty(overrides.model)
            .or_else(|| first(MODEL_ENV))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let host = normalize_host(
            &non_empty(overrides.host)
                .or_else(|| first(HOST_ENV))
                .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
        );
        let timeout_secs = match overrides.timeout_secs {
            Some(value) => Some(value),
            None => match first(TIMEOUT_ENV) {
                Some(raw) => match raw.parse::<u64>() {
                    Ok(value) => Some(value),
                    Err(_) => bail!("GLIMPSE_TIMEOUT_SECS must be a whole number of seconds, got '{raw}'"),
                },
                None => None,
            },
        };

        Ok(Self {
            provider,
            model,
            host,
            timeout: timeout_secs
                .filter(|value| *value > 0)
                .map(Duration::from_secs),
        })
    }
}

/// Adds `http://` when no scheme is given and drops trailing slashes.
pub fn normalize_host(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_OLLAMA_HOST.to_string();
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

fn first_non_empty(keys: &[&str], lookup: &impl Fn(&str) -> Option<String>) -> Option<String> {
    keys.iter().find_map(|key| non_empty(lookup(key)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
