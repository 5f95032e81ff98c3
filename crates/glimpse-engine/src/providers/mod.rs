use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use glimpse_contracts::session::ImageBytes;

use crate::config::ModelConfig;

mod dryrun;
mod ollama;

pub use dryrun::DryrunProvider;
pub use ollama::OllamaProvider;

/// One single-message request to a vision model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    pub prompt: String,
    pub images: Vec<ImageBytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
    pub model: Option<String>,
    pub prompt_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_duration_ns: Option<u64>,
}

impl ChatReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
            prompt_tokens: None,
            output_tokens: None,
            total_duration_ns: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// The server could not be reached or the request did not complete.
    Transport,
    /// The server answered with an error status or error payload.
    Server,
    /// The server answered but the reply could not be read.
    Decode,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::Server => "server",
            FailureKind::Decode => "decode",
        }
    }
}

/// Any failure of a call to the model server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCallFailure {
    kind: FailureKind,
    message: String,
}

impl ModelCallFailure {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transport,
            message: message.into(),
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Server,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Decode,
            message: message.into(),
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let message = error_chain_text(&err, 512);
        if err.is_decode() {
            Self::decode(message)
        } else {
            Self::transport(message)
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ModelCallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ModelCallFailure {}

pub trait VisionModel: Send + Sync {
    fn name(&self) -> &str;
    fn chat(&self, request: &ChatRequest) -> Result<ChatReply, ModelCallFailure>;
}

#[derive(Default)]
pub struct VisionProviderRegistry {
    providers: BTreeMap<String, Box<dyn VisionModel>>,
}

impl VisionProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: VisionModel + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn take(&mut self, name: &str) -> Option<Box<dyn VisionModel>> {
        self.providers.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(config: &ModelConfig) -> Result<VisionProviderRegistry> {
    let mut registry = VisionProviderRegistry::new();
    registry.register(OllamaProvider::new(&config.host, config.timeout)?);
    registry.register(DryrunProvider);
    Ok(registry)
}

/// Builds the provider named by `config.provider`.
pub fn build_provider(config: &ModelConfig) -> Result<Box<dyn VisionModel>> {
    let mut registry = default_provider_registry(config)?;
    let available = registry.names().join(", ");
    registry
        .take(&config.provider)
        .with_context(|| format!("unknown provider '{}' (available: {available})", config.provider))
}

pub(crate) fn error_chain_text(err: &(dyn std::error::Error + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty()
            && !parts
                .last()
                .map(|existing| existing == trimmed)
                .unwrap_or(false)
        {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
