//! LLM Client: the single point of entry for all provider calls in CareerClaw.
//!
//! ARCHITECTURAL RULE: No other module may call a provider API directly.
//! Everything goes through a `ProviderCall` registered in a `ProviderRegistry`,
//! so the failover layer never needs to know which provider it is talking to.
//!
//! A `ProviderCall` issues exactly one bounded request. Retries, backoff and
//! provider fallback live in `enhancement::failover`.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod anthropic;
pub mod openai;
pub mod prompts;

/// Hard timeout for a single provider request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Output budget per call; roughly 300 words of prose.
pub const MAX_OUTPUT_TOKENS: u32 = 400;
/// Longest provider error code carried into an `LlmError`.
const MAX_ERROR_CODE_CHARS: usize = 48;

/// The closed set of supported providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported provider '{0}' (use 'anthropic' or 'openai')")]
pub struct UnsupportedProvider(pub String);

impl FromStr for Provider {
    type Err = UnsupportedProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Provider::Anthropic),
            "openai" => Ok(Provider::OpenAi),
            other => Err(UnsupportedProvider(other.to_string())),
        }
    }
}

/// Failure of a single provider attempt.
///
/// Display text is what the failover layer classifies and what ends up in
/// logs, so it must never contain a credential. Transport failures and API
/// error bodies are reduced to short category names for the same reason:
/// provider messages are free text and can echo part of the key.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LlmError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(&'static str),

    #[error("API error (status {status}): {category}{}", code_suffix(.code))]
    Api {
        status: u16,
        category: &'static str,
        /// Machine-readable error type from the provider body, if it looked like one.
        code: Option<String>,
    },

    #[error("provider returned no text content")]
    EmptyContent,

    #[error("empty response")]
    EmptyResponse,

    #[error("output too short: {words} words (minimum {min})")]
    TooShort { words: usize, min: usize },

    #[error("output too long: {words} words (maximum {max})")]
    TooLong { words: usize, max: usize },

    #[error("missing credential for provider {0}")]
    MissingCredential(Provider),
}

impl LlmError {
    /// Maps a reqwest failure onto a category. The original error is dropped:
    /// its Display can carry request details we do not want in logs.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(REQUEST_TIMEOUT)
        } else if err.is_connect() {
            LlmError::Transport("connect")
        } else if err.is_body() {
            LlmError::Transport("body")
        } else if err.is_decode() {
            LlmError::Transport("decode")
        } else {
            LlmError::Transport("request")
        }
    }

    /// Builds an API error from the HTTP status and the provider's structured
    /// error type (`overloaded_error`, `invalid_api_key`, ...). The error
    /// message text is never carried.
    pub fn api(status: u16, provider_code: Option<&str>) -> Self {
        let category = match status {
            429 => "rate limit",
            408 => "timeout",
            500..=599 => "server error",
            _ => "client error",
        };
        LlmError::Api {
            status,
            category,
            code: provider_code.filter(|c| is_error_code(c)).map(str::to_string),
        }
    }
}

/// Identifier-shaped strings only; anything else may be prose.
fn is_error_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_ERROR_CODE_CHARS
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
}

/// One prompt, ready to send.
#[derive(Debug, Clone, Copy)]
pub struct Completion<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub prompt: &'a str,
}

/// Capability interface for a provider backend: one request, one response.
#[async_trait]
pub trait ProviderCall: Send + Sync {
    fn provider(&self) -> Provider;

    /// Sends one request and returns the raw text body. No retries.
    async fn complete(&self, api_key: &str, request: Completion<'_>) -> Result<String, LlmError>;
}

/// Provider implementations keyed by identifier.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    calls: HashMap<Provider, Arc<dyn ProviderCall>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the HTTP implementations of every supported provider.
    pub fn with_http_providers() -> Self {
        let client = http_client();
        Self::new()
            .register(Arc::new(anthropic::AnthropicCall::new(client.clone())))
            .register(Arc::new(openai::OpenAiCall::new(client)))
    }

    pub fn register(mut self, call: Arc<dyn ProviderCall>) -> Self {
        self.calls.insert(call.provider(), call);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderCall>> {
        self.calls.get(&provider).cloned()
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// API credentials per provider. `Debug` never prints the secrets.
#[derive(Clone, Default)]
pub struct ProviderCredentials {
    keys: HashMap<Provider, String>,
}

impl ProviderCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a credential; blank values are ignored.
    pub fn with(mut self, provider: Provider, key: impl Into<String>) -> Self {
        let key: String = key.into();
        if !key.trim().is_empty() {
            self.keys.insert(provider, key.trim().to_string());
        }
        self
    }

    pub fn resolve(&self, provider: Provider) -> Option<&str> {
        self.keys.get(&provider).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<&str> = self.keys.keys().map(Provider::as_str).collect();
        providers.sort_unstable();
        f.debug_struct("ProviderCredentials")
            .field("providers", &providers)
            .finish()
    }
}

/// Accepted word-count window for generated drafts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBounds {
    pub min_words: usize,
    pub max_words: usize,
}

impl Default for OutputBounds {
    fn default() -> Self {
        Self {
            min_words: 50,
            max_words: 350,
        }
    }
}

/// Validates the shape of a provider response. Content itself is not judged.
pub fn validate_output(raw: &str, bounds: OutputBounds) -> Result<String, LlmError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    let words = text.split_whitespace().count();
    if words < bounds.min_words {
        return Err(LlmError::TooShort {
            words,
            min: bounds.min_words,
        });
    }
    if words > bounds.max_words {
        return Err(LlmError::TooLong {
            words,
            max: bounds.max_words,
        });
    }
    Ok(text.to_string())
}

#[cfg(test)]
pub(crate) fn words(n: usize) -> String {
    vec!["word"; n].join(" ")
}
