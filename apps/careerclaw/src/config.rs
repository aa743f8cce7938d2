use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::enhancement::candidates::CandidateChain;
use crate::enhancement::failover::FailoverPolicy;
use crate::license::remote::DEFAULT_LICENSE_API_URL;
use crate::llm_client::{Provider, ProviderCredentials};

const DEFAULT_PROFILE_DIR: &str = ".careerclaw";
const DEFAULT_CHAIN: &str = "openai/gpt-4o-mini,anthropic/claude-sonnet-4-5";

/// Application configuration loaded from environment variables.
/// Nothing is required: without a license key the app runs in the free tier.
#[derive(Clone)]
pub struct Config {
    pub pro_key: Option<String>,
    pub profile_dir: PathBuf,
    pub license_api_url: String,
    pub llm_chain: CandidateChain,
    pub llm_credentials: ProviderCredentials,
    pub failover: FailoverPolicy,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    /// Builds the config from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let llm_chain = match (get("CAREERCLAW_LLM_CHAIN"), get("CAREERCLAW_LLM_MODEL")) {
            (Some(chain), _) => chain,
            (None, Some(model)) => match get("CAREERCLAW_LLM_PROVIDER") {
                Some(provider) => format!("{provider}/{model}"),
                None => model,
            },
            (None, None) => DEFAULT_CHAIN.to_string(),
        };
        let llm_chain = CandidateChain::parse(&llm_chain)
            .with_context(|| format!("CAREERCLAW_LLM_CHAIN is invalid: '{llm_chain}'"))?;

        let defaults = FailoverPolicy::default();
        let failover = FailoverPolicy {
            max_retries: parse_or(&get, "CAREERCLAW_LLM_MAX_RETRIES", defaults.max_retries)?,
            breaker_threshold: parse_or(
                &get,
                "CAREERCLAW_LLM_CIRCUIT_BREAKER_FAILS",
                defaults.breaker_threshold,
            )?,
            ..defaults
        };

        Ok(Config {
            pro_key: get("CAREERCLAW_PRO_KEY"),
            profile_dir: get("CAREERCLAW_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROFILE_DIR)),
            license_api_url: get("CAREERCLAW_LICENSE_API_URL")
                .unwrap_or_else(|| DEFAULT_LICENSE_API_URL.to_string()),
            llm_credentials: credentials(&get)?,
            llm_chain,
            failover,
            port: parse_or(&get, "PORT", 8080)?,
            rust_log: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// Per-provider keys win; the generic `CAREERCLAW_LLM_KEY` fills in for the
/// provider named by `CAREERCLAW_LLM_PROVIDER`, or for every provider if none is named.
fn credentials(get: &impl Fn(&str) -> Option<String>) -> Result<ProviderCredentials> {
    let generic_for: Vec<Provider> = match get("CAREERCLAW_LLM_PROVIDER") {
        Some(name) => vec![name
            .parse::<Provider>()
            .context("CAREERCLAW_LLM_PROVIDER is invalid")?],
        None => vec![Provider::OpenAi, Provider::Anthropic],
    };
    let generic = get("CAREERCLAW_LLM_KEY");

    let mut creds = ProviderCredentials::new();
    for (provider, var) in [
        (Provider::OpenAi, "CAREERCLAW_OPENAI_KEY"),
        (Provider::Anthropic, "CAREERCLAW_ANTHROPIC_KEY"),
    ] {
        let key = get(var).or_else(|| {
            generic
                .clone()
                .filter(|_| generic_for.contains(&provider))
        });
        if let Some(key) = key {
            creds = creds.with(provider, key);
        }
    }
    Ok(creds)
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(name) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{name} must be a non-negative integer, got '{raw}'")),
        None => Ok(default),
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("pro_key", &self.pro_key.as_ref().map(|_| "<redacted>"))
            .field("profile_dir", &self.profile_dir)
            .field("license_api_url", &self.license_api_url)
            .field("llm_chain", &self.llm_chain)
            .field("llm_credentials", &self.llm_credentials)
            .field("failover", &self.failover)
            .field("port", &self.port)
            .field("rust_log", &self.rust_log)
            .finish()
    }
}
