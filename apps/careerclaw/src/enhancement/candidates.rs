//! Candidate chain: the ordered (provider, model) pairs the enhancer tries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm_client::{Provider, UnsupportedProvider};

/// Provider assumed for a bare model name such as `gpt-4o-mini`.
pub const DEFAULT_PROVIDER: Provider = Provider::OpenAi;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error(transparent)]
    UnsupportedProvider(#[from] UnsupportedProvider),

    #[error("candidate '{0}' has no model name")]
    MissingModel(String),

    #[error("candidate chain is empty")]
    Empty,
}

/// One (provider, model) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub provider: Provider,
    pub model: String,
}

impl Candidate {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

impl FromStr for Candidate {
    type Err = ChainError;

    /// Parses `provider/model`, or a bare `model` for the default provider.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (provider, model) = match s.split_once('/') {
            Some((provider, model)) => (provider.parse::<Provider>()?, model.trim()),
            None => (DEFAULT_PROVIDER, s),
        };
        if model.is_empty() {
            return Err(ChainError::MissingModel(s.to_string()));
        }
        Ok(Candidate::new(provider, model))
    }
}

/// Priority order of candidates. Duplicates are allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateChain {
    candidates: Vec<Candidate>,
}

impl CandidateChain {
    pub fn new(candidates: Vec<Candidate>) -> Result<Self, ChainError> {
        if candidates.is_empty() {
            return Err(ChainError::Empty);
        }
        Ok(Self { candidates })
    }

    /// Parses a comma-separated list such as
    /// `openai/gpt-5.2, gpt-4o-mini ,anthropic/claude-sonnet-4-6`.
    /// Blank entries are skipped.
    pub fn parse(raw: &str) -> Result<Self, ChainError> {
        let candidates = raw
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Candidate>, _>>()?;
        Self::new(candidates)
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Trial order: the sticky candidate first, then the configured chain
    /// with every copy of the sticky candidate removed.
    pub fn ordered(&self, sticky: Option<&Candidate>) -> Vec<Candidate> {
        match sticky {
            Some(first) => std::iter::once(first.clone())
                .chain(self.candidates.iter().filter(|c| *c != first).cloned())
                .collect(),
            None => self.candidates.clone(),
        }
    }
}
