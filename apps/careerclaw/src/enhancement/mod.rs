// LLM draft enhancement: candidate ordering, retries with backoff, circuit breaker.
// All provider calls go through llm_client; no direct HTTP here.

pub mod candidates;
pub mod failover;
pub mod handlers;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The slice of a job posting the enhancer needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSummary {
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub description: String,
}

/// Resume signals, ordered by relevance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeSignals {
    #[serde(default)]
    pub keyword_stream: Vec<String>,
    #[serde(default)]
    pub phrase_stream: Vec<String>,
    #[serde(default)]
    pub keyword_weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub phrase_weights: BTreeMap<String, f64>,
}

/// Gap analysis between one job's requirements and the resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GapSignals {
    #[serde(default)]
    pub matched_keywords: Vec<String>,
    #[serde(default)]
    pub missing_keywords: Vec<String>,
    #[serde(default)]
    pub matched_phrases: Vec<String>,
    #[serde(default)]
    pub missing_phrases: Vec<String>,
    /// 0.0 to 1.0
    #[serde(default)]
    pub fit_score: f64,
}

/// Read-only view assembled per enhancement call.
#[derive(Debug, Clone, Copy)]
pub struct EnhancementInput<'a> {
    pub job: &'a JobSummary,
    pub resume: &'a ResumeSignals,
    pub gap: &'a GapSignals,
}
