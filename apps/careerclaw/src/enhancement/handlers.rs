use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::enhancement::failover::FailoverEnhancer;
use crate::enhancement::{EnhancementInput, GapSignals, JobSummary, ResumeSignals};
use crate::errors::AppError;
use crate::license::LicenseDecision;
use crate::state::AppState;

/// One job in a briefing run, with its deterministic draft already computed.
#[derive(Debug, Clone, Deserialize)]
pub struct DraftItem {
    pub job: JobSummary,
    #[serde(default)]
    pub gap: GapSignals,
    pub fallback_draft: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnhanceDraftsRequest {
    #[serde(default)]
    pub resume: ResumeSignals,
    pub items: Vec<DraftItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftResult {
    pub draft: String,
    pub enhanced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<&'static str>,
}

impl DraftResult {
    fn fallback(item: &DraftItem, reason: &'static str) -> Self {
        Self {
            draft: item.fallback_draft.clone(),
            enhanced: false,
            fallback_reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnhanceDraftsResponse {
    pub tier: &'static str,
    pub license: LicenseDecision,
    pub enhancer_disabled: bool,
    pub drafts: Vec<DraftResult>,
}

/// POST /api/v1/drafts/enhance
///
/// One briefing run: the license is checked once, a fresh enhancer is built
/// for the run, and each item falls back to its deterministic draft on any
/// enhancement failure. Items are processed strictly in order.
pub async fn handle_enhance_drafts(
    State(state): State<AppState>,
    Json(request): Json<EnhanceDraftsRequest>,
) -> Result<Json<EnhanceDraftsResponse>, AppError> {
    if request.items.is_empty() {
        return Err(AppError::Validation("items must not be empty".to_string()));
    }
    if let Some(i) = request
        .items
        .iter()
        .position(|item| item.fallback_draft.trim().is_empty())
    {
        return Err(AppError::Validation(format!(
            "items[{i}].fallback_draft must not be empty"
        )));
    }

    let license = state.license.check(state.config.pro_key.as_deref()).await;
    let entitled = license.is_entitled();

    let mut enhancer = if entitled {
        match FailoverEnhancer::new(
            state.config.llm_chain.clone(),
            state.providers.clone(),
            state.config.llm_credentials.clone(),
            state.config.failover,
        ) {
            Ok(enhancer) => Some(enhancer),
            Err(e) => {
                info!("LLM enhancement unavailable ({e}); using deterministic drafts");
                None
            }
        }
    } else {
        None
    };
    let no_enhancer_reason = if entitled {
        "llm_not_configured"
    } else {
        "free_tier"
    };

    let mut drafts = Vec::with_capacity(request.items.len());
    for item in &request.items {
        let Some(enhancer) = enhancer.as_mut() else {
            drafts.push(DraftResult::fallback(item, no_enhancer_reason));
            continue;
        };
        let input = EnhancementInput {
            job: &item.job,
            resume: &request.resume,
            gap: &item.gap,
        };
        let result = match enhancer.enhance(input).await {
            Ok(body) => DraftResult {
                draft: with_subject_line(&item.fallback_draft, &body),
                enhanced: true,
                fallback_reason: None,
            },
            Err(e) => {
                if e.is_retryable_later() {
                    warn!(
                        "LLM enhancement failed for one draft ({}), using deterministic fallback",
                        e.kind()
                    );
                } else {
                    debug!("Enhancement skipped for {}: {e}", item.job.company);
                }
                DraftResult::fallback(item, e.kind())
            }
        };
        drafts.push(result);
    }

    if let Some(enhancer) = &enhancer {
        let enhanced = drafts.iter().filter(|d| d.enhanced).count();
        info!(
            "Briefing run: {enhanced}/{} drafts enhanced, sticky candidate {}, {} trailing failures",
            drafts.len(),
            enhancer
                .sticky_candidate()
                .map_or_else(|| "none".to_string(), ToString::to_string),
            enhancer.consecutive_failures()
        );
        if let Some(reason) = enhancer.disabled_reason() {
            warn!("LLM enhancement was disabled mid-run: {reason}");
        }
    }

    Ok(Json(EnhanceDraftsResponse {
        tier: if entitled { "pro" } else { "free" },
        license,
        enhancer_disabled: enhancer.as_ref().is_some_and(FailoverEnhancer::is_disabled),
        drafts,
    }))
}

/// Keeps the deterministic draft's `Subject:` line on top of the enhanced body.
fn with_subject_line(fallback_draft: &str, body: &str) -> String {
    match fallback_draft.lines().next().map(str::trim) {
        Some(subject) if subject.starts_with("Subject:") => format!("{subject}\n\n{body}"),
        _ => body.to_string(),
    }
}
