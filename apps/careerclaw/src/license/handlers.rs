use axum::{extract::State, Json};
use serde::Serialize;

use crate::license::LicenseDecision;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct LicenseStatusResponse {
    pub entitled: bool,
    pub decision: LicenseDecision,
}

/// GET /api/v1/license
/// Checks the configured key. May touch the license server if the cache is stale.
pub async fn handle_license_status(State(state): State<AppState>) -> Json<LicenseStatusResponse> {
    let decision = state.license.check(state.config.pro_key.as_deref()).await;
    Json(LicenseStatusResponse {
        entitled: decision.is_entitled(),
        decision,
    })
}
