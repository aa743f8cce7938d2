pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::enhancement::handlers as enhancement;
use crate::license::handlers as license;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/license", get(license::handle_license_status))
        .route(
            "/api/v1/drafts/enhance",
            post(enhancement::handle_enhance_drafts),
        )
        .with_state(state)
}
