use std::sync::Arc;

use crate::config::Config;
use crate::license::LicenseValidator;
use crate::llm_client::ProviderRegistry;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub license: Arc<LicenseValidator>,
    /// Provider backends. Each briefing run builds its own enhancer on top of these.
    pub providers: ProviderRegistry,
}
