mod config;
mod enhancement;
mod errors;
mod license;
mod llm_client;
mod routes;
mod state;
#[cfg(test)]
mod test_support;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::license::remote::HttpLicenseRemote;
use crate::license::{LicensePolicy, LicenseValidator, SystemClock};
use crate::llm_client::ProviderRegistry;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration errors abort startup; a missing license key does not.
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CareerClaw v{}", env!("CARGO_PKG_VERSION"));

    let license = LicenseValidator::new(
        &config.profile_dir,
        Arc::new(HttpLicenseRemote::new(config.license_api_url.clone())),
        Arc::new(SystemClock),
        LicensePolicy::default(),
    );
    info!(
        "License cache in {} ({})",
        config.profile_dir.display(),
        if config.pro_key.is_some() {
            "Pro key configured"
        } else {
            "free tier"
        }
    );

    let providers = ProviderRegistry::with_http_providers();
    info!(
        "LLM chain: {:?} (retries {}, breaker after {} failures, credentials {})",
        config
            .llm_chain
            .candidates()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
        config.failover.max_retries,
        config.failover.breaker_threshold,
        if config.llm_credentials.is_empty() {
            "none"
        } else {
            "present"
        }
    );

    let port = config.port;
    let state = AppState {
        config: Arc::new(config),
        license: Arc::new(license),
        providers,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
