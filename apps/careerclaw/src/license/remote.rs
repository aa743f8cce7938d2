//! Remote license server: activation and validation.
//!
//! `activate` may consume an activation slot and must only be called on first
//! use. `validate` never does.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_LICENSE_API_URL: &str = "https://api.lemonsqueezy.com/v1/licenses";
const LICENSE_TIMEOUT: Duration = Duration::from_secs(10);
const INSTANCE_NAME: &str = "careerclaw";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Activated { instance_id: String },
    /// Explicit rejection: unknown, refunded, or exhausted key.
    Rejected,
    /// Network failure or an unexpected server response.
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid,
    Unreachable,
}

#[async_trait]
pub trait LicenseRemote: Send + Sync {
    async fn activate(&self, key: &str) -> Activation;

    async fn validate(&self, key: &str, instance_id: &str) -> Validation;
}

pub struct HttpLicenseRemote {
    client: Client,
    base_url: String,
}

impl HttpLicenseRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(LICENSE_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post_form(&self, endpoint: &str, form: &[(&str, &str)]) -> Option<(u16, String)> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = match self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!(
                    "License server unreachable ({endpoint}): timeout={} connect={}",
                    e.is_timeout(),
                    e.is_connect()
                );
                return None;
            }
        };
        let status = response.status().as_u16();
        let body = response.text().await.ok()?;
        Some((status, body))
    }
}

#[async_trait]
impl LicenseRemote for HttpLicenseRemote {
    async fn activate(&self, key: &str) -> Activation {
        match self
            .post_form(
                "activate",
                &[("license_key", key), ("instance_name", INSTANCE_NAME)],
            )
            .await
        {
            Some((status, body)) => activation_from_response(status, &body),
            None => Activation::Unreachable,
        }
    }

    async fn validate(&self, key: &str, instance_id: &str) -> Validation {
        let mut form = vec![("license_key", key)];
        if !instance_id.is_empty() {
            form.push(("instance_id", instance_id));
        }
        match self.post_form("validate", &form).await {
            Some((status, body)) => validation_from_response(status, &body),
            None => Validation::Unreachable,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ActivateBody {
    #[serde(default)]
    activated: bool,
    license_key: Option<LicenseKeyBody>,
    instance: Option<InstanceBody>,
}

#[derive(Debug, Deserialize)]
struct ValidateBody {
    #[serde(default)]
    valid: bool,
    license_key: Option<LicenseKeyBody>,
}

#[derive(Debug, Deserialize)]
struct LicenseKeyBody {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct InstanceBody {
    #[serde(default)]
    id: String,
}

/// Statuses that mean the server looked at the key and said no.
fn is_rejection_status(status: u16) -> bool {
    matches!(status, 400 | 404 | 422)
}

fn key_is_revoked(key: Option<&LicenseKeyBody>) -> bool {
    key.map(|k| matches!(k.status.as_str(), "expired" | "disabled"))
        .unwrap_or(false)
}

fn activation_from_response(status: u16, body: &str) -> Activation {
    if is_rejection_status(status) {
        return Activation::Rejected;
    }
    if !(200..300).contains(&status) {
        return Activation::Unreachable;
    }
    let Ok(parsed) = serde_json::from_str::<ActivateBody>(body) else {
        return Activation::Unreachable;
    };
    if !parsed.activated || key_is_revoked(parsed.license_key.as_ref()) {
        return Activation::Rejected;
    }
    Activation::Activated {
        instance_id: parsed.instance.map(|i| i.id).unwrap_or_default(),
    }
}

fn validation_from_response(status: u16, body: &str) -> Validation {
    if is_rejection_status(status) {
        return Validation::Invalid;
    }
    if !(200..300).contains(&status) {
        return Validation::Unreachable;
    }
    let Ok(parsed) = serde_json::from_str::<ValidateBody>(body) else {
        return Validation::Unreachable;
    };
    if parsed.valid && !key_is_revoked(parsed.license_key.as_ref()) {
        Validation::Valid
    } else {
        Validation::Invalid
    }
}
