//! License Validator: decides whether CareerClaw Pro is active for a key.
//!
//! Decision tree, evaluated in order:
//! 1. No key (absent or blank) → free tier, no I/O. Any other key is hashed
//!    exactly as given, surrounding whitespace included.
//! 2. Cache record for this key:
//!    - younger than the revalidation interval → cached answer, no network;
//!    - stale → remote `validate` (never `activate`):
//!      valid → refresh cache, Pro; invalid → cache `valid=false`, free;
//!      unreachable → previous answer while inside the grace period, free after.
//! 3. No cache (first use) → remote `activate` exactly once:
//!    activated with an instance id → cache, Pro; anything else → free.
//!
//! License problems never fail the run. They only decide the tier, with a
//! warning. Warnings never contain the key or its hash.

pub mod cache;
pub mod handlers;
pub mod remote;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use self::cache::{LicenseCache, LicenseCacheRecord};
use self::remote::{Activation, LicenseRemote, Validation};

/// Source of "now". Swapped for a fixed clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Revalidation timing. Fixed policy; the defaults are what ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LicensePolicy {
    pub revalidate_interval: Duration,
    pub grace_period: Duration,
}

impl Default for LicensePolicy {
    fn default() -> Self {
        Self {
            revalidate_interval: Duration::from_secs(7 * 24 * 3600),
            grace_period: Duration::from_secs(24 * 3600),
        }
    }
}

/// Outcome of one license check, with the path that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LicenseDecision {
    NoKey,
    Cached { valid: bool },
    Revalidated,
    Revoked,
    GraceHonored { valid: bool },
    GraceExpired,
    Activated,
    ActivationRejected,
    ActivationUnreachable,
}

impl LicenseDecision {
    pub fn is_entitled(&self) -> bool {
        match self {
            LicenseDecision::Cached { valid } | LicenseDecision::GraceHonored { valid } => *valid,
            LicenseDecision::Revalidated | LicenseDecision::Activated => true,
            LicenseDecision::NoKey
            | LicenseDecision::Revoked
            | LicenseDecision::GraceExpired
            | LicenseDecision::ActivationRejected
            | LicenseDecision::ActivationUnreachable => false,
        }
    }
}

pub struct LicenseValidator {
    cache: LicenseCache,
    remote: Arc<dyn LicenseRemote>,
    clock: Arc<dyn Clock>,
    policy: LicensePolicy,
}

impl LicenseValidator {
    pub fn new(
        profile_dir: impl AsRef<Path>,
        remote: Arc<dyn LicenseRemote>,
        clock: Arc<dyn Clock>,
        policy: LicensePolicy,
    ) -> Self {
        Self {
            cache: LicenseCache::in_dir(profile_dir),
            remote,
            clock,
            policy,
        }
    }

    /// True if the paid tier is active for `key`. Handlers use `check` so they
    /// can report the decision path as well.
    #[cfg(test)]
    pub async fn is_entitled(&self, key: Option<&str>) -> bool {
        self.check(key).await.is_entitled()
    }

    pub async fn check(&self, key: Option<&str>) -> LicenseDecision {
        // Blank means absent; any other key is hashed exactly as given.
        let Some(key) = key.filter(|k| !k.trim().is_empty()) else {
            return LicenseDecision::NoKey;
        };

        match self.cache.read(key) {
            Some(record) => self.check_cached(key, record).await,
            None => self.activate_first_use(key).await,
        }
    }

    async fn check_cached(&self, key: &str, record: LicenseCacheRecord) -> LicenseDecision {
        let age = record.age_secs(self.clock.now());
        let interval = self.policy.revalidate_interval.as_secs_f64();

        if age < interval {
            return LicenseDecision::Cached {
                valid: record.valid,
            };
        }

        match self.remote.validate(key, &record.instance_id).await {
            Validation::Valid => {
                self.cache.persist_best_effort(&LicenseCacheRecord::new(
                    key,
                    true,
                    self.clock.now(),
                    &record.instance_id,
                ));
                LicenseDecision::Revalidated
            }
            Validation::Invalid => {
                self.cache.persist_best_effort(&LicenseCacheRecord::new(
                    key,
                    false,
                    self.clock.now(),
                    &record.instance_id,
                ));
                warn!("Pro license is no longer valid. Running in free tier.");
                LicenseDecision::Revoked
            }
            Validation::Unreachable => {
                if age < interval + self.policy.grace_period.as_secs_f64() {
                    LicenseDecision::GraceHonored {
                        valid: record.valid,
                    }
                } else {
                    warn!(
                        "Could not reach license server and grace period expired. \
                         Running in free tier. Check your internet connection."
                    );
                    LicenseDecision::GraceExpired
                }
            }
        }
    }

    async fn activate_first_use(&self, key: &str) -> LicenseDecision {
        match self.remote.activate(key).await {
            Activation::Activated { instance_id } if !instance_id.trim().is_empty() => {
                self.cache.persist_best_effort(&LicenseCacheRecord::new(
                    key,
                    true,
                    self.clock.now(),
                    &instance_id,
                ));
                LicenseDecision::Activated
            }
            Activation::Activated { .. } | Activation::Rejected => {
                warn!(
                    "Pro license key is invalid or has been refunded. \
                     Running in free tier."
                );
                LicenseDecision::ActivationRejected
            }
            Activation::Unreachable => {
                warn!(
                    "Could not reach license server. Check your CAREERCLAW_PRO_KEY \
                     and internet connection. Running in free tier."
                );
                LicenseDecision::ActivationUnreachable
            }
        }
    }
}
