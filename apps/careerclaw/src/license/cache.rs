//! Local license cache: one JSON record per profile directory.
//!
//! CRITICAL: the raw license key is never written. Only its SHA-256 hex
//! digest is stored, and a record whose hash does not match the key being
//! checked is treated as absent.
//!
//! Durability is not safety-critical: reads that fail are "no cache", writes
//! that fail are logged at debug and dropped (`persist_best_effort`). There is
//! no file locking; one process per profile directory is assumed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

pub const CACHE_FILENAME: &str = ".license_cache";

/// One-way hash of the raw key, lowercase hex.
pub fn key_hash(key: &str) -> String {
    Sha256::digest(key.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseCacheRecord {
    pub key_hash: String,
    pub valid: bool,
    /// Unix seconds.
    pub validated_at: f64,
    /// Issued by the activation call; empty if unknown.
    #[serde(default)]
    pub instance_id: String,
}

impl LicenseCacheRecord {
    pub fn new(key: &str, valid: bool, validated_at: DateTime<Utc>, instance_id: &str) -> Self {
        Self {
            key_hash: key_hash(key),
            valid,
            validated_at: unix_seconds(validated_at),
            instance_id: instance_id.to_string(),
        }
    }

    /// Seconds since the last remote check. Negative if the clock went backwards.
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        unix_seconds(now) - self.validated_at
    }
}

fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

#[derive(Debug, Clone)]
pub struct LicenseCache {
    path: PathBuf,
}

impl LicenseCache {
    pub fn in_dir(profile_dir: impl AsRef<Path>) -> Self {
        Self {
            path: profile_dir.as_ref().join(CACHE_FILENAME),
        }
    }

    #[cfg(test)]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// The record for `key`, or `None` if missing, unreadable, or owned by another key.
    pub fn read(&self, key: &str) -> Option<LicenseCacheRecord> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let record: LicenseCacheRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                debug!("Ignoring unreadable license cache: {e}");
                return None;
            }
        };
        (record.key_hash == key_hash(key)).then_some(record)
    }

    /// Writes the record, dropping any I/O failure. A cache that cannot be
    /// written only means the next run checks the remote again.
    pub fn persist_best_effort(&self, record: &LicenseCacheRecord) {
        if let Err(e) = self.persist(record) {
            debug!("License cache write skipped ({}): {e}", self.path.display());
        }
    }

    fn persist(&self, record: &LicenseCacheRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(record).map_err(io::Error::from)?;
        fs::write(&self.path, json)?;
        restrict_to_owner(&self.path);
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        debug!("Could not restrict license cache permissions: {e}");
    }
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) {}
