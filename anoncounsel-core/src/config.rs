//! Security context configuration.

use crate::error::{CoreError, CoreResult};
use anoncounsel_access::{StaffEntry, ANONYMOUS_LABEL_PREFIX};
use anoncounsel_crypto::KdfParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File holding the pseudonym and local role, inside `data_dir`.
pub const IDENTITY_FILE: &str = "identity.json";

/// Configuration for [`SecurityContext::bootstrap`](crate::SecurityContext::bootstrap).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Directory holding the sealed keystore and the identity file.
    pub data_dir: PathBuf,

    /// Environment variable carrying the keystore secret. The secret itself
    /// is never written to config.
    pub keystore_secret_env: String,

    /// Argon2id parameters for sealing the device key.
    pub kdf: KdfParams,

    /// Bound on the remote role claim fetch, in milliseconds.
    pub role_claim_timeout_ms: u64,

    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Prefix of the labels privileged viewers see.
    pub anonymous_label_prefix: String,

    /// Respondent names by contact email.
    pub staff_directory: Vec<StaffEntry>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("anoncounsel-data"),
            keystore_secret_env: "ANONCOUNSEL_KEYSTORE_SECRET".to_string(),
            kdf: KdfParams::default(),
            role_claim_timeout_ms: 5_000,
            log_filter: "info".to_string(),
            anonymous_label_prefix: ANONYMOUS_LABEL_PREFIX.to_string(),
            staff_directory: Vec::new(),
        }
    }
}

impl CoreConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.role_claim_timeout_ms)
    }

    pub fn identity_path(&self) -> PathBuf {
        self.data_dir.join(IDENTITY_FILE)
    }

    /// Reads the keystore secret from the configured environment variable.
    pub fn keystore_secret(&self) -> CoreResult<String> {
        std::env::var(&self.keystore_secret_env).map_err(|_| {
            CoreError::Config(format!(
                "keystore secret variable {} is not set",
                self.keystore_secret_env
            ))
        })
    }
}
