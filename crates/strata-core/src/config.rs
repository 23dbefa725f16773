//! # Core Configuration
//!
//! Explicit configuration for `Gateway::init`. Nothing in the core reads
//! configuration implicitly; the embedder constructs or loads exactly one
//! `CoreConfig` and hands it to the gateway.

use crate::primitives::{
    DEFAULT_BLACKLIST_THRESHOLD, DEFAULT_FETCH_TIMEOUT_MS, MAX_EXPRESSION_SOURCE_BYTES,
};
use crate::types::CoreError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Process-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Upper bound on expression source length, in bytes.
    pub max_expression_source_bytes: usize,

    /// Consecutive fetch failures before an SRL is blacklisted.
    pub blacklist_threshold: u32,

    /// Adapter timeout for SRL fetches, in milliseconds.
    pub fetch_timeout_ms: u64,

    /// Environment variable holding the vault master passphrase.
    ///
    /// When the variable is absent the gateway starts without a vault and
    /// credentialed SRLs cannot be registered or fetched.
    pub master_key_env: String,

    /// Deployment salt for PBKDF2 key derivation.
    pub key_derivation_salt: String,

    /// Whether the registry double-evaluates closed expressions on
    /// registration.
    pub determinism_probe: bool,

    /// Confine the file adapter to this directory, when set.
    pub file_adapter_root: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_expression_source_bytes: MAX_EXPRESSION_SOURCE_BYTES,
            blacklist_threshold: DEFAULT_BLACKLIST_THRESHOLD,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            master_key_env: "STRATA_MASTER_KEY".to_string(),
            key_derivation_salt: "strata-vault-v1".to_string(),
            determinism_probe: true,
            file_adapter_root: None,
        }
    }
}

impl CoreConfig {
    /// Parse a TOML configuration string. Missing fields take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, CoreError> {
        toml::from_str(text).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::Io(e.to_string()))?;
        Self::from_toml_str(&text)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CoreConfig::default();
        assert_eq!(config.blacklist_threshold, 5);
        assert_eq!(config.max_expression_source_bytes, 4096);
        assert!(config.determinism_probe);
        assert!(config.file_adapter_root.is_none());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = CoreConfig::from_toml_str(
            r#"
            blacklist_threshold = 2
            master_key_env = "MY_KEY"
            "#,
        )
        .expect("parse");
        assert_eq!(config.blacklist_threshold, 2);
        assert_eq!(config.master_key_env, "MY_KEY");
        assert_eq!(config.fetch_timeout_ms, DEFAULT_FETCH_TIMEOUT_MS);
    }

    #[test]
    fn malformed_toml_rejected() {
        assert!(matches!(
            CoreConfig::from_toml_str("blacklist_threshold = \"many\""),
            Err(CoreError::Serialization(_))
        ));
    }
}
