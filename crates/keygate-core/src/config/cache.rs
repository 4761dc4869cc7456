//! Revocation cache configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

const MIN_TIMEOUT_MS: u64 = 100;
const MAX_TIMEOUT_MS: u64 = 10_000;

/// What to do when the revocation cache cannot answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailPolicy {
    /// Deny the request.
    #[default]
    Closed,
    /// Admit the request as if the token were not revoked.
    Open,
}

/// Revocation cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Backend URI: `memory://` or `sled://<path>`.
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Behaviour when the cache is unreachable.
    #[serde(default)]
    pub fail_policy: FailPolicy,
}

fn default_uri() -> String {
    "memory://".to_string()
}

const fn default_timeout_ms() -> u64 {
    1500
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            timeout_ms: default_timeout_ms(),
            fail_policy: FailPolicy::default(),
        }
    }
}

/// A parsed cache URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    /// In-process TTL map.
    Memory,
    /// Persistent sled tree at the given path.
    Sled(PathBuf),
}

impl CacheConfig {
    /// Per-call timeout, clamped to 100ms..=10s.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS))
    }

    /// Parse the backend URI.
    ///
    /// # Errors
    ///
    /// Returns error for unknown schemes or an empty sled path.
    pub fn backend(&self) -> Result<CacheBackend, ConfigError> {
        if let Some(rest) = self.uri.strip_prefix("memory://") {
            if rest.is_empty() {
                return Ok(CacheBackend::Memory);
            }
        } else if let Some(path) = self.uri.strip_prefix("sled://") {
            if path.is_empty() {
                return Err(ConfigError::Validation(
                    "sled:// cache URI needs a path".to_string(),
                ));
            }
            return Ok(CacheBackend::Sled(PathBuf::from(path)));
        }
        Err(ConfigError::Validation(format!(
            "Unsupported cache URI: {}",
            self.uri
        )))
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        self.backend().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_uri(uri: &str) -> CacheConfig {
        CacheConfig {
            uri: uri.to_string(),
            ..CacheConfig::default()
        }
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!(with_uri("memory://").backend().unwrap(), CacheBackend::Memory);
        assert_eq!(
            with_uri("sled:///tmp/revoked").backend().unwrap(),
            CacheBackend::Sled(PathBuf::from("/tmp/revoked"))
        );
        assert!(with_uri("sled://").backend().is_err());
        assert!(with_uri("redis://localhost").backend().is_err());
        assert!(with_uri("memory://x").backend().is_err());
    }

    #[test]
    fn test_timeout_clamped() {
        let mut config = CacheConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        config.timeout_ms = 1;
        assert_eq!(config.timeout(), Duration::from_millis(100));
        config.timeout_ms = 60_000;
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_fail_policy_serde() {
        let config: CacheConfig = json5::from_str(r#"{ failPolicy: "open" }"#).unwrap();
        assert_eq!(config.fail_policy, FailPolicy::Open);
        assert_eq!(CacheConfig::default().fail_policy, FailPolicy::Closed);
    }
}
