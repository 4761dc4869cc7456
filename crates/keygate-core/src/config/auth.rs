//! Token and key configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Default access-token lifetime in seconds.
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;
/// Longest token accepted in an `Authorization` header.
const DEFAULT_MAX_TOKEN_LENGTH: usize = 2800;
/// Upper bound on clock-skew tolerance.
pub const MAX_LEEWAY_SECS: u64 = 60;
/// Longest access-token lifetime accepted in config (one year).
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Token and key configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Access-token lifetime in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// PEM-encoded RSA private key.
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,

    /// PEM-encoded RSA public key.
    #[serde(default = "default_public_key_path")]
    pub public_key_path: PathBuf,

    /// Extra base directories searched for relative key paths, in order.
    #[serde(default)]
    pub key_search_paths: Vec<PathBuf>,

    /// Maximum encoded token length.
    #[serde(default = "default_max_token_length")]
    pub max_token_length: usize,

    /// Symmetric clock-skew tolerance for `nbf`/`exp` checks.
    #[serde(default)]
    pub leeway_secs: u64,
}

fn default_token_ttl() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

fn default_private_key_path() -> PathBuf {
    PathBuf::from("keys/private.pem")
}

fn default_public_key_path() -> PathBuf {
    PathBuf::from("keys/public.pem")
}

fn default_max_token_length() -> usize {
    DEFAULT_MAX_TOKEN_LENGTH
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl(),
            private_key_path: default_private_key_path(),
            public_key_path: default_public_key_path(),
            key_search_paths: Vec::new(),
            max_token_length: default_max_token_length(),
            leeway_secs: 0,
        }
    }
}

impl AuthConfig {
    /// Create a new auth config builder.
    #[must_use]
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }

    /// Access-token lifetime.
    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Clock-skew tolerance, clamped to [`MAX_LEEWAY_SECS`].
    #[must_use]
    pub fn leeway(&self) -> u64 {
        self.leeway_secs.min(MAX_LEEWAY_SECS)
    }

    /// Apply `KEYGATE_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("KEYGATE_PRIVATE_KEY") {
            self.private_key_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("KEYGATE_PUBLIC_KEY") {
            self.public_key_path = PathBuf::from(path);
        }
        if let Some(ttl) = std::env::var("KEYGATE_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.token_ttl_secs = ttl;
        }
        self
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.token_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "Token TTL must be positive".to_string(),
            ));
        }
        if self.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(ConfigError::Validation(format!(
                "Token TTL {}s exceeds the {MAX_TOKEN_TTL_SECS}s limit",
                self.token_ttl_secs
            )));
        }
        if self.private_key_path.as_os_str().is_empty()
            || self.public_key_path.as_os_str().is_empty()
        {
            return Err(ConfigError::Validation(
                "Key paths must not be empty".to_string(),
            ));
        }
        if self.leeway_secs > MAX_LEEWAY_SECS {
            return Err(ConfigError::Validation(format!(
                "Leeway {}s exceeds the {MAX_LEEWAY_SECS}s limit",
                self.leeway_secs
            )));
        }
        if self.max_token_length == 0 {
            return Err(ConfigError::Validation(
                "Max token length must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for `AuthConfig`.
#[derive(Debug, Default)]
pub struct AuthConfigBuilder {
    config: AuthConfig,
}

impl AuthConfigBuilder {
    /// Set the access-token lifetime in seconds.
    #[must_use]
    pub fn token_ttl_secs(mut self, secs: u64) -> Self {
        self.config.token_ttl_secs = secs;
        self
    }

    /// Set the private key path.
    #[must_use]
    pub fn private_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.private_key_path = path.into();
        self
    }

    /// Set the public key path.
    #[must_use]
    pub fn public_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.public_key_path = path.into();
        self
    }

    /// Add a key search directory.
    #[must_use]
    pub fn key_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.key_search_paths.push(path.into());
        self
    }

    /// Set the maximum token length.
    #[must_use]
    pub fn max_token_length(mut self, len: usize) -> Self {
        self.config.max_token_length = len;
        self
    }

    /// Set the clock-skew tolerance.
    #[must_use]
    pub fn leeway_secs(mut self, secs: u64) -> Self {
        self.config.leeway_secs = secs;
        self
    }

    /// Build the config.
    #[must_use]
    pub fn build(self) -> AuthConfig {
        self.config
    }
}
