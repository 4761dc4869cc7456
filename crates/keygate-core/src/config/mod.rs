//! Configuration loading and validation.
//!
//! Config is a JSON5 file, by default `~/.keygate/keygate.json`. Every field
//! has a default, so an empty file (or no file) yields a runnable config.

mod auth;
mod cache;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use auth::{AuthConfig, AuthConfigBuilder, MAX_LEEWAY_SECS, MAX_TOKEN_TTL_SECS};
pub use cache::{CacheBackend, CacheConfig, FailPolicy};

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Token and key configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Revocation cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// JSON5 catalog file. The built-in catalog is used when unset.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Directory for persistent data (user store). Defaults to `<state dir>/data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// File this config was loaded from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default location, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns error if an existing config file cannot be loaded or parsed,
    /// or if the result fails validation.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default().with_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific path.
    ///
    /// Environment overrides are applied before validation.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = json5::from_str(&content)?;
        config.source = Some(path.to_path_buf());
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("keygate.json")
    }

    /// Get the Keygate state directory.
    ///
    /// Uses `KEYGATE_STATE_DIR` env var if set, otherwise `~/.keygate`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("KEYGATE_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".keygate")
        } else {
            PathBuf::from(".keygate")
        }
    }

    /// Resolved data directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("data"))
    }

    /// Apply environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.auth = self.auth.with_env_overrides();
        if let Ok(uri) = std::env::var("KEYGATE_CACHE_URI") {
            self.cache.uri = uri;
        }
        self
    }

    /// Ordered base directories used to resolve relative key paths.
    ///
    /// Configured search paths come first, then the working directory, the
    /// config file's directory and the executable's directory.
    #[must_use]
    pub fn key_search_bases(&self) -> Vec<PathBuf> {
        let mut bases = self.auth.key_search_paths.clone();
        if let Ok(cwd) = std::env::current_dir() {
            bases.push(cwd);
        }
        if let Some(dir) = self.source.as_deref().and_then(Path::parent) {
            bases.push(dir.to_path_buf());
        }
        if let Some(dir) = std::env::current_exe()
            .ok()
            .as_deref()
            .and_then(Path::parent)
        {
            bases.push(dir.to_path_buf());
        }
        bases.dedup();
        bases
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port cannot be 0".to_string(),
            ));
        }
        self.auth.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Enable permissive CORS.
    #[serde(default)]
    pub cors: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            cors: false,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

const fn default_port() -> u16 {
    8420
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

const fn default_request_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.server.port, 8420);
        assert_eq!(config.auth.token_ttl_secs, 3600);
        assert_eq!(config.cache.uri, "memory://");
    }

    #[test]
    fn test_load_json5() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keygate.json");
        std::fs::write(
            &path,
            r#"{
                server: { port: 9000 },
                auth: { tokenTtlSecs: 600, privateKeyPath: "k/priv.pem" },
                cache: { uri: "sled:///var/lib/keygate/revoked", timeoutMs: 2000 },
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.auth.token_ttl_secs, 600);
        assert_eq!(config.auth.private_key_path, PathBuf::from("k/priv.pem"));
        assert_eq!(config.cache.timeout_ms, 2000);
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
        assert!(config.key_search_bases().contains(&dir.path().to_path_buf()));
    }

    #[test]
    fn test_load_rejects_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keygate.json");
        std::fs::write(&path, "{ server: { port: 0 } }").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Validation(_))
        ));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("keygate.json");
        let mut config = Config::default();
        config.server.port = 9100;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server.port, 9100);
    }

    #[test]
    fn test_search_bases_start_with_configured_paths() {
        let mut config = Config::default();
        config.auth.key_search_paths = vec![PathBuf::from("/etc/keygate")];
        assert_eq!(config.key_search_bases()[0], PathBuf::from("/etc/keygate"));
    }
}
