//! CLI command implementations.

use std::path::Path;

use anyhow::Context;
use keygate_core::Config;

pub mod catalog;
pub mod check;
pub mod serve;
pub mod status;
pub mod token;
pub mod user;

pub use catalog::run_catalog;
pub use check::run_check;
pub use serve::run_serve;
pub use status::run_status;
pub use token::run_token;
pub use user::run_user;

/// Load the config at `path`, or the default location.
///
/// # Errors
///
/// Returns error if the file exists but cannot be parsed or validated.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Config::load_default().context("Failed to load default config"),
    }
}

/// Base URL of the gateway described by `config`, unless overridden.
pub fn gateway_url(config: &Config, url: Option<String>) -> String {
    url.unwrap_or_else(|| {
        let host = match config.server.bind_address.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            other => other,
        };
        format!("http://{}:{}", host, config.server.port)
    })
    .trim_end_matches('/')
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_url_from_config() {
        let mut config = Config::default();
        config.server.bind_address = "0.0.0.0".to_string();
        config.server.port = 9100;

        assert_eq!(gateway_url(&config, None), "http://127.0.0.1:9100");
        assert_eq!(
            gateway_url(&config, Some("http://gw.internal:8080/".to_string())),
            "http://gw.internal:8080"
        );
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keygate.json");
        std::fs::write(&path, r#"{ server: { port: 9200 } }"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9200);
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.json"))).is_err());
    }
}
