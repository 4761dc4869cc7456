//! Serve command - run the gateway in the foreground.

use anyhow::Result;
use keygate_core::Config;

use crate::ui;

/// Serve command arguments.
#[derive(Debug, Clone, Default)]
pub struct ServeArgs {
    /// Port override.
    pub port: Option<u16>,
    /// Bind address override.
    pub bind: Option<String>,
}

/// Start the gateway and block until Ctrl-C.
///
/// # Errors
///
/// Returns error if startup fails: missing keys, a failed catalog audit, an
/// unreachable revocation store, or a port that cannot be bound.
pub async fn run_serve(mut config: Config, args: ServeArgs) -> Result<()> {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    config.validate()?;

    ui::header("Starting Keygate");
    ui::kv(
        "Address",
        &format!("{}:{}", config.server.bind_address, config.server.port),
    );
    ui::kv("Revocation store", &config.cache.uri);
    ui::kv("Data dir", &config.data_dir().display().to_string());
    println!();

    keygate_gateway::start(config).await?;
    Ok(())
}
