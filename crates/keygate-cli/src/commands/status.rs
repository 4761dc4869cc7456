//! Status command - probe a running gateway.

use std::time::Duration;

use anyhow::Result;
use keygate_core::Config;

use crate::commands::gateway_url;
use crate::ui::{self, HealthStatus};

/// Probe `/health` and print the result.
///
/// # Errors
///
/// Returns error only if the HTTP client cannot be built; an unreachable
/// gateway is reported, not returned.
pub async fn run_status(config: &Config, url: Option<String>) -> Result<()> {
    let base_url = gateway_url(config, url);
    ui::header("Keygate Status");
    println!();
    ui::kv("Gateway", &base_url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    match probe_health(&client, &base_url).await {
        Ok(version) => {
            ui::health_check("Gateway", HealthStatus::Ok, Some("running"));
            if let Some(v) = version {
                ui::kv("  Version", &v);
            }
        }
        Err(e) => {
            ui::health_check("Gateway", HealthStatus::Error, Some(&e));
            ui::info("  Start with: keygate serve");
        }
    }

    Ok(())
}

/// Hit `/health`, returning the reported version if any.
async fn probe_health(client: &reqwest::Client, base_url: &str) -> Result<Option<String>, String> {
    let resp = client
        .get(format!("{base_url}/health"))
        .send()
        .await
        .map_err(|e| format!("not reachable: {e}"))?;

    if !resp.status().is_success() {
        return Err(format!("unhealthy: HTTP {}", resp.status()));
    }

    let body: serde_json::Value = resp.json().await.map_err(|e| e.to_string())?;
    Ok(body
        .pointer("/data/version")
        .and_then(|v| v.as_str())
        .map(String::from))
}
