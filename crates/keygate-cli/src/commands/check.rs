//! Check command - verify everything the gateway needs at startup.

use anyhow::Result;
use keygate_core::Config;
use keygate_gateway::auth::resolve_key_path;
use keygate_gateway::{KeyMaterial, RevocationStore, UserStore, load_catalog};
use tokio_util::sync::CancellationToken;

use crate::ui::{self, HealthStatus};

/// Run each startup check and print a report.
///
/// # Errors
///
/// Returns error if any check fails, so scripts can gate on the exit code.
pub async fn run_check(config: &Config) -> Result<()> {
    ui::header("Keygate Check");
    println!();

    let mut failures = 0;

    match &config.source {
        Some(path) => ui::health_check(
            "Configuration",
            HealthStatus::Ok,
            Some(&path.display().to_string()),
        ),
        None => ui::health_check("Configuration", HealthStatus::Warning, Some("using defaults")),
    }

    let bases = config.key_search_bases();
    for (name, path) in [
        ("Private key", &config.auth.private_key_path),
        ("Public key", &config.auth.public_key_path),
    ] {
        match resolve_key_path(path, &bases) {
            Ok(found) => ui::health_check(name, HealthStatus::Ok, Some(&found.display().to_string())),
            Err(e) => {
                ui::health_check(name, HealthStatus::Error, Some(&e.to_string()));
                failures += 1;
            }
        }
    }

    match KeyMaterial::load(config) {
        Ok(_) => ui::health_check("Key pair", HealthStatus::Ok, Some("RS256 pair matches")),
        Err(e) => {
            ui::health_check("Key pair", HealthStatus::Error, Some(&e.to_string()));
            failures += 1;
        }
    }

    match load_catalog(config) {
        Ok(catalog) => match catalog.self_audit() {
            Ok(()) => ui::health_check(
                "Catalog",
                HealthStatus::Ok,
                Some(&format!(
                    "{} permissions, {} roles",
                    catalog.all().len(),
                    catalog.roles().len()
                )),
            ),
            Err(e) => {
                ui::health_check("Catalog", HealthStatus::Error, Some(&e.to_string()));
                failures += 1;
            }
        },
        Err(e) => {
            ui::health_check("Catalog", HealthStatus::Error, Some(&e.to_string()));
            failures += 1;
        }
    }

    match RevocationStore::connect(&config.cache) {
        Ok(store) => {
            let cancel = CancellationToken::new();
            match store.contains("keygate-check-probe", &cancel).await {
                Ok(_) => ui::health_check(
                    "Revocation store",
                    HealthStatus::Ok,
                    Some(&format!("{} ({:?} on failure)", config.cache.uri, store.policy())),
                ),
                Err(e) => {
                    ui::health_check("Revocation store", HealthStatus::Error, Some(&e.to_string()));
                    failures += 1;
                }
            }
        }
        Err(e) => {
            ui::health_check("Revocation store", HealthStatus::Error, Some(&e.to_string()));
            failures += 1;
        }
    }

    let data_dir = config.data_dir();
    if data_dir.exists() {
        match UserStore::open(&data_dir) {
            Ok(users) if users.is_empty() => ui::health_check(
                "User store",
                HealthStatus::Warning,
                Some("no users; create one with 'keygate user create'"),
            ),
            Ok(users) => ui::health_check(
                "User store",
                HealthStatus::Ok,
                Some(&format!("{} user(s)", users.count())),
            ),
            Err(e) => {
                ui::health_check("User store", HealthStatus::Error, Some(&e.to_string()));
                failures += 1;
            }
        }
    } else {
        ui::health_check(
            "User store",
            HealthStatus::Warning,
            Some("not created yet"),
        );
    }

    println!();
    if failures == 0 {
        ui::success("All checks passed");
        Ok(())
    } else {
        ui::error(&format!("{failures} check(s) failed"));
        anyhow::bail!("{failures} check(s) failed")
    }
}
