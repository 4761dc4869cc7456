//! Token commands - issue, inspect and revoke access tokens.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Utc;
use keygate_core::{CacheBackend, Config, PermissionCatalog};
use keygate_gateway::auth::MemoryRevocationCache;
use keygate_gateway::{
    IssuedToken, KeyMaterial, RevocationStore, TokenClaims, TokenIssuer, TokenValidator,
    UserStore, load_catalog,
};
use tokio_util::sync::CancellationToken;

use crate::commands::gateway_url;
use crate::ui;

/// Token actions.
#[derive(Debug, Clone)]
pub enum TokenAction {
    /// Issue a token for an existing user.
    Issue {
        email: String,
        ttl_secs: Option<u64>,
    },
    /// Verify a token and print its claims.
    Inspect { token: String },
    /// Revoke a token for its remaining lifetime.
    Revoke {
        token: String,
        url: Option<String>,
        offline: bool,
    },
}

/// Run a token command.
///
/// # Errors
///
/// Returns error if keys cannot be loaded, the token is rejected, or the
/// revocation cannot be recorded.
pub async fn run_token(config: &Config, action: TokenAction) -> Result<()> {
    match action {
        TokenAction::Issue { email, ttl_secs } => {
            let keys = Arc::new(KeyMaterial::load(config)?);
            let catalog = load_catalog(config)?;
            let users = UserStore::open(&config.data_dir())
                .map_err(|e| anyhow!("Failed to open user store: {e}"))?;
            let issuer = TokenIssuer::new(keys, &config.auth);
            let ttl = ttl_secs.map(Duration::from_secs);

            let issued = issue_token(&users, &catalog, &issuer, &email, ttl)?;
            ui::success(&format!("Issued token for '{email}'"));
            ui::kv("Expires", &issued.expires_at.to_rfc3339());
            println!();
            println!("{}", issued.token);
        }
        TokenAction::Inspect { token } => {
            let validator = offline_validator(config)?;
            let catalog = load_catalog(config)?;
            let claims = validator.verify(token.trim())?;
            print_claims(&claims, &catalog);
        }
        TokenAction::Revoke {
            token,
            url,
            offline,
        } => {
            let token = token.trim();
            if offline {
                revoke_offline(config, token).await?;
            } else {
                revoke_remote(&gateway_url(config, url), token).await?;
            }
        }
    }
    Ok(())
}

/// Issue a token for the user behind `email` with its role's grants.
fn issue_token(
    users: &UserStore,
    catalog: &PermissionCatalog,
    issuer: &TokenIssuer,
    email: &str,
    ttl: Option<Duration>,
) -> Result<IssuedToken> {
    let user = users
        .get_by_email(email)?
        .ok_or_else(|| anyhow!("User not found: {email}"))?;
    if !user.active {
        return Err(anyhow!("User '{email}' is disabled"));
    }

    let grants = catalog.grants_for(&user.role)?;
    let ttl = ttl.unwrap_or_else(|| issuer.default_ttl());
    Ok(issuer.issue(&user.id, &user.email, &user.role, grants, ttl)?)
}

/// A validator for signature and window checks only.
fn offline_validator(config: &Config) -> Result<TokenValidator> {
    let keys = Arc::new(KeyMaterial::load(config)?);
    let revocation = Arc::new(RevocationStore::new(
        Arc::new(MemoryRevocationCache::new()),
        config.cache.timeout(),
    ));
    Ok(TokenValidator::new(keys, revocation, &config.auth))
}

fn print_claims(claims: &TokenClaims, catalog: &PermissionCatalog) {
    ui::success("Token is valid");
    ui::kv("User ID", &claims.id);
    ui::kv("Email", &claims.email);
    ui::kv("Role", &claims.role);
    ui::kv("Permissions", &catalog.names_in(&claims.permissions).join(", "));
    ui::kv(
        "Not before",
        &chrono::DateTime::from_timestamp(claims.nbf, 0)
            .map_or_else(|| claims.nbf.to_string(), |t| t.to_rfc3339()),
    );
    ui::kv("Expires", &claims.expires_at().to_rfc3339());
    ui::kv(
        "Remaining",
        &format!("{}s", claims.remaining(Utc::now()).as_secs()),
    );
}

async fn revoke_offline(config: &Config, token: &str) -> Result<()> {
    if matches!(config.cache.backend()?, CacheBackend::Memory) {
        ui::warning("The configured store is in-memory; this revocation ends with this process.");
    }

    let validator = offline_validator(config)?;
    let claims = validator.verify(token)?;
    let store = RevocationStore::connect(&config.cache)?;
    revoke_with(&store, token, &claims).await?;

    ui::success(&format!(
        "Revoked token for '{}' until {}",
        claims.email,
        claims.expires_at().to_rfc3339()
    ));
    Ok(())
}

async fn revoke_with(store: &RevocationStore, token: &str, claims: &TokenClaims) -> Result<()> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    store.revoke_claims(token, claims, &cancel).await?;
    Ok(())
}

async fn revoke_remote(base_url: &str, token: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let resp = client
        .post(format!("{base_url}/auth/logout"))
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| anyhow!("Failed to reach gateway at {base_url}: {e}"))?;

    let status = resp.status();
    if status.is_success() {
        ui::success("Token revoked");
        return Ok(());
    }

    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    let message = body
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("no message");
    Err(anyhow!("Gateway refused revocation ({status}): {message}"))
}
