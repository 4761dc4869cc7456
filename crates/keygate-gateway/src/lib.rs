//! # Keygate Gateway
//!
//! HTTP gateway with RS256 token issuance and validation, a TTL-bounded
//! revocation set and route protection by role or permission.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and authorization.
pub mod auth;
/// HTTP handlers and their payloads.
pub mod handlers;
/// JSON response envelope.
pub mod response;
mod server;

pub use auth::{
    AuthError, AuthGate, CurrentUser, IssuedToken, KeyMaterial, Requirement, RevocationStore,
    TokenClaims, TokenIssuer, TokenValidator, User, UserStore,
};
pub use response::ApiResponse;
pub use server::{Gateway, GatewayBuilder, GatewayState, load_catalog};

use keygate_core::Config;

/// Build and run the gateway until Ctrl-C.
///
/// # Errors
///
/// Returns error if startup fails or the server cannot bind.
pub async fn start(config: Config) -> Result<(), GatewayError> {
    let gateway = Gateway::new(config)?;
    gateway.run().await
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Startup auth failure: keys, catalog audit or stores.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
