//! Authentication and authorization for the gateway.
//!
//! This module provides:
//! - RSA key material loaded once at startup
//! - Token issuance and validation (RS256 JWTs with bit-group permission claims)
//! - A TTL-bounded revocation store for logout
//! - The auth gate layer that protects routes by role or permission
//! - A small user store used as the identity source for login

mod claims;
mod gate;
mod issuer;
pub(crate) mod keys;
pub mod revocation;
mod users;
mod validator;

pub use claims::TokenClaims;
pub use gate::{
    AuthGate, AuthLayer, AuthMiddleware, CurrentUser, Requirement, authorize, extract_bearer,
};
pub use issuer::{IssuedToken, TokenIssuer};
pub use keys::{KeyMaterial, SIGNING_ALGORITHM, resolve_key_path};
pub use revocation::{
    CacheError, MemoryRevocationCache, RevocationCache, RevocationStore, SledRevocationCache,
};
pub use users::{Identity, PublicUser, User, UserStore, generate_password};
pub use validator::TokenValidator;

use keygate_core::{CatalogError, CodecError};
use thiserror::Error;

/// Authentication errors.
///
/// Token rejections are distinguishable by variant, but all of them render
/// the same public message; only logs see the specific kind.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No `Authorization` header on the request.
    #[error("Missing Authorization header")]
    MissingToken,

    /// Token could not be parsed.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// Signature did not verify against the public key.
    #[error("Invalid token signature")]
    SignatureInvalid,

    /// Token header names an algorithm other than RS256.
    #[error("Unexpected token algorithm: {0}")]
    AlgorithmMismatch(String),

    /// Token is past its `exp`.
    #[error("Token has expired")]
    Expired,

    /// Token is before its `nbf`.
    #[error("Token is not yet valid")]
    NotYetValid,

    /// Token was revoked by logout.
    #[error("Token has been revoked")]
    Revoked,

    /// The revocation cache could not answer.
    #[error("Revocation store unavailable: {0}")]
    RevocationStoreUnavailable(String),

    /// The request was cancelled while waiting on the revocation cache.
    #[error("Request cancelled")]
    Cancelled,

    /// Authenticated but lacking the required role or permission.
    #[error("Permission denied: {0}")]
    Forbidden(String),

    /// Encoded token exceeds the header-safe length cap.
    #[error("Token too large: {len} > {max} characters")]
    TokenTooLarge {
        /// Encoded length.
        len: usize,
        /// Configured cap.
        max: usize,
    },

    /// Issuer input was rejected.
    #[error("Invalid token request: {0}")]
    InvalidRequest(String),

    /// Signing failed.
    #[error("Token signing failed: {0}")]
    Signing(String),

    /// Key material could not be loaded.
    #[error("Key load failed: {0}")]
    KeyLoadFailed(String),

    /// Catalog lookup or audit failure.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Permission encoding failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Invalid login credentials.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The account is disabled.
    #[error("Account disabled")]
    AccountDisabled,

    /// User not found.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// User already exists.
    #[error("User already exists: {0}")]
    UserExists(String),

    /// Request body failed validation.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// Whether this error rejects the presented token (HTTP 401).
    #[must_use]
    pub const fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            Self::MissingToken
                | Self::Malformed(_)
                | Self::SignatureInvalid
                | Self::AlgorithmMismatch(_)
                | Self::Expired
                | Self::NotYetValid
                | Self::Revoked
        )
    }

    /// Short machine-readable kind, used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::Malformed(_) => "malformed",
            Self::SignatureInvalid => "signature_invalid",
            Self::AlgorithmMismatch(_) => "algorithm_mismatch",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::Revoked => "revoked",
            Self::RevocationStoreUnavailable(_) => "revocation_store_unavailable",
            Self::Cancelled => "cancelled",
            Self::Forbidden(_) => "forbidden",
            Self::TokenTooLarge { .. } => "token_too_large",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Signing(_) => "signing_failed",
            Self::KeyLoadFailed(_) => "key_load_failed",
            Self::Catalog(_) => "catalog",
            Self::Codec(_) => "codec",
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountDisabled => "account_disabled",
            Self::UserNotFound(_) => "user_not_found",
            Self::UserExists(_) => "user_exists",
            Self::BadRequest(_) => "bad_request",
            Self::Storage(_) => "storage",
        }
    }
}
