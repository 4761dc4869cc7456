//! Token validation.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::Validation;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use keygate_core::FailPolicy;
use keygate_core::config::AuthConfig;
use tokio_util::sync::CancellationToken;

use super::{AuthError, KeyMaterial, RevocationStore, SIGNING_ALGORITHM, TokenClaims};

/// Verifies signature, validity window and revocation status of tokens.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    keys: Arc<KeyMaterial>,
    revocation: Arc<RevocationStore>,
    validation: Validation,
    max_token_length: usize,
}

impl TokenValidator {
    /// Create a validator. Only RS256 is accepted; `exp` and `nbf` are required.
    #[must_use]
    pub fn new(
        keys: Arc<KeyMaterial>,
        revocation: Arc<RevocationStore>,
        config: &AuthConfig,
    ) -> Self {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.set_required_spec_claims(&["exp", "nbf"]);
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.leeway = config.leeway();

        Self {
            keys,
            revocation,
            validation,
            max_token_length: config.max_token_length,
        }
    }

    /// The revocation store consulted by [`TokenValidator::validate`].
    #[must_use]
    pub fn revocation(&self) -> &Arc<RevocationStore> {
        &self.revocation
    }

    /// Check signature, algorithm and the `nbf`/`exp` window.
    ///
    /// Does not consult the revocation store.
    ///
    /// # Errors
    ///
    /// Returns the rejection kind: `Malformed`, `AlgorithmMismatch`,
    /// `SignatureInvalid`, `Expired` or `NotYetValid`.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Malformed("empty token".to_string()));
        }
        if token.len() > self.max_token_length {
            return Err(AuthError::Malformed(format!(
                "token exceeds {} characters",
                self.max_token_length
            )));
        }

        // Checked before parsing so `alg: none` is reported as a mismatch
        // rather than an unparsable header.
        if let Some(alg) = header_algorithm(token) {
            if alg != "RS256" {
                return Err(AuthError::AlgorithmMismatch(alg));
            }
        }

        self.keys
            .verify::<TokenClaims>(token, &self.validation)
            .map(|data| data.claims)
            .map_err(classify)
    }

    /// Full validation: [`TokenValidator::verify`] then the revocation check.
    ///
    /// # Errors
    ///
    /// Returns `Revoked` for revoked tokens. When the store cannot answer,
    /// returns `RevocationStoreUnavailable` unless the fail policy is open.
    pub async fn validate(
        &self,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<TokenClaims, AuthError> {
        let claims = self.verify(token)?;

        match self.revocation.contains(token, cancel).await {
            Ok(false) => Ok(claims),
            Ok(true) => Err(AuthError::Revoked),
            Err(AuthError::RevocationStoreUnavailable(reason))
                if self.revocation.policy() == FailPolicy::Open =>
            {
                tracing::warn!(
                    %reason,
                    user_id = %claims.id,
                    "Revocation store unavailable, admitting token"
                );
                Ok(claims)
            }
            Err(e) => Err(e),
        }
    }
}

fn classify(err: JwtError) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
        ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::MissingAlgorithm => AuthError::AlgorithmMismatch(err.to_string()),
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::ImmatureSignature => AuthError::NotYetValid,
        _ => AuthError::Malformed(err.to_string()),
    }
}

/// The raw `alg` header field, if the header segment decodes.
fn header_algorithm(token: &str) -> Option<String> {
    let header = token.split('.').next()?;
    let bytes = URL_SAFE_NO_PAD.decode(header).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("alg")?.as_str().map(str::to_string)
}
