//! Token issuance.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keygate_core::config::AuthConfig;
use keygate_core::{PermissionId, PermissionSet};
use serde::{Deserialize, Serialize};

use super::users::Identity;
use super::{AuthError, KeyMaterial, TokenClaims};

/// A freshly signed access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    /// Compact JWT.
    pub token: String,
    /// When the token stops validating.
    pub expires_at: DateTime<Utc>,
    /// Claims that were signed.
    pub claims: TokenClaims,
}

/// Mints RS256 access tokens.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    keys: Arc<KeyMaterial>,
    default_ttl: Duration,
    max_token_length: usize,
}

impl TokenIssuer {
    /// Create an issuer using the configured TTL and length cap.
    #[must_use]
    pub fn new(keys: Arc<KeyMaterial>, config: &AuthConfig) -> Self {
        Self {
            keys,
            default_ttl: config.token_ttl(),
            max_token_length: config.max_token_length,
        }
    }

    /// Default token lifetime.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Issue a token for the given identity fields.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if user ID, email, role or permissions are empty, or `ttl` is zero
    /// - `Codec` if a permission ID is zero
    /// - `TokenTooLarge` if the encoded token exceeds the length cap
    pub fn issue(
        &self,
        user_id: &str,
        email: &str,
        role: &str,
        permission_ids: &[PermissionId],
        ttl: Duration,
    ) -> Result<IssuedToken, AuthError> {
        if user_id.is_empty() {
            return Err(AuthError::InvalidRequest("user ID is empty".to_string()));
        }
        if email.is_empty() {
            return Err(AuthError::InvalidRequest("email is empty".to_string()));
        }
        if role.is_empty() {
            return Err(AuthError::InvalidRequest("role is empty".to_string()));
        }
        if permission_ids.is_empty() {
            return Err(AuthError::InvalidRequest(
                "permission list is empty".to_string(),
            ));
        }
        if ttl.is_zero() {
            return Err(AuthError::InvalidRequest("ttl must be positive".to_string()));
        }

        let now = Utc::now();
        let lifetime = chrono::Duration::from_std(ttl)
            .map_err(|e| AuthError::InvalidRequest(format!("ttl out of range: {e}")))?;
        let expires = now
            .checked_add_signed(lifetime)
            .ok_or_else(|| AuthError::InvalidRequest("ttl out of range".to_string()))?;

        let claims = TokenClaims {
            id: user_id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            permissions: PermissionSet::encode(permission_ids.iter().copied())?,
            nbf: now.timestamp(),
            exp: expires.timestamp(),
        };

        let token = self.sign(&claims)?;
        tracing::debug!(
            user_id,
            role,
            permissions = claims.permissions.len(),
            len = token.len(),
            "Issued access token"
        );

        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at(),
            claims,
        })
    }

    /// Issue a token for an authenticated identity with the default TTL.
    ///
    /// # Errors
    ///
    /// See [`TokenIssuer::issue`].
    pub fn issue_for(&self, identity: &Identity) -> Result<IssuedToken, AuthError> {
        self.issue(
            &identity.user_id,
            &identity.email,
            &identity.role,
            &identity.permission_ids,
            self.default_ttl,
        )
    }

    /// Sign prepared claims, enforcing the length cap.
    pub(crate) fn sign(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        let token = self
            .keys
            .sign(claims)
            .map_err(|e| AuthError::Signing(e.to_string()))?;

        if token.len() > self.max_token_length {
            return Err(AuthError::TokenTooLarge {
                len: token.len(),
                max: self.max_token_length,
            });
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::keys::test_keys;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(test_keys::keys(), &AuthConfig::default())
    }

    #[test]
    fn test_issue_sets_window() {
        let before = Utc::now().timestamp();
        let issued = issuer()
            .issue("usr_1", "a@x.io", "admin", &[1, 8, 9], Duration::from_secs(3600))
            .unwrap();
        let after = Utc::now().timestamp();

        assert!(issued.claims.nbf >= before && issued.claims.nbf <= after);
        assert_eq!(issued.claims.exp - issued.claims.nbf, 3600);
        assert_eq!(issued.expires_at.timestamp(), issued.claims.exp);
        assert_eq!(issued.token.split('.').count(), 3);
    }

    #[test]
    fn test_issue_rejects_empty_inputs() {
        let issuer = issuer();
        let ttl = Duration::from_secs(60);
        for result in [
            issuer.issue("", "a@x.io", "admin", &[1], ttl),
            issuer.issue("usr_1", "", "admin", &[1], ttl),
            issuer.issue("usr_1", "a@x.io", "", &[1], ttl),
            issuer.issue("usr_1", "a@x.io", "admin", &[], ttl),
            issuer.issue("usr_1", "a@x.io", "admin", &[1], Duration::ZERO),
        ] {
            assert!(matches!(result, Err(AuthError::InvalidRequest(_))));
        }
    }

    #[test]
    fn test_issue_rejects_zero_id() {
        let result = issuer().issue("usr_1", "a@x.io", "admin", &[0, 1], Duration::from_secs(60));
        assert!(matches!(result, Err(AuthError::Codec(_))));
    }

    #[test]
    fn test_token_too_large() {
        let config = AuthConfig::builder().max_token_length(200).build();
        let issuer = TokenIssuer::new(test_keys::keys(), &config);
        let result = issuer.issue("usr_1", "a@x.io", "admin", &[1], Duration::from_secs(60));
        assert!(matches!(
            result,
            Err(AuthError::TokenTooLarge { max: 200, .. })
        ));
    }

    #[test]
    fn test_issue_rejects_unrepresentable_ttl() {
        let huge = Duration::from_secs(10_000_000_000_000);
        let result = issuer().issue("usr_1", "a@x.io", "admin", &[1], huge);
        assert!(matches!(result, Err(AuthError::InvalidRequest(_))));

        let config = AuthConfig::builder()
            .token_ttl_secs(10_000_000_000_000)
            .build();
        let identity = Identity {
            user_id: "usr_1".to_string(),
            email: "a@x.io".to_string(),
            role: "admin".to_string(),
            permission_ids: vec![1],
        };
        let result = TokenIssuer::new(test_keys::keys(), &config).issue_for(&identity);
        assert!(matches!(result, Err(AuthError::InvalidRequest(_))));
    }

    #[test]
    fn test_issue_for_identity() {
        let identity = Identity {
            user_id: "usr_2".to_string(),
            email: "u@x.io".to_string(),
            role: "user".to_string(),
            permission_ids: vec![13, 14, 15],
        };
        let issued = issuer().issue_for(&identity).unwrap();
        assert_eq!(issued.claims.role, "user");
        assert_eq!(issued.claims.permissions.ids().collect::<Vec<_>>(), vec![13, 14, 15]);
        assert_eq!(issued.claims.exp - issued.claims.nbf, 3600);
    }
}
