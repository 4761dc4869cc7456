//! Token claims.

use std::time::Duration;

use chrono::{DateTime, Utc};
use keygate_core::{PermissionId, PermissionSet};
use serde::{Deserialize, Serialize};

/// Claims carried by a Keygate access token.
///
/// `permissions` serializes as the bit-group map, e.g. `{"1": 129, "2": 1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User ID.
    pub id: String,
    /// User email.
    pub email: String,
    /// Role name.
    pub role: String,
    /// Granted permissions.
    pub permissions: PermissionSet,
    /// Not before (Unix seconds).
    pub nbf: i64,
    /// Expiration (Unix seconds).
    pub exp: i64,
}

impl TokenClaims {
    /// Whether the role name matches exactly.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }

    /// Whether the permission bit is set.
    #[must_use]
    pub fn has_permission(&self, id: PermissionId) -> bool {
        self.permissions.contains(id)
    }

    /// Expiration as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Time left until `exp`, zero once passed.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        u64::try_from(self.exp - now.timestamp())
            .map(Duration::from_secs)
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn claims() -> TokenClaims {
        TokenClaims {
            id: "usr_1".to_string(),
            email: "a@x.io".to_string(),
            role: "admin".to_string(),
            permissions: PermissionSet::encode([1, 8, 9]).unwrap(),
            nbf: 1_700_000_000,
            exp: 1_700_003_600,
        }
    }

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(claims()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "usr_1",
                "email": "a@x.io",
                "role": "admin",
                "permissions": { "1": 129, "2": 1 },
                "nbf": 1_700_000_000,
                "exp": 1_700_003_600,
            })
        );
    }

    #[test]
    fn test_checks() {
        let claims = claims();
        assert!(claims.has_role("admin"));
        assert!(!claims.has_role("Admin"));
        assert!(claims.has_permission(9));
        assert!(!claims.has_permission(2));
    }

    #[test]
    fn test_remaining() {
        let claims = claims();
        let now = DateTime::from_timestamp(1_700_003_000, 0).unwrap();
        assert_eq!(claims.remaining(now), Duration::from_secs(600));
        let later = DateTime::from_timestamp(1_700_004_000, 0).unwrap();
        assert_eq!(claims.remaining(later), Duration::ZERO);
    }
}
