//! Auth gate middleware.
//!
//! Per request: extract the bearer token, validate it (including the
//! revocation check), attach the claims to the request, then enforce the
//! route's role or permission requirement.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{FromRequestParts, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use keygate_core::PermissionId;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};

use super::{AuthError, TokenClaims, TokenValidator};

/// What a route demands beyond a valid token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Exact role name match.
    Role(String),
    /// Permission bit must be set.
    Permission(PermissionId),
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Role(role) => write!(f, "role {role}"),
            Self::Permission(id) => write!(f, "permission {id}"),
        }
    }
}

/// Check claims against a requirement.
///
/// # Errors
///
/// Returns `Forbidden` if the role differs or the permission bit is unset.
pub fn authorize(claims: &TokenClaims, requirement: &Requirement) -> Result<(), AuthError> {
    let allowed = match requirement {
        Requirement::Role(role) => claims.has_role(role),
        Requirement::Permission(id) => claims.has_permission(*id),
    };
    if allowed {
        Ok(())
    } else {
        Err(AuthError::Forbidden(format!("requires {requirement}")))
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively.
///
/// # Errors
///
/// Returns `MissingToken` when the header is absent and `Malformed` when it
/// is not a bearer credential.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::Malformed("non-ASCII Authorization header".to_string()))?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| AuthError::Malformed("expected Bearer scheme".to_string()))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::Malformed("expected Bearer scheme".to_string()));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::Malformed("empty bearer token".to_string()));
    }
    Ok(token)
}

/// The authenticated caller, attached to the request by the gate.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// Validated claims.
    pub claims: TokenClaims,
    /// The raw token, kept for logout.
    pub token: String,
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}

/// Builds layers that protect routes.
#[derive(Debug, Clone)]
pub struct AuthGate {
    validator: Arc<TokenValidator>,
}

impl AuthGate {
    /// Create a gate around a validator.
    #[must_use]
    pub fn new(validator: Arc<TokenValidator>) -> Self {
        Self { validator }
    }

    /// Layer that only requires a valid token.
    #[must_use]
    pub fn authenticated(&self) -> AuthLayer {
        AuthLayer {
            gate: self.clone(),
            requirement: None,
        }
    }

    /// Layer that requires an exact role.
    #[must_use]
    pub fn require_role(&self, role: impl Into<String>) -> AuthLayer {
        self.require(Requirement::Role(role.into()))
    }

    /// Layer that requires a permission bit.
    #[must_use]
    pub fn require_permission(&self, id: PermissionId) -> AuthLayer {
        self.require(Requirement::Permission(id))
    }

    fn require(&self, requirement: Requirement) -> AuthLayer {
        AuthLayer {
            gate: self.clone(),
            requirement: Some(Arc::new(requirement)),
        }
    }

    /// Run the gate against request headers.
    ///
    /// # Errors
    ///
    /// Returns the token rejection, `RevocationStoreUnavailable`, or
    /// `Forbidden` when the requirement is not met.
    pub async fn check(
        &self,
        headers: &HeaderMap,
        requirement: Option<&Requirement>,
        cancel: &CancellationToken,
    ) -> Result<CurrentUser, AuthError> {
        let token = extract_bearer(headers)?;
        let claims = self.validator.validate(token, cancel).await?;

        if let Some(requirement) = requirement {
            authorize(&claims, requirement).inspect_err(|_| {
                tracing::warn!(
                    user_id = %claims.id,
                    role = %claims.role,
                    %requirement,
                    "Access denied"
                );
            })?;
        }

        Ok(CurrentUser {
            token: token.to_string(),
            claims,
        })
    }
}

/// Tower layer produced by [`AuthGate`].
#[derive(Debug, Clone)]
pub struct AuthLayer {
    gate: AuthGate,
    requirement: Option<Arc<Requirement>>,
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            gate: self.gate.clone(),
            requirement: self.requirement.clone(),
        }
    }
}

/// Service wrapping a protected handler.
#[derive(Debug, Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    gate: AuthGate,
    requirement: Option<Arc<Requirement>>,
}

impl<S> Service<Request<Body>> for AuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let gate = self.gate.clone();
        let requirement = self.requirement.clone();
        // The ready inner service goes with this call; the clone stays for the next.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            // Dropping the request future cancels pending revocation lookups.
            let cancel = CancellationToken::new();
            let _guard = cancel.clone().drop_guard();

            match gate
                .check(req.headers(), requirement.as_deref(), &cancel)
                .await
            {
                Ok(user) => {
                    tracing::debug!(user_id = %user.claims.id, path = %req.uri().path(), "Authenticated");
                    req.extensions_mut().insert(user);
                    inner.call(req).await
                }
                Err(e) => Ok(e.into_response()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::Router;
    use axum::http::{HeaderValue, StatusCode};
    use axum::routing::get;
    use keygate_core::config::AuthConfig;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    use super::*;
    use crate::auth::keys::test_keys;
    use crate::auth::revocation::test_caches::FailingCache;
    use crate::auth::{MemoryRevocationCache, RevocationCache, RevocationStore, TokenIssuer};

    struct Fixture {
        issuer: TokenIssuer,
        gate: AuthGate,
        store: Arc<RevocationStore>,
    }

    fn fixture_with(cache: Arc<dyn RevocationCache>) -> Fixture {
        let config = AuthConfig::default();
        let keys = test_keys::keys();
        let store = Arc::new(RevocationStore::new(cache, Duration::from_millis(500)));
        let validator = Arc::new(TokenValidator::new(keys.clone(), store.clone(), &config));
        Fixture {
            issuer: TokenIssuer::new(keys, &config),
            gate: AuthGate::new(validator),
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryRevocationCache::new()))
    }

    impl Fixture {
        fn token(&self, role: &str, ids: &[PermissionId]) -> String {
            self.issuer
                .issue("usr_1", "a@x.io", role, ids, Duration::from_secs(3600))
                .unwrap()
                .token
        }

        fn app(&self) -> Router {
            async fn whoami(user: CurrentUser) -> String {
                format!("{}:{}", user.claims.id, user.claims.role)
            }

            Router::new()
                .route("/open", get(whoami).route_layer(self.gate.authenticated()))
                .route("/perm8", get(whoami).route_layer(self.gate.require_permission(8)))
                .route("/perm2", get(whoami).route_layer(self.gate.require_permission(2)))
                .route("/admin", get(whoami).route_layer(self.gate.require_role("admin")))
                .route("/user", get(whoami).route_layer(self.gate.require_role("user")))
        }
    }

    async fn call(app: Router, path: &str, token: Option<&str>) -> (StatusCode, String) {
        let mut req = axum::http::Request::builder().uri(path);
        if let Some(token) = token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[test]
    fn test_extract_bearer() {
        let mut headers = HeaderMap::new();
        assert!(matches!(extract_bearer(&headers), Err(AuthError::MissingToken)));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer(&headers).unwrap(), "abc.def.ghi");

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(extract_bearer(&headers).unwrap(), "abc");

        for bad in ["Basic dXNlcjpwYXNz", "Bearer", "Bearer   ", "abc"] {
            headers.insert(AUTHORIZATION, HeaderValue::from_static(bad));
            assert!(matches!(extract_bearer(&headers), Err(AuthError::Malformed(_))));
        }
    }

    #[test]
    fn test_authorize() {
        let f = fixture();
        let token = f.token("user", &[1]);
        let claims = f.gate.validator.verify(&token).unwrap();

        authorize(&claims, &Requirement::Role("user".into())).unwrap();
        authorize(&claims, &Requirement::Permission(1)).unwrap();
        assert!(matches!(
            authorize(&claims, &Requirement::Role("admin".into())),
            Err(AuthError::Forbidden(_))
        ));
        assert!(matches!(
            authorize(&claims, &Requirement::Permission(2)),
            Err(AuthError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_header_is_401() {
        let f = fixture();
        let (status, body) = call(f.app(), "/open", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "success": false, "message": "Unauthenticated", "data": null })
        );
    }

    #[tokio::test]
    async fn test_garbage_token_is_401() {
        let f = fixture();
        let (status, _) = call(f.app(), "/open", Some("not-a-token")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler_with_claims() {
        let f = fixture();
        let token = f.token("user", &[13]);
        let (status, body) = call(f.app(), "/open", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "usr_1:user");
    }

    #[tokio::test]
    async fn test_permission_requirements() {
        let f = fixture();
        let token = f.token("admin", &[1, 8, 9]);
        assert_eq!(call(f.app(), "/perm8", Some(&token)).await.0, StatusCode::OK);

        let token = f.token("admin", &[1]);
        assert_eq!(
            call(f.app(), "/perm2", Some(&token)).await.0,
            StatusCode::FORBIDDEN
        );
    }

    #[tokio::test]
    async fn test_role_requirements() {
        let f = fixture();
        let token = f.token("user", &[13]);
        assert_eq!(
            call(f.app(), "/admin", Some(&token)).await.0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(call(f.app(), "/user", Some(&token)).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_revoked_token_is_401() {
        let f = fixture();
        let token = f.token("user", &[13]);
        f.store
            .revoke(&token, Duration::from_secs(3600), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            call(f.app(), "/open", Some(&token)).await.0,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_store_down_fails_closed() {
        let f = fixture_with(Arc::new(FailingCache));
        let token = f.token("admin", &[1, 8, 9]);
        let (status, body) = call(f.app(), "/perm8", Some(&token)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.contains("usr_1"));
    }

    #[tokio::test]
    async fn test_store_down_fail_open() {
        let config = AuthConfig::default();
        let keys = test_keys::keys();
        let store = Arc::new(
            RevocationStore::new(Arc::new(FailingCache), Duration::from_millis(500))
                .with_policy(keygate_core::FailPolicy::Open),
        );
        let f = Fixture {
            issuer: TokenIssuer::new(keys.clone(), &config),
            gate: AuthGate::new(Arc::new(TokenValidator::new(keys, store.clone(), &config))),
            store,
        };
        let token = f.token("admin", &[8]);
        assert_eq!(call(f.app(), "/perm8", Some(&token)).await.0, StatusCode::OK);
    }
}
