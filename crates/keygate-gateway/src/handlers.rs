//! HTTP handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use chrono::{DateTime, Utc};
use keygate_core::{Permission, PermissionId};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::auth::{AuthError, CurrentUser, PublicUser};
use crate::response::ApiResponse;
use crate::server::GatewayState;

type Shared = State<Arc<GatewayState>>;

/// Login body.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    /// Account email.
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    /// Account password.
    #[validate(length(min = 1, message = "must not be empty"))]
    pub password: String,
}

/// Identity summary returned at login.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionUser {
    /// User ID.
    pub id: String,
    /// Email.
    pub email: String,
    /// Role name.
    pub role: String,
}

/// Login result.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Signed access token.
    pub access_token: String,
    /// Always `Bearer`.
    pub token_type: String,
    /// Expiry timestamp.
    pub expires_at: DateTime<Utc>,
    /// Seconds until expiry.
    pub expires_in: u64,
    /// The logged-in user.
    pub user: SessionUser,
}

/// The caller's own claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    /// User ID.
    pub id: String,
    /// Email.
    pub email: String,
    /// Role name.
    pub role: String,
    /// Granted permission IDs.
    pub permission_ids: Vec<PermissionId>,
    /// Granted permission names known to the catalog.
    pub permissions: Vec<String>,
    /// Token expiry.
    pub expires_at: DateTime<Utc>,
}

/// A role with its grants spelled out.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoleView {
    /// Role ID.
    pub id: u32,
    /// Role name.
    pub name: String,
    /// Granted permission names.
    pub permissions: Vec<String>,
}

pub(crate) async fn health() -> ApiResponse<serde_json::Value> {
    ApiResponse::success(
        "OK",
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}

pub(crate) async fn login(
    State(state): Shared,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<ApiResponse<LoginResponse>, AuthError> {
    let Json(request) = payload.map_err(|e| AuthError::BadRequest(e.body_text()))?;
    request
        .validate()
        .map_err(|e| AuthError::BadRequest(e.to_string()))?;

    let identity = state
        .users
        .authenticate(&request.email, &request.password, &state.catalog)
        .inspect_err(|e| tracing::info!(kind = e.kind(), "Login failed"))?;
    let issued = state.issuer.issue_for(&identity)?;

    if let Err(e) = state.users.update_last_login(&identity.user_id) {
        tracing::warn!(error = %e, user_id = %identity.user_id, "Failed to record login time");
    }
    tracing::info!(user_id = %identity.user_id, role = %identity.role, "Login succeeded");

    Ok(ApiResponse::success(
        "Login successful",
        LoginResponse {
            expires_in: issued.claims.remaining(Utc::now()).as_secs(),
            access_token: issued.token,
            token_type: "Bearer".to_string(),
            expires_at: issued.expires_at,
            user: SessionUser {
                id: identity.user_id,
                email: identity.email,
                role: identity.role,
            },
        },
    ))
}

pub(crate) async fn logout(
    State(state): Shared,
    user: CurrentUser,
) -> Result<ApiResponse<()>, AuthError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    state
        .revocation
        .revoke_claims(&user.token, &user.claims, &cancel)
        .await?;
    Ok(ApiResponse::success("Logged out", ()))
}

pub(crate) async fn me(State(state): Shared, user: CurrentUser) -> ApiResponse<MeResponse> {
    let claims = user.claims;
    let permissions = state
        .catalog
        .names_in(&claims.permissions)
        .into_iter()
        .map(str::to_string)
        .collect();

    ApiResponse::success(
        "OK",
        MeResponse {
            permission_ids: claims.permissions.ids().collect(),
            permissions,
            expires_at: claims.expires_at(),
            id: claims.id,
            email: claims.email,
            role: claims.role,
        },
    )
}

pub(crate) async fn list_permissions(State(state): Shared) -> ApiResponse<Vec<Permission>> {
    ApiResponse::success("OK", state.catalog.all().to_vec())
}

pub(crate) async fn list_users(
    State(state): Shared,
) -> Result<ApiResponse<Vec<PublicUser>>, AuthError> {
    let users = state.users.list()?.iter().map(|u| u.to_public()).collect();
    Ok(ApiResponse::success("OK", users))
}

pub(crate) async fn list_roles(State(state): Shared) -> ApiResponse<Vec<RoleView>> {
    let roles = state
        .catalog
        .roles()
        .iter()
        .map(|role| RoleView {
            id: role.id,
            name: role.name.clone(),
            permissions: role
                .permissions
                .iter()
                .filter_map(|id| state.catalog.by_id(*id).ok())
                .map(|p| p.name.clone())
                .collect(),
        })
        .collect();
    ApiResponse::success("OK", roles)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::Router;
    use axum::body::Body;
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use axum::http::{Request, StatusCode};
    use keygate_core::{Config, PermissionCatalog, perm};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::auth::keys::test_keys;
    use crate::auth::revocation::test_caches::FailingCache;
    use crate::auth::{AuthError, MemoryRevocationCache, RevocationStore, User, UserStore};
    use crate::server::{Gateway, GatewayBuilder};

    struct TestApp {
        gateway: Gateway,
        _dir: TempDir,
    }

    fn app_with(store: RevocationStore) -> TestApp {
        let dir = TempDir::new().unwrap();
        let users = UserStore::open(dir.path()).unwrap();
        users
            .create(&User::new("admin@x.io", "admin-pw", "admin").unwrap())
            .unwrap();
        users
            .create(&User::new("user@x.io", "user-pw", "user").unwrap())
            .unwrap();

        let gateway = GatewayBuilder::new()
            .with_config(Config::default())
            .with_keys(test_keys::keys())
            .with_catalog(PermissionCatalog::builtin())
            .with_revocation(store)
            .with_user_store(users)
            .build()
            .unwrap();
        TestApp { gateway, _dir: dir }
    }

    fn app() -> TestApp {
        app_with(RevocationStore::new(
            Arc::new(MemoryRevocationCache::new()),
            Duration::from_millis(500),
        ))
    }

    async fn send(
        router: Router,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                req = req.header(CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = router.oneshot(req.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn login_as(app: &TestApp, email: &str, password: &str) -> String {
        let (status, body) = send(
            app.gateway.router(),
            "POST",
            "/auth/login",
            None,
            Some(serde_json::json!({ "email": email, "password": password })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["data"]["access_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = app();
        let (status, body) = send(app.gateway.router(), "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "healthy");
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let app = app();
        let (status, body) = send(
            app.gateway.router(),
            "POST",
            "/auth/login",
            None,
            Some(serde_json::json!({ "email": "user@x.io", "password": "nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["data"], serde_json::Value::Null);

        let (status, _) = send(
            app.gateway.router(),
            "POST",
            "/auth/login",
            None,
            Some(serde_json::json!({ "email": "not-an-email", "password": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_me_reports_claims() {
        let app = app();
        let token = login_as(&app, "user@x.io", "user-pw").await;
        let (status, body) = send(app.gateway.router(), "GET", "/auth/me", Some(&token), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["role"], "user");
        assert_eq!(
            body["data"]["permissions"],
            serde_json::json!(["profile:read", "profile:update", "upload:create"])
        );
    }

    #[tokio::test]
    async fn test_permission_gate_end_to_end() {
        let app = app();
        let admin = login_as(&app, "admin@x.io", "admin-pw").await;
        let user = login_as(&app, "user@x.io", "user-pw").await;

        let (status, body) =
            send(app.gateway.router(), "GET", "/admin/permissions", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["data"].as_array().unwrap().len(),
            PermissionCatalog::builtin().all().len()
        );

        let (status, body) =
            send(app.gateway.router(), "GET", "/admin/permissions", Some(&user), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "Permission denied");
    }

    #[tokio::test]
    async fn test_list_users_hides_hashes() {
        let app = app();
        let admin = login_as(&app, "admin@x.io", "admin-pw").await;
        let (status, body) =
            send(app.gateway.router(), "GET", "/admin/users", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);

        let users = body["data"].as_array().unwrap();
        assert_eq!(users.len(), 2);
        assert!(users.iter().all(|u| u.get("password_hash").is_none()));

        let user = login_as(&app, "user@x.io", "user-pw").await;
        let (status, _) = send(app.gateway.router(), "GET", "/admin/users", Some(&user), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_role_gate_end_to_end() {
        let app = app();
        let user = login_as(&app, "user@x.io", "user-pw").await;
        let (status, _) = send(app.gateway.router(), "GET", "/admin/roles", Some(&user), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = login_as(&app, "admin@x.io", "admin-pw").await;
        let (status, body) =
            send(app.gateway.router(), "GET", "/admin/roles", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][1]["name"], "user");
    }

    #[tokio::test]
    async fn test_logout_then_reuse() {
        let app = app();
        let token = login_as(&app, "user@x.io", "user-pw").await;

        let (status, _) =
            send(app.gateway.router(), "POST", "/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(app.gateway.router(), "GET", "/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Unauthenticated");

        // A fresh login still works
        let fresh = login_as(&app, "user@x.io", "user-pw").await;
        let (status, _) = send(app.gateway.router(), "GET", "/auth/me", Some(&fresh), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let app = app();
        let issued = app
            .gateway
            .state()
            .issuer
            .issue("usr_x", "user@x.io", "user", &[perm::PROFILE_READ], Duration::from_secs(1))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2100)).await;
        let (status, _) = send(
            app.gateway.router(),
            "GET",
            "/auth/me",
            Some(&issued.token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(matches!(
            app.gateway.state().validator.verify(&issued.token),
            Err(AuthError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_cache_unavailable_fails_closed() {
        let app = app_with(RevocationStore::new(
            Arc::new(FailingCache),
            Duration::from_millis(500),
        ));
        let token = login_as(&app, "admin@x.io", "admin-pw").await;

        let (status, body) =
            send(app.gateway.router(), "GET", "/admin/permissions", Some(&token), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["data"], serde_json::Value::Null);
    }
}
