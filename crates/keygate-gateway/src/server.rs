//! Gateway server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use keygate_core::{Config, PermissionCatalog, perm};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::GatewayError;
use crate::auth::{
    AuthError, AuthGate, KeyMaterial, RevocationStore, TokenIssuer, TokenValidator, UserStore,
};
use crate::handlers;
use crate::response::ApiResponse;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Immutable state built once at startup and shared by every handler.
#[derive(Debug)]
pub struct GatewayState {
    /// Loaded configuration.
    pub config: Config,
    /// Audited permission catalog.
    pub catalog: Arc<PermissionCatalog>,
    /// Token issuer.
    pub issuer: Arc<TokenIssuer>,
    /// Token validator.
    pub validator: Arc<TokenValidator>,
    /// Revocation set.
    pub revocation: Arc<RevocationStore>,
    /// Route protection.
    pub gate: AuthGate,
    /// Identity source.
    pub users: Arc<UserStore>,
}

/// Builder for a [`Gateway`].
///
/// Anything not supplied is created from the config. Components are built in
/// dependency order: keys, catalog (audited), revocation store, issuer and
/// validator, then the gate.
#[derive(Debug, Default)]
pub struct GatewayBuilder {
    config: Config,
    keys: Option<Arc<KeyMaterial>>,
    catalog: Option<PermissionCatalog>,
    revocation: Option<RevocationStore>,
    users: Option<UserStore>,
}

impl GatewayBuilder {
    /// Create a builder with default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use already-loaded key material.
    #[must_use]
    pub fn with_keys(mut self, keys: Arc<KeyMaterial>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Use a specific catalog instead of the configured one.
    #[must_use]
    pub fn with_catalog(mut self, catalog: PermissionCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Use a specific revocation store.
    #[must_use]
    pub fn with_revocation(mut self, store: RevocationStore) -> Self {
        self.revocation = Some(store);
        self
    }

    /// Use a specific user store.
    #[must_use]
    pub fn with_user_store(mut self, users: UserStore) -> Self {
        self.users = Some(users);
        self
    }

    /// Build the gateway.
    ///
    /// # Errors
    ///
    /// Returns error if keys fail to load, the catalog fails its audit, or a
    /// store cannot be opened. All of these are fatal at startup.
    pub fn build(self) -> Result<Gateway, GatewayError> {
        let config = self.config;

        let keys = match self.keys {
            Some(keys) => keys,
            None => Arc::new(KeyMaterial::load(&config)?),
        };

        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => load_catalog(&config)?,
        };
        catalog.self_audit().map_err(AuthError::from)?;
        tracing::info!(
            permissions = catalog.all().len(),
            roles = catalog.roles().len(),
            "Catalog audit passed"
        );

        let revocation = Arc::new(match self.revocation {
            Some(store) => store,
            None => RevocationStore::connect(&config.cache)?,
        });

        let issuer = Arc::new(TokenIssuer::new(keys.clone(), &config.auth));
        let validator = Arc::new(TokenValidator::new(
            keys,
            revocation.clone(),
            &config.auth,
        ));
        let gate = AuthGate::new(validator.clone());

        let users = match self.users {
            Some(users) => users,
            None => {
                let data_dir = config.data_dir();
                std::fs::create_dir_all(&data_dir).map_err(|e| {
                    GatewayError::Config(format!("Failed to create data dir: {e}"))
                })?;
                UserStore::open(&data_dir)?
            }
        };

        Ok(Gateway {
            state: Arc::new(GatewayState {
                config,
                catalog: Arc::new(catalog),
                issuer,
                validator,
                revocation,
                gate,
                users: Arc::new(users),
            }),
        })
    }
}

/// Load the configured catalog, or the built-in one.
///
/// # Errors
///
/// Returns error if the catalog file cannot be read or parsed.
pub fn load_catalog(config: &Config) -> Result<PermissionCatalog, GatewayError> {
    match &config.catalog_path {
        Some(path) => {
            let catalog = PermissionCatalog::load(path).map_err(AuthError::from)?;
            tracing::info!(path = %path.display(), "Loaded catalog");
            Ok(catalog)
        }
        None => Ok(PermissionCatalog::builtin()),
    }
}

/// Gateway server.
#[derive(Debug)]
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    /// Build a gateway from config alone.
    ///
    /// # Errors
    ///
    /// See [`GatewayBuilder::build`].
    pub fn new(config: Config) -> Result<Self, GatewayError> {
        GatewayBuilder::new().with_config(config).build()
    }

    /// Shared state.
    #[must_use]
    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// The HTTP router with all routes and layers applied.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = &self.state;
        let gate = &state.gate;

        let routes = Router::new()
            .route("/health", get(handlers::health))
            .route("/auth/login", post(handlers::login))
            .route(
                "/auth/logout",
                post(handlers::logout).route_layer(gate.authenticated()),
            )
            .route("/auth/me", get(handlers::me).route_layer(gate.authenticated()))
            .route(
                "/admin/permissions",
                get(handlers::list_permissions)
                    .route_layer(gate.require_permission(perm::PERMISSION_READ)),
            )
            .route(
                "/admin/users",
                get(handlers::list_users).route_layer(gate.require_permission(perm::USER_READ)),
            )
            .route(
                "/admin/roles",
                get(handlers::list_roles).route_layer(gate.require_role("admin")),
            )
            .with_state(state.clone());

        let timeout = Duration::from_secs(state.config.server.request_timeout_secs);
        let app = with_request_timeout(routes, timeout).layer(TraceLayer::new_for_http());

        if state.config.server.cors {
            app.layer(CorsLayer::permissive())
        } else {
            app
        }
    }

    /// Serve until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or binding fails.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let server = &self.state.config.server;
        let addr: SocketAddr = format!("{}:{}", server.bind_address, server.port)
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid address: {e}")))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Keygate listening on http://{}", addr);

        let shutdown = CancellationToken::new();
        let sweeper = tokio::spawn(sweep_revocations(
            self.state.revocation.clone(),
            SWEEP_INTERVAL,
            shutdown.clone(),
        ));

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await;

        shutdown.cancel();
        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "Revocation sweeper panicked");
        }
        served.map_err(|e| GatewayError::Server(e.to_string()))?;

        tracing::info!("Keygate stopped");
        Ok(())
    }
}

/// Bound every request by `timeout`, answering 408 in the JSON envelope.
fn with_request_timeout(router: Router, timeout: Duration) -> Router {
    router
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .layer(middleware::map_response(timeout_envelope))
}

async fn timeout_envelope(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        let body = ApiResponse::<()>::error("Request timed out");
        (StatusCode::REQUEST_TIMEOUT, Json(body)).into_response()
    } else {
        response
    }
}

/// Periodically drop expired revocations until `shutdown` fires.
async fn sweep_revocations(
    store: Arc<RevocationStore>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => match store.purge_expired(&shutdown).await {
                Ok(0) | Err(AuthError::Cancelled) => {}
                Ok(removed) => tracing::debug!(removed, "Purged expired revocations"),
                Err(e) => tracing::warn!(error = %e, "Revocation sweep failed"),
            },
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
