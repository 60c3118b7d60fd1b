//! # ivywhiz_api
//!
//! HTTP API library for Ivywhiz.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get, post, put};
use ivywhiz_core::auth::permissions::{ADMIN_ACCESS, PermissionRegistry};
use ivywhiz_core::auth::tokens::TokenEngine;
use ivywhiz_core::mailer::Mailer;
use ivywhiz_core::store::{PermissionStore, TokenStore, UserStore};
use sqlx::PgPool;
use tokio_util::task::TaskTracker;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{Span, info_span};

use crate::config::ApiConfig;
use crate::handlers::{health, tokens, users};
use crate::middleware::auth::{
    PermissionGate, authenticate, require_activated, require_authenticated, require_permission,
};
use crate::middleware::rate_limit::{RateLimiter, rate_limit};
use crate::middleware::{cors, recover};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub users: Arc<dyn UserStore>,
    pub tokens: TokenEngine,
    pub permissions: PermissionRegistry,
    pub mailer: Arc<dyn Mailer>,
    pub limiter: RateLimiter,
    /// Mail sends and other work that outlives its request.
    pub background: TaskTracker,
}

impl AppState {
    /// Wire the auth core over one store that backs users, tokens and grants.
    pub fn new<S>(config: ApiConfig, store: Arc<S>, mailer: Arc<dyn Mailer>) -> Self
    where
        S: UserStore + TokenStore + PermissionStore + 'static,
    {
        let timeout = config.auth.store_timeout;
        let tokens = TokenEngine::new(
            store.clone(),
            store.clone(),
            config.auth.token_entropy_bytes,
            timeout,
        );
        let permissions = PermissionRegistry::new(store.clone(), timeout);
        let limiter = RateLimiter::new(config.limiter.clone());
        Self {
            config,
            users: store,
            tokens,
            permissions,
            mailer,
            limiter,
            background: TaskTracker::new(),
        }
    }
}

/// Run embedded database migrations.
///
/// Delegates to `ivywhiz_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    ivywhiz_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes, the middleware chain and shared state.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/v1/healthcheck", get(health::healthcheck))
        .route("/v1/users", post(users::register))
        .route("/v1/users/activated", put(users::activate))
        .route("/v1/users/password", put(users::reset_password))
        .route("/v1/tokens/authentication", post(tokens::login))
        .route("/v1/tokens/activation", post(tokens::resend_activation))
        .route("/v1/tokens/password-reset", post(tokens::request_password_reset));

    let authenticated = Router::new()
        .route("/v1/users/me", get(users::whoami))
        .route("/v1/tokens", delete(tokens::logout))
        .route_layer(from_fn(require_authenticated));

    let activated = Router::new()
        .route("/v1/users/me/permissions", get(users::my_permissions))
        .route_layer(from_fn(require_activated));

    let admin = Router::new()
        .route("/v1/users/{id}", get(users::show))
        .route_layer(from_fn_with_state(
            PermissionGate::new(state.permissions.clone(), ADMIN_ACCESS),
            require_permission,
        ));

    let routes = Router::new()
        .merge(public)
        .merge(authenticated)
        .merge(activated)
        .merge(admin);
    layered(routes, state)
}

/// Wrap `routes` in the request chain shared by every endpoint.
///
/// Outermost first: trace span, panic recovery, CORS, rate limit,
/// authenticate. Unmatched paths get the JSON 404.
pub fn layered(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .fallback(handlers::not_found)
        .layer(from_fn_with_state(state.clone(), authenticate))
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(cors::cors_layer(&state.config.trusted_origins))
        .layer(CatchPanicLayer::custom(recover::handle_panic))
        .layer(TraceLayer::new_for_http().make_span_with(make_span))
        .with_state(state)
}

/// Request span. Everything logged while handling the request, 500 details
/// included, carries its method and URI.
fn make_span(request: &Request<Body>) -> Span {
    info_span!("http-request", method = %request.method(), uri = %request.uri())
}
