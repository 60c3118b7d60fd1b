//! Authentication middleware: bearer token resolution and requirement gates.
//!
//! [`authenticate`] runs on every request and binds an [`Identity`] into the
//! request extensions. The `require_*` gates are attached per route group with
//! `route_layer` and read that identity back.

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::{AUTHORIZATION, VARY};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ivywhiz_core::auth::AuthError;
use ivywhiz_core::auth::identity::Identity;
use ivywhiz_core::auth::permissions::PermissionRegistry;
use ivywhiz_core::models::TokenScope;
use ivywhiz_core::validation::Validator;

use crate::AppState;
use crate::error::AppError;

/// Extract the credential from `Bearer <token>`.
///
/// The header must be exactly two space-separated parts with the literal
/// scheme `Bearer`.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => Some(token),
        _ => None,
    }
}

async fn resolve_identity(state: &AppState, header: Option<&HeaderValue>) -> Result<Identity, AuthError> {
    let Some(header) = header.filter(|h| !h.is_empty()) else {
        return Ok(Identity::Anonymous);
    };
    let token = header
        .to_str()
        .ok()
        .and_then(parse_bearer)
        .ok_or(AuthError::InvalidToken)?;

    let mut v = Validator::new();
    state.tokens.validate_plaintext(token, &mut v);
    if !v.is_valid() {
        return Err(AuthError::InvalidToken);
    }

    match state.tokens.resolve(TokenScope::Authentication, token).await {
        Ok(user) => Ok(Identity::Authenticated(user)),
        Err(AuthError::TokenNotFound) => Err(AuthError::InvalidToken),
        Err(e) => Err(e),
    }
}

/// Axum middleware: resolve `Authorization: Bearer <token>` to an [`Identity`].
///
/// A missing header yields [`Identity::Anonymous`]; a present but unusable one
/// is rejected with 401. Responses always vary on `Authorization`.
pub async fn authenticate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let identity = resolve_identity(&state, request.headers().get(AUTHORIZATION)).await;
    let mut response = match identity {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => AppError::from(e).into_response(),
    };
    response
        .headers_mut()
        .append(VARY, HeaderValue::from_static("Authorization"));
    response
}

fn identity_of(request: &Request) -> Identity {
    request
        .extensions()
        .get::<Identity>()
        .cloned()
        .unwrap_or_default()
}

pub async fn require_authenticated(request: Request, next: Next) -> Result<Response, AppError> {
    identity_of(&request).require_authenticated()?;
    Ok(next.run(request).await)
}

pub async fn require_activated(request: Request, next: Next) -> Result<Response, AppError> {
    identity_of(&request).require_activated()?;
    Ok(next.run(request).await)
}

/// State for [`require_permission`]: which code a route group needs.
#[derive(Clone)]
pub struct PermissionGate {
    pub registry: PermissionRegistry,
    pub code: &'static str,
}

impl PermissionGate {
    pub fn new(registry: PermissionRegistry, code: &'static str) -> Self {
        Self { registry, code }
    }
}

/// Activated and holding the gate's permission code, checked fresh each request.
pub async fn require_permission(
    State(gate): State<PermissionGate>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    identity_of(&request)
        .require_permission(&gate.registry, gate.code)
        .await?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_needs_exact_scheme_and_two_parts() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("bearer abc"), None);
        assert_eq!(parse_bearer("Bearer"), None);
        assert_eq!(parse_bearer("Bearer a b"), None);
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("Bearer  abc"), None);
    }
}
