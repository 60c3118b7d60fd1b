//! Token handlers: login, logout, activation resend and password reset requests.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::{Extension, Json};
use ivywhiz_core::auth::identity::Identity;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;
use crate::error::AppResult;
use crate::services::auth;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    #[serde(default)]
    pub email: String,
}

/// `POST /v1/tokens/authentication`
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(body) = body?;
    let (user, token) = auth::login(&state, &body.email, &body.password).await?;
    Ok(Json(json!({
        "message": "login successful",
        "user": user,
        "token": token,
    })))
}

/// `DELETE /v1/tokens`: invalidate every session of the caller.
pub async fn logout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> AppResult<Json<Value>> {
    let user = identity.require_authenticated()?;
    auth::logout(&state, user.id).await?;
    Ok(Json(json!({ "message": "you have been logged out" })))
}

/// `POST /v1/tokens/activation`
pub async fn resend_activation(
    State(state): State<AppState>,
    body: Result<Json<EmailRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let Json(body) = body?;
    auth::resend_activation(&state, &body.email).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "an email will be sent to you containing activation instructions"
        })),
    ))
}

/// `POST /v1/tokens/password-reset`
pub async fn request_password_reset(
    State(state): State<AppState>,
    body: Result<Json<EmailRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let Json(body) = body?;
    auth::request_password_reset(&state, &body.email).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "an email will be sent to you containing password reset instructions"
        })),
    ))
}
