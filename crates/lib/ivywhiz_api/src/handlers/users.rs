//! User account handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use ivywhiz_core::auth::identity::Identity;
use ivywhiz_core::models::{Role, User};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::AppState;
use crate::error::AppResult;
use crate::services::auth::{self, RegisterInput};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub token: String,
}

/// Trimmed user view for `/v1/users/me`.
#[derive(Debug, Serialize)]
pub struct Me {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for Me {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.full_name(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// `POST /v1/users`: sign up; the activation token goes out by mail.
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let Json(body) = body?;
    let user = auth::register(
        &state,
        RegisterInput {
            email: body.email,
            password: body.password,
            first_name: body.first_name,
            last_name: body.last_name,
            username: body.username,
            role: body.role,
        },
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "user": user }))))
}

/// `PUT /v1/users/activated`: redeem an activation token.
pub async fn activate(
    State(state): State<AppState>,
    body: Result<Json<ActivateRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(body) = body?;
    let user = auth::activate(&state, &body.token).await?;
    Ok(Json(json!({ "user": user })))
}

/// `PUT /v1/users/password`: redeem a password-reset token.
pub async fn reset_password(
    State(state): State<AppState>,
    body: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(body) = body?;
    auth::reset_password(&state, body.password, &body.token).await?;
    Ok(Json(json!({ "message": "your password was successfully reset" })))
}

/// `GET /v1/users/me`
pub async fn whoami(Extension(identity): Extension<Identity>) -> AppResult<Json<Value>> {
    let user = identity.require_authenticated()?;
    Ok(Json(json!({ "user": Me::from(user) })))
}

/// `GET /v1/users/me/permissions`: codes currently granted to the caller.
pub async fn my_permissions(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> AppResult<Json<Value>> {
    let user = identity.require_activated()?;
    let permissions = state.permissions.all_for_user(user.id).await?;
    Ok(Json(json!({ "permissions": permissions })))
}

/// `GET /v1/users/{id}`: admin lookup.
pub async fn show(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<Value>> {
    let user = auth::find_user(&state, id).await?;
    Ok(Json(json!({ "user": user })))
}
