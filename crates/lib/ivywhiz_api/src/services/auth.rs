//! Account and token flows behind the HTTP handlers.
//!
//! Every redemption (activation, password reset) deletes all outstanding
//! tokens of its scope for the user before reporting success.

use ivywhiz_core::auth::AuthError;
use ivywhiz_core::auth::password::{Credential, hash_password, verify_password};
use ivywhiz_core::auth::permissions::ADMIN_ACCESS;
use ivywhiz_core::mailer::{Message, Template};
use ivywhiz_core::models::{NewUser, Role, Token, TokenScope, User};
use ivywhiz_core::store::{StoreError, bounded};
use ivywhiz_core::validation::{
    Registration, Validator, validate_email, validate_password_plaintext, validate_registration,
};
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::AppState;
use crate::error::{AppError, AppResult};

/// Hash compared against when a login names an unknown email, so the response
/// takes as long as a real mismatch.
static DUMMY_CREDENTIAL: OnceCell<Credential> = OnceCell::const_new();

/// Signup request fields.
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub role: String,
}

fn failed(v: Validator) -> AppError {
    AppError::FailedValidation(v.into_errors())
}

async fn find_by_email(state: &AppState, email: &str) -> AppResult<Option<User>> {
    bounded(
        state.config.auth.store_timeout,
        state.users.get_by_email(email),
    )
    .await
    .map_err(|e| AuthError::from(e).into())
}

async fn save(state: &AppState, user: &mut User) -> AppResult<()> {
    bounded(state.config.auth.store_timeout, state.users.update(user))
        .await
        .map_err(|e| AuthError::from(e).into())
}

/// Hand a message to the mailer without holding up the response.
fn send_in_background(state: &AppState, message: Message) {
    let mailer = state.mailer.clone();
    state.background.spawn(async move {
        let recipient = message.recipient.clone();
        if let Err(e) = mailer.send(message).await {
            error!(%recipient, error = %e, "sending mail failed");
        }
    });
}

/// Create a tutor or student account and mail its activation token.
pub async fn register(state: &AppState, input: RegisterInput) -> AppResult<User> {
    let mut v = Validator::new();
    let role = validate_registration(
        &mut v,
        &Registration {
            email: &input.email,
            password: &input.password,
            first_name: &input.first_name,
            last_name: &input.last_name,
            username: &input.username,
            role: &input.role,
        },
    );
    let role = match role {
        Some(role) if v.is_valid() => role,
        _ => return Err(failed(v)),
    };

    let mut password = hash_password(input.password, state.config.auth.bcrypt_cost).await?;
    password.forget_plaintext();

    let inserted = bounded(
        state.config.auth.store_timeout,
        state.users.insert(NewUser {
            email: input.email,
            password,
            first_name: input.first_name,
            last_name: input.last_name,
            username: input.username,
            role,
            activated: false,
        }),
    )
    .await;
    let user = match inserted {
        Ok(user) => user,
        Err(StoreError::DuplicateEmail) => {
            return Err(AppError::field(
                "email",
                "a user with this email address already exists",
            ));
        }
        Err(e) => return Err(AuthError::from(e).into()),
    };

    state
        .permissions
        .add_for_user(user.id, &[role.permission_code()])
        .await?;

    let token = state
        .tokens
        .issue(user.id, state.config.auth.activation_ttl, TokenScope::Activation)
        .await?;
    send_in_background(
        state,
        Message {
            recipient: user.email.clone(),
            template: Template::Welcome,
            user_id: user.id,
            token: token.plaintext,
        },
    );

    info!(user_id = user.id, %role, "registered user");
    Ok(user)
}

/// Redeem an activation token.
pub async fn activate(state: &AppState, plaintext: &str) -> AppResult<User> {
    let mut v = Validator::new();
    state.tokens.validate_plaintext(plaintext, &mut v);
    if !v.is_valid() {
        return Err(failed(v));
    }

    let mut user = match state.tokens.resolve(TokenScope::Activation, plaintext).await {
        Ok(user) => user,
        Err(AuthError::TokenNotFound) => {
            return Err(AppError::field("token", "invalid or expired activation token"));
        }
        Err(e) => return Err(e.into()),
    };

    user.activated = true;
    save(state, &mut user).await?;
    state
        .tokens
        .delete_all_for_user(TokenScope::Activation, user.id)
        .await?;

    info!(user_id = user.id, "activated user");
    Ok(user)
}

/// Check credentials and issue an authentication token.
pub async fn login(state: &AppState, email: &str, password: &str) -> AppResult<(User, Token)> {
    let mut v = Validator::new();
    validate_email(&mut v, email);
    validate_password_plaintext(&mut v, password);
    if !v.is_valid() {
        return Err(failed(v));
    }

    let Some(user) = find_by_email(state, email).await? else {
        let cost = state.config.auth.bcrypt_cost;
        let dummy = DUMMY_CREDENTIAL
            .get_or_try_init(|| hash_password("not-a-real-password".into(), cost))
            .await?;
        verify_password(dummy.clone(), password.to_string()).await?;
        return Err(AuthError::CredentialMismatch.into());
    };

    if !verify_password(user.password.clone(), password.to_string()).await? {
        return Err(AuthError::CredentialMismatch.into());
    }
    if !user.activated {
        return Err(AuthError::InactiveAccount.into());
    }

    let token = state
        .tokens
        .issue(
            user.id,
            state.config.auth.authentication_ttl,
            TokenScope::Authentication,
        )
        .await?;
    info!(user_id = user.id, "user logged in");
    Ok((user, token))
}

/// Drop every authentication token the user holds.
pub async fn logout(state: &AppState, user_id: i64) -> AppResult<()> {
    state
        .tokens
        .delete_all_for_user(TokenScope::Authentication, user_id)
        .await?;
    info!(user_id, "user logged out");
    Ok(())
}

/// Issue and mail a fresh activation token.
pub async fn resend_activation(state: &AppState, email: &str) -> AppResult<()> {
    let mut v = Validator::new();
    validate_email(&mut v, email);
    if !v.is_valid() {
        return Err(failed(v));
    }

    let user = find_by_email(state, email)
        .await?
        .ok_or_else(|| AppError::field("email", "no matching email address found"))?;
    if user.activated {
        return Err(AppError::field("email", "user has already been activated"));
    }

    let token = state
        .tokens
        .issue(user.id, state.config.auth.activation_ttl, TokenScope::Activation)
        .await?;
    send_in_background(
        state,
        Message {
            recipient: user.email,
            template: Template::Activation,
            user_id: user.id,
            token: token.plaintext,
        },
    );
    Ok(())
}

/// Issue and mail a password-reset token to an activated account.
pub async fn request_password_reset(state: &AppState, email: &str) -> AppResult<()> {
    let mut v = Validator::new();
    validate_email(&mut v, email);
    if !v.is_valid() {
        return Err(failed(v));
    }

    let user = find_by_email(state, email)
        .await?
        .ok_or_else(|| AppError::field("email", "no matching email address found"))?;
    if !user.activated {
        return Err(AppError::field("email", "user account must be activated"));
    }

    let token = state
        .tokens
        .issue(
            user.id,
            state.config.auth.password_reset_ttl,
            TokenScope::PasswordReset,
        )
        .await?;
    send_in_background(
        state,
        Message {
            recipient: user.email,
            template: Template::PasswordReset,
            user_id: user.id,
            token: token.plaintext,
        },
    );
    Ok(())
}

/// Redeem a password-reset token, replacing the credential and signing the
/// user out everywhere.
pub async fn reset_password(state: &AppState, password: String, plaintext: &str) -> AppResult<User> {
    let mut v = Validator::new();
    validate_password_plaintext(&mut v, &password);
    state.tokens.validate_plaintext(plaintext, &mut v);
    if !v.is_valid() {
        return Err(failed(v));
    }

    let mut user = match state.tokens.resolve(TokenScope::PasswordReset, plaintext).await {
        Ok(user) => user,
        Err(AuthError::TokenNotFound) => {
            return Err(AppError::field(
                "token",
                "invalid or expired password reset token",
            ));
        }
        Err(e) => return Err(e.into()),
    };

    user.password = hash_password(password, state.config.auth.bcrypt_cost).await?;
    user.password.forget_plaintext();
    save(state, &mut user).await?;
    state
        .tokens
        .delete_all_for_user(TokenScope::PasswordReset, user.id)
        .await?;
    // Sessions opened with the old password end here too.
    state
        .tokens
        .delete_all_for_user(TokenScope::Authentication, user.id)
        .await?;

    info!(user_id = user.id, "password reset");
    Ok(user)
}

/// Fetch any user by id.
pub async fn find_user(state: &AppState, id: i64) -> AppResult<User> {
    bounded(state.config.auth.store_timeout, state.users.get_by_id(id))
        .await
        .map_err(AuthError::from)?
        .ok_or(AppError::NotFound)
}

/// Create an activated admin if no account uses `email` yet.
///
/// Returns the new admin, or `None` when the email is already taken.
pub async fn seed_admin(state: &AppState, email: &str, password: &str) -> AppResult<Option<User>> {
    let mut v = Validator::new();
    validate_email(&mut v, email);
    validate_password_plaintext(&mut v, password);
    if !v.is_valid() {
        return Err(failed(v));
    }

    if find_by_email(state, email).await?.is_some() {
        info!(%email, "admin account already present");
        return Ok(None);
    }

    let mut credential = hash_password(password.to_string(), state.config.auth.bcrypt_cost).await?;
    credential.forget_plaintext();
    let username = email.split('@').next().unwrap_or("admin").to_string();
    let user = bounded(
        state.config.auth.store_timeout,
        state.users.insert(NewUser {
            email: email.to_string(),
            password: credential,
            first_name: "Admin".into(),
            last_name: "User".into(),
            username,
            role: Role::Admin,
            activated: true,
        }),
    )
    .await
    .map_err(AuthError::from)?;
    state
        .permissions
        .add_for_user(user.id, &[ADMIN_ACCESS])
        .await?;

    info!(user_id = user.id, %email, "seeded admin account");
    Ok(Some(user))
}
