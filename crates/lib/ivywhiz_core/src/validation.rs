//! Field validation collecting one message per field.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::auth::Role;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email pattern compiles")
});

/// bcrypt only looks at the first 72 bytes.
pub const PASSWORD_MAX_BYTES: usize = 72;
pub const PASSWORD_MIN_BYTES: usize = 8;

/// Accumulates field errors. The first message recorded for a field wins.
#[derive(Debug, Default)]
pub struct Validator {
    errors: BTreeMap<String, String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    /// Record `message` for `field` unless `ok` holds.
    pub fn check(&mut self, ok: bool, field: &str, message: impl Into<String>) {
        if !ok {
            self.add_error(field, message);
        }
    }

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    pub fn into_errors(self) -> BTreeMap<String, String> {
        self.errors
    }
}

pub fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(EMAIL_RE.is_match(email), "email", "must be a valid email address");
}

pub fn validate_password_plaintext(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(
        password.len() >= PASSWORD_MIN_BYTES,
        "password",
        format!("must be at least {PASSWORD_MIN_BYTES} bytes long"),
    );
    v.check(
        password.len() <= PASSWORD_MAX_BYTES,
        "password",
        format!("must not be more than {PASSWORD_MAX_BYTES} bytes long"),
    );
}

/// Fields of a public signup request.
pub struct Registration<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub username: &'a str,
    pub role: &'a str,
}

/// Validate a public signup. Only tutor and student accounts may self-register.
pub fn validate_registration(v: &mut Validator, r: &Registration<'_>) -> Option<Role> {
    for (field, value) in [
        ("first_name", r.first_name),
        ("last_name", r.last_name),
        ("username", r.username),
    ] {
        v.check(!value.trim().is_empty(), field, "must be provided");
        v.check(
            value.len() <= 500,
            field,
            "must not be more than 500 bytes long",
        );
    }
    validate_email(v, r.email);
    validate_password_plaintext(v, r.password);

    match r.role.parse::<Role>() {
        Ok(role) if role != Role::Admin => Some(role),
        _ => {
            v.add_error("role", "must be tutor or student");
            None
        }
    }
}
