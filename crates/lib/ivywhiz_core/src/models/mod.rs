//! Domain models.

pub mod auth;

pub use auth::{NewUser, Role, Token, TokenRecord, TokenScope, User};
