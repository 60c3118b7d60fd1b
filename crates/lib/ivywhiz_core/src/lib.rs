//! # ivywhiz_core
//!
//! Core authentication and authorization logic for Ivywhiz.

pub mod auth;
pub mod mailer;
pub mod migrate;
pub mod models;
pub mod store;
pub mod validation;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
