//! Request middleware, outermost first: panic recovery, CORS, rate limiting,
//! authentication and the per-route requirement gates.

pub mod auth;
pub mod cors;
pub mod rate_limit;
pub mod recover;
