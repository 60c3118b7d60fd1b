//! API server configuration.

use std::str::FromStr;
use std::time::Duration;

use ivywhiz_core::auth::AuthConfig;
use tracing::warn;

use crate::middleware::rate_limit::RateLimitConfig;

/// `EnvFilter` directives used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,ivywhiz_api=debug,ivywhiz_core=debug";

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:4000").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Reported by the health check.
    pub environment: String,
    /// Origins allowed to make cross-origin requests.
    pub trusted_origins: Vec<String>,
    pub auth: AuthConfig,
    pub limiter: RateLimitConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4000".into(),
            database_url: "postgres://localhost:5432/ivywhiz".into(),
            environment: "development".into(),
            trusted_origins: Vec::new(),
            auth: AuthConfig::default(),
            limiter: RateLimitConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable               | Default                               |
    /// |------------------------|---------------------------------------|
    /// | `BIND_ADDR`            | `127.0.0.1:4000`                      |
    /// | `DATABASE_URL`         | `postgres://localhost:5432/ivywhiz`   |
    /// | `ENVIRONMENT`          | `development`                         |
    /// | `CORS_TRUSTED_ORIGINS` | empty (space separated list)          |
    /// | `LIMITER_ENABLED`      | `true`                                |
    /// | `LIMITER_RPS`          | `2`                                   |
    /// | `LIMITER_BURST`        | `4`                                   |
    /// | `LIMITER_TRUST_FORWARDED` | `true`                             |
    /// | `BCRYPT_COST`          | `12`                                  |
    /// | `STORE_TIMEOUT_SECS`   | `3`                                   |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut auth = defaults.auth;
        auth.bcrypt_cost = env_or("BCRYPT_COST", auth.bcrypt_cost);
        auth.store_timeout =
            Duration::from_secs(env_or("STORE_TIMEOUT_SECS", auth.store_timeout.as_secs()));

        let mut limiter = defaults.limiter;
        limiter.enabled = env_or("LIMITER_ENABLED", limiter.enabled);
        limiter.rps = env_or("LIMITER_RPS", limiter.rps);
        limiter.burst = env_or("LIMITER_BURST", limiter.burst);
        limiter.trust_forwarded = env_or("LIMITER_TRUST_FORWARDED", limiter.trust_forwarded);

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            trusted_origins: std::env::var("CORS_TRUSTED_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or_default(),
            auth,
            limiter,
        }
    }
}

/// Split a space separated origin list.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring unparsable environment value");
            default
        }),
        Err(_) => default,
    }
}
