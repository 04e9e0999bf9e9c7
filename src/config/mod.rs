use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::executor::RetryPolicy;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Unset runs the engine on the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_token_expiry_secs: i64,
    pub frontend_url: String,
    /// Messaging gateway base URL. Unset logs deliveries instead of sending.
    pub gateway_url: Option<String>,
    pub gateway_token: Option<String>,
    pub dispatch_max_attempts: u32,
    pub dispatch_backoff_ms: u64,
    pub dispatch_timeout_secs: u64,
    pub clock_tick_secs: u64,
}

/// Read `key`, falling back to `default` when unset or unparsable.
fn var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read `key`, treating an empty value as unset.
fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            database_url: optional_var("DATABASE_URL"),
            database_max_connections: var_or("DATABASE_MAX_CONNECTIONS", 10),
            host: env::var("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: var_or("BACKEND_PORT", 3000),
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_token_expiry_secs: var_or("JWT_TOKEN_EXPIRY_SECS", 86_400),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "https://localhost:5173".to_string()),
            gateway_url: optional_var("GATEWAY_URL"),
            gateway_token: optional_var("GATEWAY_TOKEN"),
            dispatch_max_attempts: var_or("DISPATCH_MAX_ATTEMPTS", 3),
            dispatch_backoff_ms: var_or("DISPATCH_BACKOFF_MS", 500),
            dispatch_timeout_secs: var_or("DISPATCH_TIMEOUT_SECS", 15),
            clock_tick_secs: var_or("CLOCK_TICK_SECS", 60),
        })
    }

    /// Configuration for tests: in-memory store, log-only delivery.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            database_url: None,
            database_max_connections: 1,
            host: "127.0.0.1".to_string(),
            port: 0,
            jwt_secret: jwt_secret.to_string(),
            jwt_token_expiry_secs: 3_600,
            frontend_url: "http://localhost:5173".to_string(),
            gateway_url: None,
            gateway_token: None,
            dispatch_max_attempts: 3,
            dispatch_backoff_ms: 1,
            dispatch_timeout_secs: 2,
            clock_tick_secs: 60,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.dispatch_max_attempts.max(1),
            base_backoff: Duration::from_millis(self.dispatch_backoff_ms),
            dispatch_timeout: Duration::from_secs(self.dispatch_timeout_secs.max(1)),
        }
    }

    pub fn clock_tick(&self) -> Duration {
        Duration::from_secs(self.clock_tick_secs.max(1))
    }
}
