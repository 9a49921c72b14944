// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Filament engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL.
    pub database_url: String,
    /// HTTP port for the ingress surface.
    pub http_port: u16,
    /// URL this worker reaches (a) worker(s) at for the cascade trigger.
    pub self_url: String,
    /// Shared secret expected on internal trigger requests.
    pub trigger_secret: String,
    /// Locks older than this are reclaimed by the sweeper.
    pub lock_stale_after: Duration,
    /// Steps stuck in `processing` longer than this are failed.
    pub step_stale_after: Duration,
    /// Timeout for one outbound dispatcher call.
    pub dispatch_timeout: Duration,
    /// Attempts to acquire a chain lock before deferring the candidate.
    pub lock_retry_attempts: u32,
    /// Base delay between lock attempts (linear backoff: delay x attempt).
    pub lock_retry_delay: Duration,
    /// Store connection pool size.
    pub store_pool_size: u32,
    /// External service endpoints, `(service_name, base_url)`.
    pub service_urls: Vec<(String, String)>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `FILAMENT_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `FILAMENT_HTTP_PORT`: ingress port (default: 8080)
    /// - `FILAMENT_SELF_URL`: cascade target (default: `http://127.0.0.1:<port>`)
    /// - `FILAMENT_TRIGGER_SECRET`: shared secret for internal routes (default: empty)
    /// - `FILAMENT_LOCK_STALE_SECS`: lock expiry (default: 300)
    /// - `FILAMENT_STEP_STALE_SECS`: processing-state expiry (default: 120)
    /// - `FILAMENT_DISPATCH_TIMEOUT_SECS`: outbound call timeout (default: 30)
    /// - `FILAMENT_LOCK_RETRY_ATTEMPTS`: lock attempts (default: 3)
    /// - `FILAMENT_LOCK_RETRY_DELAY_MS`: base lock retry delay (default: 100)
    /// - `FILAMENT_STORE_POOL_SIZE`: store pool size (default: 10)
    ///
    /// External endpoints are declared as `FILAMENT_SERVICE_<NAME>_URL`;
    /// the `<NAME>` segment is lowercased into the service name.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("FILAMENT_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("FILAMENT_DATABASE_URL"))?;

        let http_port: u16 = parse_var("FILAMENT_HTTP_PORT", "8080", "must be a valid port")?;
        let self_url = std::env::var("FILAMENT_SELF_URL")
            .unwrap_or_else(|_| format!("http://127.0.0.1:{}", http_port));
        let trigger_secret = std::env::var("FILAMENT_TRIGGER_SECRET").unwrap_or_default();

        let lock_stale_secs: u64 =
            parse_var("FILAMENT_LOCK_STALE_SECS", "300", "must be seconds")?;
        let step_stale_secs: u64 =
            parse_var("FILAMENT_STEP_STALE_SECS", "120", "must be seconds")?;
        let dispatch_timeout_secs: u64 =
            parse_var("FILAMENT_DISPATCH_TIMEOUT_SECS", "30", "must be seconds")?;
        let lock_retry_attempts: u32 =
            parse_var("FILAMENT_LOCK_RETRY_ATTEMPTS", "3", "must be a count")?;
        let lock_retry_delay_ms: u64 =
            parse_var("FILAMENT_LOCK_RETRY_DELAY_MS", "100", "must be milliseconds")?;
        let store_pool_size: u32 =
            parse_var("FILAMENT_STORE_POOL_SIZE", "10", "must be a positive integer")?;

        Ok(Self {
            database_url,
            http_port,
            self_url,
            trigger_secret,
            lock_stale_after: Duration::from_secs(lock_stale_secs),
            step_stale_after: Duration::from_secs(step_stale_secs),
            dispatch_timeout: Duration::from_secs(dispatch_timeout_secs),
            lock_retry_attempts,
            lock_retry_delay: Duration::from_millis(lock_retry_delay_ms),
            store_pool_size,
            service_urls: service_urls_from_env(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            http_port: 8080,
            self_url: "http://127.0.0.1:8080".to_string(),
            trigger_secret: String::new(),
            lock_stale_after: Duration::from_secs(300),
            step_stale_after: Duration::from_secs(120),
            dispatch_timeout: Duration::from_secs(30),
            lock_retry_attempts: 3,
            lock_retry_delay: Duration::from_millis(100),
            store_pool_size: 10,
            service_urls: Vec::new(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    name: &'static str,
    default: &str,
    expectation: &'static str,
) -> Result<T, ConfigError> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(name, expectation))
}

/// Collect `FILAMENT_SERVICE_<NAME>_URL` declarations.
fn service_urls_from_env() -> Vec<(String, String)> {
    let mut urls: Vec<(String, String)> = std::env::vars()
        .filter_map(|(key, value)| {
            let name = key
                .strip_prefix("FILAMENT_SERVICE_")?
                .strip_suffix("_URL")?;
            if name.is_empty() {
                return None;
            }
            Some((name.to_lowercase(), value))
        })
        .collect();
    urls.sort();
    urls
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.lock_stale_after, Duration::from_secs(300));
        assert_eq!(config.step_stale_after, Duration::from_secs(120));
        assert_eq!(config.dispatch_timeout, Duration::from_secs(30));
        assert_eq!(config.lock_retry_attempts, 3);
        assert_eq!(config.lock_retry_delay, Duration::from_millis(100));
        assert_eq!(config.store_pool_size, 10);
    }
}
