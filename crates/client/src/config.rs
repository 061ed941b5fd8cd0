//! Client configuration

use crate::errors::{ExchangeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_REST_URL: &str = "https://api.backpack.exchange";
pub const DEFAULT_WS_URL: &str = "wss://ws.backpack.exchange";
pub const API_KEY_ENV: &str = "BACKPACK_API_KEY";
pub const API_SECRET_ENV: &str = "BACKPACK_API_SECRET";

/// Backpack client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpackConfig {
    pub api_key: String,
    /// Base64 Ed25519 private key (seed or seed‖public key)
    pub api_secret: String,
    pub base_url: String,
    pub ws_url: String,
    /// Validity window sent as `X-Window`
    pub window_ms: u64,
    pub timeout_ms: u64,
    /// Bound of the outbound frame queue
    pub queue_capacity: usize,
    pub keepalive_interval_ms: u64,
    pub auth_timeout_ms: u64,
    pub auth_poll_interval_ms: u64,
}

impl Default for BackpackConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            base_url: DEFAULT_REST_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            window_ms: 5000,
            timeout_ms: 5000,
            queue_capacity: 1024,
            keepalive_interval_ms: 30_000,
            auth_timeout_ms: 5000,
            auth_poll_interval_ms: 100,
        }
    }
}

impl BackpackConfig {
    pub fn with_credentials(mut self, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self.api_secret = api_secret.into();
        self
    }

    /// Read `BACKPACK_API_KEY` / `BACKPACK_API_SECRET`
    pub fn with_env_credentials(mut self) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| ExchangeError::MissingCredentials(API_KEY_ENV.to_string()))?;
        let api_secret = std::env::var(API_SECRET_ENV)
            .map_err(|_| ExchangeError::MissingCredentials(API_SECRET_ENV.to_string()))?;

        self.api_key = api_key;
        self.api_secret = api_secret;
        Ok(self)
    }

    pub fn with_urls(mut self, base_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.ws_url = ws_url.into();
        self
    }

    pub fn with_window(mut self, window_ms: u64) -> Self {
        self.window_ms = window_ms;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_keepalive_interval(mut self, interval_ms: u64) -> Self {
        self.keepalive_interval_ms = interval_ms;
        self
    }

    pub fn with_auth_timeout(mut self, timeout_ms: u64, poll_interval_ms: u64) -> Self {
        self.auth_timeout_ms = timeout_ms;
        self.auth_poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn auth_poll_interval(&self) -> Duration {
        Duration::from_millis(self.auth_poll_interval_ms)
    }

    pub fn rest_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.base_url)?)
    }

    pub fn stream_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.ws_url)?)
    }

    /// Reject settings that would make the client misbehave before any I/O
    pub fn validate(&self) -> Result<()> {
        let rest = self.rest_url()?;
        if rest.scheme() != "https" {
            return Err(ExchangeError::ConfigurationError(format!(
                "REST URL must use https, got {}",
                rest.scheme()
            )));
        }

        let ws = self.stream_url()?;
        if ws.scheme() != "wss" {
            return Err(ExchangeError::ConfigurationError(format!(
                "stream URL must use wss, got {}",
                ws.scheme()
            )));
        }

        if self.queue_capacity == 0 {
            return Err(ExchangeError::ConfigurationError("queue_capacity must be positive".to_string()));
        }
        if self.window_ms == 0 {
            return Err(ExchangeError::ConfigurationError("window_ms must be positive".to_string()));
        }
        if self.keepalive_interval_ms == 0 || self.auth_poll_interval_ms == 0 {
            return Err(ExchangeError::ConfigurationError("intervals must be positive".to_string()));
        }
        if self.auth_timeout_ms < self.auth_poll_interval_ms {
            return Err(ExchangeError::ConfigurationError(
                "auth_timeout_ms must be at least one poll interval".to_string(),
            ));
        }

        Ok(())
    }
}
