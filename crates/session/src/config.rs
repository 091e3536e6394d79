//! Session configuration.
//!
//! ```
//! use session::SessionConfig;
//!
//! let config = SessionConfig::from_toml_str("async-timeout-ms = 30000")?;
//! assert_eq!(config.async_timeout().as_secs(), 30);
//! assert_eq!(config.sync_timeout().as_secs(), 5);
//! # Ok::<(), toml::de::Error>(())
//! ```

use std::time::Duration;

use serde::Deserialize;
use transport::frame::DEFAULT_MAX_MESSAGE_SIZE;

pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_ASYNC_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_BLOCKING_GRACE_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SessionConfig {
    /// Default timeout for [`Session::send_request_blocking`](crate::Session::send_request_blocking).
    pub sync_timeout_ms: u64,
    /// Default timeout for [`Session::send_request`](crate::Session::send_request).
    pub async_timeout_ms: u64,
    /// Extra time a blocking caller waits beyond the request timeout, so the
    /// timeout failure itself has a chance to arrive.
    pub blocking_grace_ms: u64,
    /// Frames larger than this are dropped as framing errors.
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            async_timeout_ms: DEFAULT_ASYNC_TIMEOUT_MS,
            blocking_grace_ms: DEFAULT_BLOCKING_GRACE_MS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn async_timeout(&self) -> Duration {
        Duration::from_millis(self.async_timeout_ms)
    }

    pub fn blocking_grace(&self) -> Duration {
        Duration::from_millis(self.blocking_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.sync_timeout(), Duration::from_secs(5));
        assert_eq!(config.async_timeout(), Duration::from_secs(15));
        assert_eq!(config.blocking_grace(), Duration::from_secs(1));
        assert!(config.sync_timeout() < config.async_timeout());
    }

    #[test]
    fn empty_toml_gives_defaults() {
        assert_eq!(
            SessionConfig::from_toml_str("").unwrap(),
            SessionConfig::default()
        );
    }

    #[test]
    fn partial_toml_overrides() {
        let config = SessionConfig::from_toml_str(
            "sync-timeout-ms = 250\nmax-message-size = 1024\n",
        )
        .unwrap();
        assert_eq!(config.sync_timeout(), Duration::from_millis(250));
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(config.async_timeout_ms, DEFAULT_ASYNC_TIMEOUT_MS);
    }

    #[test]
    fn wrong_type_is_rejected() {
        assert!(SessionConfig::from_toml_str("sync-timeout-ms = \"soon\"").is_err());
    }
}
