//! Stream Router configuration.
//!
//! Configuration is loaded from environment variables. The timeout knobs are
//! explicit fields threaded through constructors so tests can override them
//! per instance instead of mutating shared state.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default window for ICE gathering to complete, in seconds.
pub const DEFAULT_ICE_GATHERING_TIMEOUT_SECS: u64 = 5;

/// Default window for the signaling data channel to open, in seconds.
pub const DEFAULT_MESSENGER_WAIT_TIMEOUT_SECS: u64 = 10;

/// Default hub dispatch timeout, in seconds.
pub const DEFAULT_HUB_DISPATCH_TIMEOUT_SECS: u64 = 3;

/// Default session request timeout, in seconds.
pub const DEFAULT_SESSION_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Stream Router configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Bound on waiting for an endpoint's ICE gathering to complete.
    pub ice_gathering_timeout: Duration,

    /// Bound on waiting for the signaling messenger to attach before an
    /// egress endpoint can become ready.
    pub messenger_wait_timeout: Duration,

    /// Bound on enqueueing a routing event into the hub's loop.
    pub hub_dispatch_timeout: Duration,

    /// Bound on a session accepting a request.
    pub session_request_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ice_gathering_timeout: Duration::from_secs(DEFAULT_ICE_GATHERING_TIMEOUT_SECS),
            messenger_wait_timeout: Duration::from_secs(DEFAULT_MESSENGER_WAIT_TIMEOUT_SECS),
            hub_dispatch_timeout: Duration::from_secs(DEFAULT_HUB_DISPATCH_TIMEOUT_SECS),
            session_request_timeout: Duration::from_secs(DEFAULT_SESSION_REQUEST_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {0}: {1}")]
    InvalidValue(String, String),
}

impl RouterConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparsable values.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Ok(RouterConfig {
            ice_gathering_timeout: secs_var(
                vars,
                "SR_ICE_GATHERING_TIMEOUT_SECS",
                DEFAULT_ICE_GATHERING_TIMEOUT_SECS,
            )?,
            messenger_wait_timeout: secs_var(
                vars,
                "SR_MESSENGER_WAIT_TIMEOUT_SECS",
                DEFAULT_MESSENGER_WAIT_TIMEOUT_SECS,
            )?,
            hub_dispatch_timeout: secs_var(
                vars,
                "SR_HUB_DISPATCH_TIMEOUT_SECS",
                DEFAULT_HUB_DISPATCH_TIMEOUT_SECS,
            )?,
            session_request_timeout: secs_var(
                vars,
                "SR_SESSION_REQUEST_TIMEOUT_SECS",
                DEFAULT_SESSION_REQUEST_TIMEOUT_SECS,
            )?,
        })
    }
}

fn secs_var(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match vars.get(name) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw.clone())),
    }
}
