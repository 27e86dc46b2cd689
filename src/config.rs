//! Configuration from the environment.
//!
//! The launcher recognizes three variables:
//!
//! - `LOG_LEVEL` - tracing filter level (consumed by logging init)
//! - `MAX_SESSIONS` - registry capacity (default 100)
//! - `SESSION_TIMEOUT` - idle eviction threshold in seconds (default 1800)

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::core::registry::{DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,
    /// Idle timeout before a session is evicted.
    pub session_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            session_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl Config {
    /// Read configuration from the environment, falling back to defaults on
    /// missing or unparsable values.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(raw) = env::var("MAX_SESSIONS") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => config.max_sessions = n,
                _ => warn!(value = %raw, "ignoring invalid MAX_SESSIONS"),
            }
        }

        if let Ok(raw) = env::var("SESSION_TIMEOUT") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => config.session_timeout = Duration::from_secs(secs),
                _ => warn!(value = %raw, "ignoring invalid SESSION_TIMEOUT"),
            }
        }

        config
    }
}
