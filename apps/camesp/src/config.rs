use std::env;
use std::path::PathBuf;
use std::str::FromStr;
#[cfg(test)]
use std::sync::Mutex;
use std::time::Duration;

use tracing::warn;

pub const CONFIG_DIR_ENV: &str = "CAMESP_CONFIG_DIR";
pub const WATCHDOG_SECS_ENV: &str = "CAMESP_WATCHDOG_SECS";
pub const HTTP_TIMEOUT_SECS_ENV: &str = "CAMESP_HTTP_TIMEOUT_SECS";
pub const SESSION_SECS_ENV: &str = "CAMESP_SESSION_SECS";

/// Process level settings. Device settings live in the config store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the JSON device configuration files.
    pub config_dir: PathBuf,
    pub watchdog_timeout: Duration,
    pub http_timeout: Duration,
    /// Lifetime of a login without "remember me".
    pub session_duration: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config_dir = env::var(CONFIG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or(defaults.config_dir);
        Self {
            config_dir,
            watchdog_timeout: secs_from_env(WATCHDOG_SECS_ENV, defaults.watchdog_timeout),
            http_timeout: secs_from_env(HTTP_TIMEOUT_SECS_ENV, defaults.http_timeout),
            session_duration: secs_from_env(SESSION_SECS_ENV, defaults.session_duration),
        }
    }

    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("./config"),
            watchdog_timeout: crate::watchdog::SHORT_TIMEOUT,
            http_timeout: crate::http::client::DEFAULT_TIMEOUT,
            session_duration: Duration::from_secs(3600),
        }
    }
}

fn secs_from_env(name: &str, default: Duration) -> Duration {
    match env::var(name) {
        Ok(raw) => match u64::from_str(raw.trim()) {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                warn!(var = name, value = %raw, "ignoring invalid duration, using default");
                default
            }
        },
        Err(_) => default,
    }
}
