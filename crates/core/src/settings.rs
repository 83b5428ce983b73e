//! Runtime options loaded from `config.toml`.
//!
//! Every option has a default and an environment override, so a bare
//! checkout runs with no configuration at all.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::registry::ConfigError;

const CONFIG_FILE: &str = "config.toml";

/// Tunable runtime options.
///
/// Environment overrides: `BATON_STEP_TIMEOUT_SECONDS`,
/// `BATON_HEARTBEAT_INTERVAL_SECONDS`, `BATON_RECONNECT_DELAY_SECONDS`,
/// `BATON_SUBSCRIBER_INBOX_CAPACITY`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Deadline for a single agent step.
    pub step_timeout_seconds: u64,

    /// Cadence of SSE heartbeat frames when no upstream frame arrives.
    pub heartbeat_interval_seconds: u64,

    /// Wait before the broker reconnects its upstream event stream.
    pub reconnect_delay_seconds: u64,

    /// Bound of each subscriber inbox; frames beyond it are dropped.
    pub subscriber_inbox_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            step_timeout_seconds: 600,
            heartbeat_interval_seconds: 5,
            reconnect_delay_seconds: 1,
            subscriber_inbox_capacity: 512,
        }
    }
}

impl Settings {
    /// Load settings from `<config_dir>/config.toml`, then apply
    /// environment overrides. A missing file yields the defaults.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);

        let mut settings = if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
                    path: path.clone(),
                    source,
                })?;
            toml::from_str(&content).map_err(|source| ConfigError::TomlParse { path, source })?
        } else {
            Settings::default()
        };

        settings.apply_overrides(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Apply environment-style overrides from a lookup function.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        override_u64(
            &mut self.step_timeout_seconds,
            "BATON_STEP_TIMEOUT_SECONDS",
            &get,
        );
        override_u64(
            &mut self.heartbeat_interval_seconds,
            "BATON_HEARTBEAT_INTERVAL_SECONDS",
            &get,
        );
        override_u64(
            &mut self.reconnect_delay_seconds,
            "BATON_RECONNECT_DELAY_SECONDS",
            &get,
        );
        if let Some(raw) = get("BATON_SUBSCRIBER_INBOX_CAPACITY") {
            match raw.parse() {
                Ok(value) => self.subscriber_inbox_capacity = value,
                Err(_) => warn!(value = %raw, "ignoring unparseable BATON_SUBSCRIBER_INBOX_CAPACITY"),
            }
        }
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }
}

fn override_u64(slot: &mut u64, name: &str, get: &impl Fn(&str) -> Option<String>) {
    if let Some(raw) = get(name) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => warn!(option = name, value = %raw, "ignoring unparseable override"),
        }
    }
}
