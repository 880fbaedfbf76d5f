//! Application-level configuration loading for the room server runtime.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TEMPO_BACK_CONFIG_PATH";

const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 5;
const DEFAULT_QUEUE_ITEMS_PER_USER: usize = 3;
const DEFAULT_COUNTDOWN_MIN_SECS: u64 = 5;
const DEFAULT_COUNTDOWN_MAX_SECS: u64 = 600;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// How long an operation may wait for a per-entity lock before failing.
    pub lock_timeout: Duration,
    /// Non-expired playlist items a single user may hold in shared queue modes.
    pub queue_items_per_user: usize,
    /// Lower bound applied to host-requested countdown durations.
    pub countdown_min: Duration,
    /// Upper bound applied to host-requested countdown durations and
    /// accepted auto-start durations.
    pub countdown_max: Duration,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded server configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Clamp a host-requested countdown duration into the configured bounds.
    pub fn clamp_countdown(&self, requested: Duration) -> Duration {
        requested.clamp(self.countdown_min, self.countdown_max)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
            queue_items_per_user: DEFAULT_QUEUE_ITEMS_PER_USER,
            countdown_min: Duration::from_secs(DEFAULT_COUNTDOWN_MIN_SECS),
            countdown_max: Duration::from_secs(DEFAULT_COUNTDOWN_MAX_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    lock_timeout_secs: Option<u64>,
    queue_items_per_user: Option<usize>,
    countdown_min_secs: Option<u64>,
    countdown_max_secs: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            lock_timeout: value
                .lock_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_timeout),
            queue_items_per_user: value
                .queue_items_per_user
                .unwrap_or(defaults.queue_items_per_user),
            countdown_min: value
                .countdown_min_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.countdown_min),
            countdown_max: value
                .countdown_max_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.countdown_max),
        }
    }
}

fn resolve_config_path() -> PathBuf {
    env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert!(config.countdown_min < config.countdown_max);
    }

    #[test]
    fn clamp_countdown_applies_bounds() {
        let config = AppConfig::default();
        assert_eq!(
            config.clamp_countdown(Duration::from_secs(1)),
            config.countdown_min
        );
        assert_eq!(
            config.clamp_countdown(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
        assert_eq!(
            config.clamp_countdown(Duration::from_secs(10_000)),
            config.countdown_max
        );
    }
}
