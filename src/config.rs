//! Application-level configuration loading: timing knobs of the scoring flows
//! and the classes watched at startup.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::dao::models::ClassId;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TRIAL_SCORING_CONFIG_PATH";

const DEFAULT_CHECKIN_SETTLE_DELAY_MS: u64 = 300;
const DEFAULT_SYNC_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_TASK_FAILURE_HISTORY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Wait applied after a check-in so the background sync can propagate.
    pub checkin_settle_delay: Duration,
    /// Correct remote tallies with the just-scored / just-reset hints.
    pub lag_compensation: bool,
    /// Interval between two polls of a remote change subscription.
    pub sync_poll_interval: Duration,
    /// Classes mirrored as soon as the sync manager starts.
    pub watch_classes: Vec<ClassId>,
    /// Number of background task failures kept for inspection.
    pub task_failure_history: usize,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        watched = app_config.watch_classes.len(),
                        lag_compensation = app_config.lag_compensation,
                        "loaded configuration"
                    );
                    app_config
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
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    checkin_settle_delay_ms: Option<u64>,
    lag_compensation: Option<bool>,
    sync_poll_interval_ms: Option<u64>,
    watch_classes: Vec<ClassId>,
    task_failure_history: Option<usize>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            checkin_settle_delay: Duration::from_millis(
                value
                    .checkin_settle_delay_ms
                    .unwrap_or(DEFAULT_CHECKIN_SETTLE_DELAY_MS),
            ),
            lag_compensation: value.lag_compensation.unwrap_or(true),
            sync_poll_interval: Duration::from_millis(
                value
                    .sync_poll_interval_ms
                    .filter(|ms| *ms > 0)
                    .unwrap_or(DEFAULT_SYNC_POLL_INTERVAL_MS),
            ),
            watch_classes: value.watch_classes,
            task_failure_history: value
                .task_failure_history
                .unwrap_or(DEFAULT_TASK_FAILURE_HISTORY),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
