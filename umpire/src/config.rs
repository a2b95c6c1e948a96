//! Environment-derived controller configuration.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration, resolved once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Broker connection URI (`REDIS_URI`).
    pub broker_uri: String,
    /// Directory scanned for app specifications (`APPS_PATH`).
    pub apps_path: PathBuf,
    /// Length of one reconciliation tick (`UMPIRE_HEARTBEAT`, seconds).
    pub heartbeat: Duration,
    /// Repository refresh cadence (`APP_REFRESH`, seconds).
    pub app_refresh: Duration,
    /// Upper bound on worker replicas (`MAX_WORKERS`).
    pub max_workers: u64,
    /// Prefix shared by all app service names (`APP_PREFIX`).
    pub app_prefix: String,
    /// Name of the generic worker service (`WORKER_SERVICE`).
    pub worker_service: String,
    /// Endpoint receiving workflow status messages (`STATUS_URL`).
    pub status_url: String,
    /// This controller's identity on the control stream (`HOSTNAME`).
    pub consumer_id: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_uri: "redis://localhost:6379".into(),
            apps_path: PathBuf::from("./apps"),
            heartbeat: Duration::from_secs(1),
            app_refresh: Duration::from_secs(60),
            max_workers: 1,
            app_prefix: "umpire_app".into(),
            worker_service: "umpire_worker".into(),
            status_url: "http://localhost:2828/workflowstatus".into(),
            consumer_id: "local_umpire".into(),
        }
    }
}

impl Config {
    /// Resolve the configuration from the process environment, falling back
    /// to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            broker_uri: var_or("REDIS_URI", defaults.broker_uri),
            apps_path: env::var_os("APPS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.apps_path),
            heartbeat: Duration::from_secs(parsed_or("UMPIRE_HEARTBEAT", 1)),
            app_refresh: Duration::from_secs(parsed_or("APP_REFRESH", 60)),
            max_workers: parsed_or("MAX_WORKERS", defaults.max_workers),
            app_prefix: var_or("APP_PREFIX", defaults.app_prefix),
            worker_service: var_or("WORKER_SERVICE", defaults.worker_service),
            status_url: var_or("STATUS_URL", defaults.status_url),
            consumer_id: var_or("HOSTNAME", defaults.consumer_id),
        }
    }
}

fn var_or(key: &str, default: String) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.heartbeat, Duration::from_secs(1));
        assert_eq!(config.app_refresh, Duration::from_secs(60));
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.consumer_id, "local_umpire");
    }

    #[test]
    fn unparseable_values_fall_back() {
        env::set_var("UMPIRE_TEST_PARSED_OR", "not-a-number");
        assert_eq!(parsed_or::<u64>("UMPIRE_TEST_PARSED_OR", 7), 7);
        env::set_var("UMPIRE_TEST_PARSED_OR", "42");
        assert_eq!(parsed_or::<u64>("UMPIRE_TEST_PARSED_OR", 7), 42);
        env::remove_var("UMPIRE_TEST_PARSED_OR");
    }
}
