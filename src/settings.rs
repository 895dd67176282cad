//! Runtime configuration, read once from the environment at startup.
//!
//! Every knob has the documented default, so a bare environment gives a
//! working (in-memory gateway aside) configuration.

use std::time::Duration;

use crate::catalog::FrequencyClass;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Path to the SQLite database file.
    pub database_path: String,

    /// Upper bound on concurrently running work units inside a tick.
    pub worker_pool_size: usize,

    /// Tick interval per frequency class.
    pub interval_critical: Duration,
    pub interval_high: Duration,
    pub interval_medium: Duration,
    pub interval_daily: Duration,

    /// Per-unit fetch deadline per frequency class.
    pub unit_deadline_critical: Duration,
    pub unit_deadline_default: Duration,

    /// Alert de-duplication window.
    pub suppression_window: Duration,

    /// Retry policy for retriable fetch failures.
    pub fetch_max_retries: u32,
    pub retry_base: Duration,
    pub retry_cap: Duration,

    /// Per-alert delivery attempts before the alert is marked failed.
    pub notify_retry_cap: u32,

    /// Webhook endpoint the notifier posts envelopes to.
    pub webhook_url: Option<String>,

    /// Base URL of the chain data gateway.
    pub gateway_url: Option<String>,

    /// Optional bearer token for the gateway.
    pub gateway_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: "./risk_monitoring.db".to_string(),
            worker_pool_size: 16,
            interval_critical: Duration::from_secs(5 * 60),
            interval_high: Duration::from_secs(30 * 60),
            interval_medium: Duration::from_secs(6 * 60 * 60),
            interval_daily: Duration::from_secs(24 * 60 * 60),
            unit_deadline_critical: Duration::from_secs(30),
            unit_deadline_default: Duration::from_secs(60),
            suppression_window: Duration::from_secs(15 * 60),
            fetch_max_retries: 2,
            retry_base: Duration::from_secs(1),
            retry_cap: Duration::from_secs(8),
            notify_retry_cap: 5,
            webhook_url: None,
            gateway_url: None,
            gateway_token: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_path: env_str("RM_DATABASE_PATH").unwrap_or(defaults.database_path),
            worker_pool_size: env_parse("RM_WORKER_POOL_SIZE")
                .unwrap_or(defaults.worker_pool_size),
            interval_critical: env_secs("RM_INTERVAL_CRITICAL_SECS")
                .unwrap_or(defaults.interval_critical),
            interval_high: env_secs("RM_INTERVAL_HIGH_SECS").unwrap_or(defaults.interval_high),
            interval_medium: env_secs("RM_INTERVAL_MEDIUM_SECS")
                .unwrap_or(defaults.interval_medium),
            interval_daily: env_secs("RM_INTERVAL_DAILY_SECS").unwrap_or(defaults.interval_daily),
            unit_deadline_critical: env_secs("RM_UNIT_DEADLINE_CRITICAL_SECS")
                .unwrap_or(defaults.unit_deadline_critical),
            unit_deadline_default: env_secs("RM_UNIT_DEADLINE_SECS")
                .unwrap_or(defaults.unit_deadline_default),
            suppression_window: env_secs("RM_SUPPRESSION_WINDOW_SECS")
                .unwrap_or(defaults.suppression_window),
            fetch_max_retries: env_parse("RM_FETCH_MAX_RETRIES")
                .unwrap_or(defaults.fetch_max_retries),
            retry_base: env_secs("RM_RETRY_BASE_SECS").unwrap_or(defaults.retry_base),
            retry_cap: env_secs("RM_RETRY_CAP_SECS").unwrap_or(defaults.retry_cap),
            notify_retry_cap: env_parse("RM_NOTIFY_RETRY_CAP").unwrap_or(defaults.notify_retry_cap),
            webhook_url: env_str("RM_WEBHOOK_URL"),
            gateway_url: env_str("RM_GATEWAY_URL"),
            gateway_token: env_str("RM_GATEWAY_TOKEN"),
        }
    }

    pub fn tick_interval(&self, class: FrequencyClass) -> Duration {
        match class {
            FrequencyClass::Critical => self.interval_critical,
            FrequencyClass::High => self.interval_high,
            FrequencyClass::Medium => self.interval_medium,
            FrequencyClass::Daily => self.interval_daily,
        }
    }

    pub fn unit_deadline(&self, class: FrequencyClass) -> Duration {
        match class {
            FrequencyClass::Critical => self.unit_deadline_critical,
            _ => self.unit_deadline_default,
        }
    }

    /// A tick that runs longer than this is cancelled and recorded as
    /// incomplete. Partial results already persisted remain valid.
    pub fn tick_deadline(&self, class: FrequencyClass) -> Duration {
        self.unit_deadline(class) * 5
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_str(name).and_then(|v| v.parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.worker_pool_size, 16);
        assert_eq!(settings.interval_critical, Duration::from_secs(300));
        assert_eq!(
            settings.unit_deadline(FrequencyClass::Critical),
            Duration::from_secs(30)
        );
        assert_eq!(
            settings.unit_deadline(FrequencyClass::Daily),
            Duration::from_secs(60)
        );
        assert_eq!(
            settings.tick_deadline(FrequencyClass::Critical),
            Duration::from_secs(150)
        );
        assert_eq!(settings.suppression_window, Duration::from_secs(900));
        assert_eq!(settings.fetch_max_retries, 2);
        assert_eq!(settings.notify_retry_cap, 5);
    }
}
