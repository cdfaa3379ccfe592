use crate::constants::MIN_POLL_INTERVAL_SECS;
use crate::error::{AppError, Result};
use crate::models::Endpoint;
use chrono::NaiveTime;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

/// Resolved configuration for the polling pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Time between the starts of two poll cycles
    pub poll_interval: Duration,

    /// Minimum gap between two requests on one session handle
    pub request_delay: Duration,

    /// Market window start, exchange local time (09:00)
    pub market_open: NaiveTime,

    /// Market window end, exchange local time (14:35, 5 minutes after the official close)
    pub market_close: NaiveTime,

    /// Endpoints the scheduler may call
    pub enabled_endpoints: BTreeSet<Endpoint>,

    /// Also append rows to the flat legacy CSV
    pub enable_legacy_csv: bool,

    /// Root directory for all stored data
    pub data_root: PathBuf,

    /// Total attempts per endpoint call before it counts as failed
    pub max_attempts: u32,

    /// Base delay of the exponential retry backoff
    pub retry_backoff: Duration,

    /// Attempts to obtain a session cookie
    pub session_attempts: u32,

    /// Wait after a lost session before trying again
    pub retry_delay: Duration,

    /// Earliest local time of the daily symbol reference refresh
    pub reference_refresh_time: NaiveTime,

    /// Watch list for the per-symbol `companyInfoSummery` endpoint
    pub company_info_symbols: Vec<String>,

    /// How long an in-flight cycle may run on after shutdown is requested
    pub shutdown_grace: Duration,

    /// Longest single sleep while waiting for the market to open
    pub closed_market_check_interval: Duration,

    /// Consecutive all-failed cycles before the failure is reported as persistent
    pub failure_alert_threshold: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            request_delay: Duration::from_millis(400),
            market_open: hm(9, 0),
            market_close: hm(14, 35),
            enabled_endpoints: Endpoint::ALL.iter().copied().collect(),
            enable_legacy_csv: true,
            data_root: PathBuf::from("data"),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            session_attempts: 3,
            retry_delay: Duration::from_secs(60),
            reference_refresh_time: hm(9, 5),
            company_info_symbols: Vec::new(),
            shutdown_grace: Duration::from_secs(10),
            closed_market_check_interval: Duration::from_secs(300),
            failure_alert_threshold: 5,
        }
    }
}

impl PipelineConfig {
    /// Build from `CSE_*` environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, test maps)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("CSE_DATA_DIR") {
            config.data_root = PathBuf::from(v);
        }
        if let Some(v) = get("CSE_POLL_INTERVAL_SECONDS") {
            config.poll_interval = Duration::from_secs(parse_number::<u64>("CSE_POLL_INTERVAL_SECONDS", &v)?);
        }
        if let Some(v) = get("CSE_REQUEST_DELAY_SECONDS") {
            let secs = parse_number::<f64>("CSE_REQUEST_DELAY_SECONDS", &v)?;
            if !secs.is_finite() || secs < 0.0 {
                return Err(AppError::Config(format!("CSE_REQUEST_DELAY_SECONDS must be >= 0, got {}", v)));
            }
            config.request_delay = Duration::from_secs_f64(secs);
        }
        if let Some(v) = get("CSE_MARKET_OPEN") {
            config.market_open = parse_time("CSE_MARKET_OPEN", &v)?;
        }
        if let Some(v) = get("CSE_MARKET_CLOSE") {
            config.market_close = parse_time("CSE_MARKET_CLOSE", &v)?;
        }
        if let Some(v) = get("CSE_ENABLED_ENDPOINTS") {
            config.enabled_endpoints = Endpoint::parse_list(&v)?;
        }
        if let Some(v) = get("CSE_ENABLE_LEGACY_CSV") {
            config.enable_legacy_csv = parse_bool("CSE_ENABLE_LEGACY_CSV", &v)?;
        }
        if let Some(v) = get("CSE_COMPANY_INFO_SYMBOLS") {
            config.company_info_symbols = v
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval < Duration::from_secs(MIN_POLL_INTERVAL_SECS) {
            // Files are keyed per minute; faster polling would collide with itself
            return Err(AppError::Config(format!(
                "poll interval must be at least {}s, got {}s",
                MIN_POLL_INTERVAL_SECS,
                self.poll_interval.as_secs()
            )));
        }
        if self.market_open >= self.market_close {
            return Err(AppError::Config(format!(
                "market open time {} must be before close time {}",
                self.market_open, self.market_close
            )));
        }
        if self.enabled_endpoints.is_empty() {
            return Err(AppError::Config("at least one endpoint must be enabled".to_string()));
        }
        if self.max_attempts == 0 || self.session_attempts == 0 {
            return Err(AppError::Config("attempt counts must be at least 1".to_string()));
        }
        if self.data_root.as_os_str().is_empty() {
            return Err(AppError::Config("data root path must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn is_enabled(&self, endpoint: Endpoint) -> bool {
        self.enabled_endpoints.contains(&endpoint)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| AppError::Config(format!("{} must be a number, got '{}'", key, value)))
}

fn parse_time(key: &str, value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| AppError::Config(format!("{} must be HH:MM, got '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::Config(format!("{} must be true or false, got '{}'", key, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.request_delay, Duration::from_millis(400));
        assert_eq!(config.market_open, hm(9, 0));
        assert_eq!(config.market_close, hm(14, 35));
        assert!(config.enable_legacy_csv);
        assert_eq!(config.enabled_endpoints.len(), Endpoint::ALL.len());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("CSE_DATA_DIR", "/tmp/cse"),
            ("CSE_POLL_INTERVAL_SECONDS", "120"),
            ("CSE_REQUEST_DELAY_SECONDS", "0.75"),
            ("CSE_MARKET_CLOSE", "14:30"),
            ("CSE_ENABLED_ENDPOINTS", "marketStatus,todaySharePrice"),
            ("CSE_ENABLE_LEGACY_CSV", "false"),
            ("CSE_COMPANY_INFO_SYMBOLS", "lolc.n0000, jkh.n0000"),
        ]))
        .unwrap();

        assert_eq!(config.data_root, PathBuf::from("/tmp/cse"));
        assert_eq!(config.poll_interval, Duration::from_secs(120));
        assert_eq!(config.request_delay, Duration::from_millis(750));
        assert_eq!(config.market_close, hm(14, 30));
        assert_eq!(config.enabled_endpoints.len(), 2);
        assert!(!config.enable_legacy_csv);
        assert_eq!(config.company_info_symbols, vec!["LOLC.N0000", "JKH.N0000"]);
    }

    #[test]
    fn test_rejects_sub_minute_interval() {
        let err = PipelineConfig::from_lookup(lookup(&[("CSE_POLL_INTERVAL_SECONDS", "30")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_rejects_blacklisted_endpoint() {
        let err = PipelineConfig::from_lookup(lookup(&[("CSE_ENABLED_ENDPOINTS", "chartData")])).unwrap_err();
        assert!(err.to_string().contains("blacklisted"));
    }

    #[test]
    fn test_rejects_inverted_window_and_bad_values() {
        assert!(PipelineConfig::from_lookup(lookup(&[("CSE_MARKET_OPEN", "15:00")])).is_err());
        assert!(PipelineConfig::from_lookup(lookup(&[("CSE_MARKET_OPEN", "9am")])).is_err());
        assert!(PipelineConfig::from_lookup(lookup(&[("CSE_ENABLE_LEGACY_CSV", "maybe")])).is_err());
        assert!(PipelineConfig::from_lookup(lookup(&[("CSE_REQUEST_DELAY_SECONDS", "-1")])).is_err());
    }
}
