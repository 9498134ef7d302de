//! Driver configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::station::{RetryPolicy, SubnetProvider};

/// Driver configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    /// Where discovery broadcasts go (default: 255.255.255.255)
    pub broadcast_addr: Ipv4Addr,
    /// Timeouts tolerated per connection phase (default: 5)
    pub retry_count: u32,
    /// Per-operation socket timeout (default: 5s)
    pub socket_timeout: Duration,
    /// Pause before each live poll (default: none)
    pub loop_delay: Option<Duration>,
    /// Cooldown after a socket failure (default: 5s)
    pub retry_wait: Duration,
    /// Socket failures tolerated before giving up (default: 3)
    pub max_retry: u32,
    /// Full connection sequences before giving up (default: 10)
    pub connect_attempts: u32,
    /// Last archived sample the host already has (default: none, replay everything)
    pub archive_since: Option<DateTime<Utc>>,
    /// Replay the archive before live polling (default: true)
    pub backfill: bool,
    /// Use the simulated station (default: false)
    pub fixture: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            broadcast_addr: Ipv4Addr::BROADCAST,
            retry_count: policy.retry_count,
            socket_timeout: policy.timeout,
            loop_delay: None,
            retry_wait: policy.retry_wait,
            max_retry: policy.max_retry,
            connect_attempts: policy.connect_attempts,
            archive_since: None,
            backfill: true,
            fixture: false,
        }
    }
}

impl DriverConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `EASYWEATHER_BROADCAST_ADDR`: broadcast address (default: 255.255.255.255)
    /// - `EASYWEATHER_RETRY_COUNT`: timeouts per phase (default: 5)
    /// - `EASYWEATHER_SOCKET_TIMEOUT`: seconds (default: 5.0)
    /// - `EASYWEATHER_LOOP_DELAY`: seconds before each live poll (default: unset)
    /// - `EASYWEATHER_RETRY_WAIT`: seconds (default: 5.0)
    /// - `EASYWEATHER_MAX_RETRY`: socket failures (default: 3)
    /// - `EASYWEATHER_CONNECT_ATTEMPTS`: connection sequences (default: 10)
    /// - `EASYWEATHER_ARCHIVE_SINCE`: unix timestamp (default: unset)
    /// - `EASYWEATHER_BACKFILL`: true/false (default: true)
    /// - `EASYWEATHER_FIXTURE`: true/false (default: false)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(addr) = parsed(&lookup, "EASYWEATHER_BROADCAST_ADDR") {
            cfg.broadcast_addr = addr;
        }
        if let Some(n) = parsed(&lookup, "EASYWEATHER_RETRY_COUNT") {
            cfg.retry_count = n;
        }
        if let Some(d) = seconds(&lookup, "EASYWEATHER_SOCKET_TIMEOUT") {
            cfg.socket_timeout = d;
        }
        if let Some(d) = seconds(&lookup, "EASYWEATHER_LOOP_DELAY") {
            cfg.loop_delay = Some(d);
        }
        if let Some(d) = seconds(&lookup, "EASYWEATHER_RETRY_WAIT") {
            cfg.retry_wait = d;
        }
        if let Some(n) = parsed(&lookup, "EASYWEATHER_MAX_RETRY") {
            cfg.max_retry = n;
        }
        if let Some(n) = parsed(&lookup, "EASYWEATHER_CONNECT_ATTEMPTS") {
            cfg.connect_attempts = n;
        }
        if let Some(ts) = parsed::<i64>(&lookup, "EASYWEATHER_ARCHIVE_SINCE") {
            match DateTime::from_timestamp(ts, 0) {
                Some(since) => cfg.archive_since = Some(since),
                None => tracing::warn!("Ignoring out of range EASYWEATHER_ARCHIVE_SINCE={}", ts),
            }
        }
        if let Some(b) = parsed(&lookup, "EASYWEATHER_BACKFILL") {
            cfg.backfill = b;
        }
        if let Some(b) = parsed(&lookup, "EASYWEATHER_FIXTURE") {
            cfg.fixture = b;
        }

        cfg
    }

    /// Retry settings for the session.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_count: self.retry_count,
            timeout: self.socket_timeout,
            retry_wait: self.retry_wait,
            max_retry: self.max_retry,
            connect_attempts: self.connect_attempts,
        }
    }
}

impl SubnetProvider for DriverConfig {
    fn broadcast_address(&self) -> Ipv4Addr {
        self.broadcast_addr
    }
}

/// Parse a variable, logging and ignoring values that do not parse.
fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let secs: f64 = parsed(lookup, key)?;
    match Duration::try_from_secs_f64(secs) {
        Ok(d) => Some(d),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={}", key, secs);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let cfg = DriverConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg, DriverConfig::default());
        assert_eq!(cfg.broadcast_addr, Ipv4Addr::new(255, 255, 255, 255));
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
        assert!(cfg.backfill);
        assert!(!cfg.fixture);
        assert_eq!(cfg.loop_delay, None);
    }

    #[test]
    fn test_overrides() {
        let cfg = DriverConfig::from_lookup(lookup(&[
            ("EASYWEATHER_BROADCAST_ADDR", "192.168.1.255"),
            ("EASYWEATHER_RETRY_COUNT", "2"),
            ("EASYWEATHER_SOCKET_TIMEOUT", "2.5"),
            ("EASYWEATHER_LOOP_DELAY", "10"),
            ("EASYWEATHER_MAX_RETRY", "7"),
            ("EASYWEATHER_ARCHIVE_SINCE", "1496563200"),
            ("EASYWEATHER_BACKFILL", "false"),
            ("EASYWEATHER_FIXTURE", "true"),
        ]));
        assert_eq!(cfg.broadcast_addr, Ipv4Addr::new(192, 168, 1, 255));
        assert_eq!(cfg.broadcast_address(), cfg.broadcast_addr);
        assert_eq!(cfg.retry_count, 2);
        assert_eq!(cfg.socket_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.loop_delay, Some(Duration::from_secs(10)));
        assert_eq!(cfg.max_retry, 7);
        assert_eq!(cfg.archive_since.unwrap().timestamp(), 1_496_563_200);
        assert!(!cfg.backfill);
        assert!(cfg.fixture);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let cfg = DriverConfig::from_lookup(lookup(&[
            ("EASYWEATHER_BROADCAST_ADDR", "not-an-address"),
            ("EASYWEATHER_RETRY_COUNT", "-1"),
            ("EASYWEATHER_SOCKET_TIMEOUT", "-3"),
            ("EASYWEATHER_BACKFILL", "maybe"),
        ]));
        assert_eq!(cfg, DriverConfig::default());
    }
}
