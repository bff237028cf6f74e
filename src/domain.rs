//! Domain types shared across the sampling pipeline: samples, reachability,
//! and the config preconditions from spec.md §6.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::NtpPacket;

/// A host name as configured in the pool, before DNS resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerHost(pub String);

impl fmt::Display for ServerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServerHost {
    fn from(s: &str) -> Self {
        ServerHost(s.to_string())
    }
}

/// One completed, accepted UDP exchange. Immutable once constructed.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub packet: NtpPacket,
    pub start_time_ms: i64,
    pub request_ticks: Duration,
    pub response_ticks: Duration,
    pub response_time_ms: i64,
    pub offset_ms: i64,
    pub delay_ms: i64,
    pub address: SocketAddr,
}

/// The engine's live estimate of true wall time, frozen at the moment a
/// sample was accepted. `now()` is computed by compensating with the
/// monotonic delta elapsed since.
#[derive(Debug, Clone, Copy)]
pub struct FrozenTime {
    /// Wall-clock milliseconds since Unix epoch at `uptime_at_response`.
    pub wall_time_ms: i64,
    /// Monotonic uptime at the moment `wall_time_ms` was observed.
    pub uptime_at_response: Duration,
    pub sample_size: usize,
}

impl FrozenTime {
    /// `now()`: wall time compensated by elapsed monotonic uptime.
    #[must_use]
    pub fn now(&self, current_uptime: Duration) -> i64 {
        let elapsed = current_uptime.saturating_sub(self.uptime_at_response);
        self.wall_time_ms + elapsed.as_millis() as i64
    }

    /// Age of this reference relative to `current_uptime`.
    #[must_use]
    pub fn age(&self, current_uptime: Duration) -> Duration {
        current_uptime.saturating_sub(self.uptime_at_response)
    }
}

/// Three-valued network reachability status (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachabilityStatus {
    Unreachable,
    ReachableWifi,
    ReachableCellular,
}

impl ReachabilityStatus {
    #[must_use]
    pub fn is_reachable(self) -> bool {
        !matches!(self, ReachabilityStatus::Unreachable)
    }
}

/// Sampling engine configuration (spec.md §6). Constructed only through
/// [`Config::new`], which enforces every precondition spec.md names.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub timeout: Duration,
    pub max_retries: u32,
    pub max_concurrency: usize,
    pub max_servers: usize,
    pub samples_per_address: usize,
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timeout: Duration::from_secs(8),
            max_retries: 3,
            max_concurrency: 5,
            max_servers: 5,
            samples_per_address: 4,
            poll_interval: Duration::from_secs(512),
        }
    }
}

impl Config {
    /// Build a config, validating the preconditions in spec.md §6.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if any duration is zero, or if
    /// `max_concurrency`/`samples_per_address` are below 1.
    pub fn new(
        timeout: Duration,
        max_retries: u32,
        max_concurrency: usize,
        max_servers: usize,
        samples_per_address: usize,
        poll_interval: Duration,
    ) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::MustBePositive { field: "timeout" });
        }
        if poll_interval.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "poll_interval",
            });
        }
        if max_servers == 0 {
            return Err(ConfigError::MustBePositive {
                field: "max_servers",
            });
        }
        if max_concurrency < 1 {
            return Err(ConfigError::MaxConcurrencyTooSmall);
        }
        if samples_per_address < 1 {
            return Err(ConfigError::SamplesPerAddressTooSmall);
        }

        Ok(Config {
            timeout,
            max_retries,
            max_concurrency,
            max_servers,
            samples_per_address,
            poll_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let c = Config::default();
        assert_eq!(c.timeout, Duration::from_secs(8));
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.max_concurrency, 5);
        assert_eq!(c.max_servers, 5);
        assert_eq!(c.samples_per_address, 4);
        assert_eq!(c.poll_interval, Duration::from_secs(512));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let result = Config::new(
            Duration::from_secs(1),
            3,
            0,
            5,
            4,
            Duration::from_secs(1),
        );
        assert_eq!(result.unwrap_err(), ConfigError::MaxConcurrencyTooSmall);
    }

    #[test]
    fn rejects_zero_timeout() {
        let result = Config::new(
            Duration::from_secs(0),
            3,
            5,
            5,
            4,
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn frozen_time_now_compensates_uptime_delta() {
        let frozen = FrozenTime {
            wall_time_ms: 1_000_000,
            uptime_at_response: Duration::from_secs(10),
            sample_size: 4,
        };
        assert_eq!(frozen.now(Duration::from_secs(10)), 1_000_000);
        assert_eq!(frozen.now(Duration::from_secs(12)), 1_002_000);
    }
}
