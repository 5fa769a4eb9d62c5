use crate::error::{CacheError, Result};
use std::env;
use std::time::Duration;

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for files found at startup whose name carries no parsable TTL suffix
    pub default_ttl: Duration,
    /// Emit per-operation debug logs
    pub verbose: bool,
    /// Delay before the first background sweep
    pub sweep_delay: Duration,
    /// Repeat the sweep at this interval; `None` sweeps once
    pub sweep_interval: Option<Duration>,
    /// Number of serial write lanes; 1 gives a single global write order
    pub write_lanes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(24 * 60 * 60), // 24 hours
            verbose: false,
            sweep_delay: Duration::from_secs(1),
            sweep_interval: None,
            write_lanes: 1,
        }
    }
}

impl CacheConfig {
    /// Parse configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let default_ttl = env::var("CACHE_DEFAULT_TTL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_ttl);

        let verbose = env::var("CACHE_VERBOSE")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.verbose);

        let sweep_delay = env::var("CACHE_SWEEP_DELAY_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.sweep_delay);

        let sweep_interval = env::var("CACHE_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let write_lanes = env::var("CACHE_WRITE_LANES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.write_lanes);

        Self {
            default_ttl,
            verbose,
            sweep_delay,
            sweep_interval,
            write_lanes,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.write_lanes == 0 {
            return Err(CacheError::Config(
                "write_lanes must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval == Some(Duration::ZERO) {
            return Err(CacheError::Config(
                "sweep_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CacheConfig::default();
        assert_eq!(config.write_lanes, 1);
        assert_eq!(config.default_ttl, Duration::from_secs(86400));
        assert!(config.sweep_interval.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_lanes_rejected() {
        let config = CacheConfig {
            write_lanes: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("write_lanes"));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let config = CacheConfig {
            sweep_interval: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
