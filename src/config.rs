//! Configuration Module
//!
//! Handles loading and managing engine configuration from environment variables.

use std::env;

use crate::cache::TtlSpec;

/// Engine configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the cached resource, used in error messages and logs
    pub resource_name: String,
    /// Time in seconds after write/refresh at which entries become stale
    pub expiration_secs: f64,
    /// Time in seconds after write/refresh at which entries are removed.
    /// `None` couples eviction to expiration (no stale window).
    pub eviction_secs: Option<f64>,
    /// Eviction sweep interval in seconds
    pub sweep_interval_secs: f64,
    /// Attributes of cached values maintained in the secondary index
    pub indexed_attributes: Vec<String>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `RESOURCE_NAME` - Resource name for errors/logs (default: "CachedResource")
    /// - `CACHE_EXPIRATION_SECS` - Staleness TTL in seconds (default: 300)
    /// - `CACHE_EVICTION_SECS` - Eviction TTL in seconds (default: unset, eviction == expiration)
    /// - `SWEEP_INTERVAL_SECS` - Sweep frequency in seconds (default: 1)
    /// - `CACHE_INDEXED_ATTRIBUTES` - Comma-separated indexed attribute names (default: none)
    pub fn from_env() -> Self {
        Self {
            resource_name: env::var("RESOURCE_NAME").unwrap_or_else(|_| "CachedResource".to_string()),
            expiration_secs: env::var("CACHE_EXPIRATION_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300.0),
            eviction_secs: env::var("CACHE_EVICTION_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
            indexed_attributes: env::var("CACHE_INDEXED_ATTRIBUTES")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// The TTL spec this configuration describes.
    pub fn ttl_spec(&self) -> TtlSpec {
        match self.eviction_secs {
            Some(eviction) => TtlSpec::Windowed {
                expiration: self.expiration_secs,
                eviction,
            },
            None => TtlSpec::Scalar(self.expiration_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resource_name: "CachedResource".to_string(),
            expiration_secs: 300.0,
            eviction_secs: None,
            sweep_interval_secs: 1.0,
            indexed_attributes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.resource_name, "CachedResource");
        assert_eq!(config.expiration_secs, 300.0);
        assert!(config.eviction_secs.is_none());
        assert_eq!(config.sweep_interval_secs, 1.0);
        assert!(config.indexed_attributes.is_empty());
    }

    #[test]
    fn test_scalar_spec_without_eviction() {
        let config = Config::default();
        assert_eq!(config.ttl_spec(), TtlSpec::Scalar(300.0));
    }

    #[test]
    fn test_windowed_spec_with_eviction() {
        let config = Config {
            eviction_secs: Some(600.0),
            ..Config::default()
        };
        assert_eq!(
            config.ttl_spec(),
            TtlSpec::Windowed {
                expiration: 300.0,
                eviction: 600.0
            }
        );
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("RESOURCE_NAME");
        env::remove_var("CACHE_EXPIRATION_SECS");
        env::remove_var("CACHE_EVICTION_SECS");
        env::remove_var("SWEEP_INTERVAL_SECS");
        env::remove_var("CACHE_INDEXED_ATTRIBUTES");

        let config = Config::from_env();
        assert_eq!(config.expiration_secs, 300.0);
        assert!(config.eviction_secs.is_none());
        assert_eq!(config.sweep_interval_secs, 1.0);
    }
}
