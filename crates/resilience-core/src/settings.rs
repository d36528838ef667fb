//! File-facing circuit breaker settings.
//!
//! The runtime [`CircuitBreakerConfig`] holds `Duration`s and a failure
//! classifier, neither of which belongs in a config file. This module is
//! the serde layer the application deserializes from whatever its config
//! loader produces, converted into validated runtime configs. Failure
//! classification stays code-level: settings always produce the default
//! always-counts predicate.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{CircuitBreakerConfig, ConfigError};
use crate::registry::CircuitBreakerRegistry;

/// Circuit breaker settings for one service class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Open duration before a recovery probe is allowed (seconds).
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    /// Half-open successes required to close the circuit.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Per-call deadline (seconds).
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Maximum calls in flight at once.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: u32,
    /// Failure rate above which an alert log fires.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
    /// Reserved for windowed failure-rate calculation (seconds).
    #[serde(default = "default_monitor_window_secs")]
    pub monitor_window_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            success_threshold: default_success_threshold(),
            call_timeout_secs: default_call_timeout_secs(),
            max_concurrent_calls: default_max_concurrent_calls(),
            alert_threshold: default_alert_threshold(),
            monitor_window_secs: default_monitor_window_secs(),
        }
    }
}

impl CircuitBreakerSettings {
    /// Convert to the runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the settings fail validation.
    pub fn to_config(&self) -> Result<CircuitBreakerConfig, ConfigError> {
        let config = CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
            success_threshold: self.success_threshold,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            max_concurrent_calls: self.max_concurrent_calls,
            alert_threshold: self.alert_threshold,
            monitor_window: Duration::from_secs(self.monitor_window_secs),
            ..CircuitBreakerConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

/// Resilience section of the application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResilienceSettings {
    /// Settings applied to services without an override.
    #[serde(default)]
    pub default: CircuitBreakerSettings,
    /// Per-service overrides, keyed by service name.
    #[serde(default)]
    pub services: HashMap<String, CircuitBreakerSettings>,
}

impl ResilienceSettings {
    /// The runtime configuration for `service`, falling back to the
    /// defaults when no override exists.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the selected settings fail
    /// validation.
    pub fn config_for(&self, service: &str) -> Result<CircuitBreakerConfig, ConfigError> {
        self.services
            .get(service)
            .unwrap_or(&self.default)
            .to_config()
    }

    /// Build a registry from these settings.
    ///
    /// Breakers for overridden services are created eagerly so their
    /// configs take effect before the first call; everything else is
    /// created lazily with the default config.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when any settings block fails validation.
    pub fn build_registry(&self) -> Result<CircuitBreakerRegistry, ConfigError> {
        let registry = CircuitBreakerRegistry::new(self.default.to_config()?);
        for (service, settings) in &self.services {
            registry.get_or_create(service, Some(settings.to_config()?));
        }
        Ok(registry)
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_recovery_timeout_secs() -> u64 {
    60
}

const fn default_success_threshold() -> u32 {
    3
}

const fn default_call_timeout_secs() -> u64 {
    30
}

const fn default_max_concurrent_calls() -> u32 {
    10
}

const fn default_alert_threshold() -> f64 {
    0.5
}

const fn default_monitor_window_secs() -> u64 {
    300
}
