//! Process-wide collection of circuit breakers, one per named service.
//!
//! The registry is constructed explicitly by application startup code and
//! handed to whatever needs it; there is no hidden global. Tests get their
//! own isolated registries the same way.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
use crate::config::CircuitBreakerConfig;
use crate::error::CircuitBreakerError;

/// Lazily-populated map from service name to its circuit breaker.
///
/// The map has its own lock, distinct from each breaker's: creating a
/// breaker and recording outcomes on one never contend with each other.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers use `default_config` unless a
    /// per-service config is supplied at first creation.
    #[must_use]
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    /// Create a registry with the default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// The breaker for `service`, creating it on first lookup.
    ///
    /// `config` is only consulted when the breaker does not exist yet;
    /// later callers get the existing instance regardless of what they
    /// pass. Concurrent first lookups for the same name race on the write
    /// lock and the loser returns the winner's instance.
    pub fn get_or_create(
        &self,
        service: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        {
            let breakers = self.read();
            if let Some(breaker) = breakers.get(service) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.write();
        // Double-check after acquiring the write lock.
        if let Some(breaker) = breakers.get(service) {
            return Arc::clone(breaker);
        }

        let config = config.unwrap_or_else(|| self.default_config.clone());
        let breaker = Arc::new(CircuitBreaker::new(service, config));
        breakers.insert(service.to_string(), Arc::clone(&breaker));
        tracing::debug!(service, total = breakers.len(), "Created circuit breaker");
        breaker
    }

    /// The breaker for `service`, if one exists.
    #[must_use]
    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.read().get(service).map(Arc::clone)
    }

    /// Run `work` through the breaker for `service`, creating the breaker
    /// with the registry's default configuration if needed.
    ///
    /// # Errors
    ///
    /// Same contract as [`CircuitBreaker::call`].
    pub async fn call<F, Fut, T, E>(
        &self,
        service: &str,
        work: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let breaker = self.get_or_create(service, None);
        breaker.call(work).await
    }

    /// Snapshot the breaker for `service`, if one exists.
    #[must_use]
    pub fn stats(&self, service: &str) -> Option<CircuitBreakerSnapshot> {
        self.get(service).map(|breaker| breaker.stats())
    }

    /// Snapshot every registered breaker.
    #[must_use]
    pub fn all_stats(&self) -> HashMap<String, CircuitBreakerSnapshot> {
        let breakers = self.read();
        breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.stats()))
            .collect()
    }

    /// Names of services whose breaker is open or whose cumulative failure
    /// rate exceeds its own alert threshold, sorted for stable output.
    #[must_use]
    pub fn unhealthy_services(&self) -> Vec<String> {
        let breakers = self.read();
        let mut unhealthy: Vec<String> = breakers
            .iter()
            .filter(|(_, breaker)| {
                let snapshot = breaker.stats();
                snapshot.state == CircuitState::Open
                    || snapshot.failure_rate > snapshot.config.alert_threshold
            })
            .map(|(name, _)| name.clone())
            .collect();
        unhealthy.sort();
        unhealthy
    }

    /// Reset the breaker for `service`. Returns `false` if the name is
    /// unknown.
    pub fn reset(&self, service: &str) -> bool {
        match self.get(service) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Force the breaker for `service` open. Returns `false` if the name
    /// is unknown.
    pub fn force_open(&self, service: &str) -> bool {
        match self.get(service) {
            Some(breaker) => {
                breaker.force_open();
                true
            }
            None => false,
        }
    }

    /// Reset every registered breaker.
    pub fn reset_all(&self) {
        let breakers = self.read();
        for breaker in breakers.values() {
            breaker.reset();
        }
        tracing::info!(total = breakers.len(), "Reset all circuit breakers");
    }

    /// Number of registered breakers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether any breaker has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
