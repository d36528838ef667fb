// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Resilience Core
//!
//! Circuit-breaker protection for the backend's outbound service calls
//! (model providers, cache backends, webhook targets). Each named service
//! gets one breaker that gates calls on state and concurrency, enforces a
//! per-call deadline, records outcomes, and trips open on sustained
//! failure; a registry keeps one breaker per service and answers the
//! aggregate questions monitoring asks.
//!
//! # Layout
//!
//! - [`circuit_breaker`]: the per-service state machine and protected call
//! - [`registry`]: one breaker per service name, created lazily
//! - [`config`] / [`settings`]: runtime configuration and its serde layer
//! - [`stats`]: per-breaker counters and rolling samples
//! - [`error`]: the protected-call error taxonomy
//! - [`observability`]: metrics emission
//!
//! # Example
//!
//! ```rust,ignore
//! use resilience_core::{CircuitBreakerConfig, CircuitBreakerRegistry};
//!
//! let registry = CircuitBreakerRegistry::with_defaults();
//! registry.get_or_create("model-provider", Some(CircuitBreakerConfig::model_provider()));
//!
//! let insight = registry
//!     .call("model-provider", || async { provider.complete(prompt).await })
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Per-service circuit breaker state machine.
pub mod circuit_breaker;

/// Runtime configuration and validation.
pub mod config;

/// Error taxonomy for protected calls.
pub mod error;

/// Metrics emission.
pub mod observability;

/// One breaker per named service.
pub mod registry;

/// Serde-facing settings layer.
pub mod settings;

/// Per-breaker counters and rolling samples.
pub mod stats;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState, ConfigSnapshot};
pub use config::{CircuitBreakerConfig, ConfigError, FailurePredicate};
pub use error::CircuitBreakerError;
pub use registry::CircuitBreakerRegistry;
pub use settings::{CircuitBreakerSettings, ResilienceSettings};
pub use stats::{CircuitBreakerStats, StateChange};
