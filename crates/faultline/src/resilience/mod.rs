//! Resilience primitives: circuit breaking and bounded retries.
//!
//! Both primitives speak [`Fault`](crate::fault::Fault) at their boundaries
//! so terminal failures propagate unchanged and classification upstream stays
//! accurate.

use thiserror::Error;

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerBuilder, BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use retry::{
    RetryCondition, RetryExecutor, RetryOutcome, RetryPolicy, RetrySession,
};

/// Configuration validation error for resilience components.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;
