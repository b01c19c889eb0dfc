//! Faultline: an in-process error classification, circuit breaking, and
//! retry core.
//!
//! The crate is organized leaf-first:
//! - [`fault`]: the closed boundary representation external errors convert
//!   into.
//! - [`classify`]: ordered first-match classification with a conservative
//!   fallback.
//! - [`resilience`]: the per-dependency circuit breaker and the bounded
//!   retry executor.
//! - [`events`]: observer registration plus a bounded queue of recent
//!   notifications.
//! - [`manager`]: the façade that classifies, records, composes
//!   timeout/breaker/retry protection, and derives statistics and a health
//!   score.
//!
//! # Example
//!
//! ```rust,no_run
//! use faultline::{ErrorContext, Fault, FaultManager, RetryPolicy, RunOptions};
//!
//! # async fn demo() -> Result<(), Fault> {
//! let manager = FaultManager::with_defaults();
//!
//! let value = manager
//!     .run(
//!         || async { Ok::<_, Fault>(42) },
//!         ErrorContext::new("fetch_profile", "accounts"),
//!         RunOptions::new()
//!             .with_timeout(std::time::Duration::from_secs(2))
//!             .with_breaker("accounts-api")
//!             .with_retry(RetryPolicy::network()),
//!     )
//!     .await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod classify;
pub mod clock;
pub mod context;
pub mod events;
pub mod fault;
pub mod manager;
pub mod resilience;

// Re-export the commonly used types for convenience
// ------------------------
pub use classify::{Classification, Classifier, ClassifyRule, FaultKind, Severity};
pub use clock::{Clock, MockClock, SystemClock};
pub use context::ErrorContext;
pub use events::{EventBus, FaultEvent, FaultObserver, NoOpObserver};
pub use fault::{error_chain, Fault, FaultResult};
pub use manager::{
    EnvironmentSnapshot, FaultManager, FaultReport, FaultStatistics, HandleOptions, HealthMetrics,
    HealthReport, HealthStatus, ManagerConfig, RunOptions, TopError,
};
pub use resilience::{
    BreakerBuilder, BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState, ConfigError,
    ConfigResult, RetryCondition, RetryExecutor, RetryOutcome, RetryPolicy, RetrySession,
};
