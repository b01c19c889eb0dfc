//! Per-dependency circuit breaker.
//!
//! The breaker guards calls to an unreliable dependency: repeated counted
//! failures open the circuit, open circuits reject calls without invoking the
//! dependency, and after a cooldown a single half-open probe decides whether
//! to close again. Exemption predicates let callers exclude known-benign
//! failures (validation rejections, for example) from tripping the breaker.
//!
//! HALF_OPEN probes are serialized: exactly one trial call may be in flight;
//! concurrent callers fail fast with a circuit-open fault rather than piling
//! onto a recovering dependency.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::fault::Fault;

use super::{ConfigError, ConfigResult};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, calls pass through.
    Closed,
    /// Circuit is open, calls are rejected without invoking the dependency.
    Open,
    /// Circuit allows a single probe call to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Counted failures before the circuit opens.
    pub failure_threshold: u32,
    /// Cooldown before an open circuit admits a half-open probe.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_secs(60) }
    }
}

impl BreakerConfig {
    /// Create a config with explicit values.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self { failure_threshold, reset_timeout }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.reset_timeout.is_zero() {
            return Err(ConfigError::invalid("reset_timeout must be greater than 0"));
        }
        Ok(())
    }
}

/// Predicate marking faults that must not count toward the failure threshold.
pub type ExemptPredicate = Arc<dyn Fn(&Fault) -> bool + Send + Sync>;

/// Callback invoked after every state transition with the new state.
///
/// The hook runs outside the breaker's internal lock but must not call back
/// into the breaker.
pub type StateChangeHook = Arc<dyn Fn(CircuitState) + Send + Sync>;

/// Point-in-time view of a breaker, cheap to serialize for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u64,
    pub total_calls: u64,
    pub rejected_calls: u64,
    /// Time since the most recent counted failure.
    pub last_failure_age: Option<Duration>,
    /// Remaining cooldown before the next half-open probe, when open.
    pub retry_after: Option<Duration>,
}

impl fmt::Display for BreakerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CircuitBreaker[{} state={}, failures={}, successes={}",
            self.name, self.state, self.failures, self.successes
        )?;
        if let Some(retry) = self.retry_after {
            write!(f, ", retry_after={:?}", retry)?;
        }
        write!(f, "]")
    }
}

struct StateInner {
    state: CircuitState,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
}

/// Per-dependency CLOSED/OPEN/HALF_OPEN state machine.
///
/// One instance guards one named dependency; the manager keeps them in a
/// registry for the process lifetime. All operations take `&self`; wrap in an
/// `Arc` to share.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: BreakerConfig,
    inner: Mutex<StateInner>,
    failures: AtomicU32,
    successes: AtomicU64,
    total_calls: AtomicU64,
    rejected_calls: AtomicU64,
    trial_in_flight: AtomicBool,
    exempt: Vec<ExemptPredicate>,
    on_state_change: Option<StateChangeHook>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .field("failures", &self.failures.load(Ordering::Acquire))
            .finish()
    }
}

/// Exclusive half-open probe slot. Released exactly once: explicitly after
/// the probe outcome is recorded, or on drop if the probe future was
/// cancelled mid-flight.
struct TrialPermit<'a> {
    flag: &'a AtomicBool,
    released: bool,
}

impl TrialPermit<'_> {
    fn release(mut self) {
        self.released = true;
        self.flag.store(false, Ordering::Release);
    }
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.flag.store(false, Ordering::Release);
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker with the given configuration and system clock.
    pub fn new<S: Into<String>>(name: S, config: BreakerConfig) -> ConfigResult<Self> {
        BreakerBuilder::new(name).config(config).build()
    }

    /// Create a breaker with default configuration.
    pub fn with_defaults<S: Into<String>>(name: S) -> Self {
        // The default config passes validation by construction.
        BreakerBuilder::new(name).build().expect("default breaker config is valid")
    }

    /// Start building a breaker.
    pub fn builder<S: Into<String>>(name: S) -> BreakerBuilder<SystemClock> {
        BreakerBuilder::new(name)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// The dependency name this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Execute an operation under breaker protection.
    ///
    /// Rejections return [`Fault::CircuitOpen`] without invoking the
    /// operation. Operation failures propagate unchanged after being
    /// recorded.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, Fault>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        let permit = match self.try_acquire() {
            Ok(permit) => permit,
            Err(retry_after) => {
                self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                debug!(breaker = %self.name, "circuit breaker rejecting call");
                return Err(Fault::circuit_open(self.name.as_str(), retry_after));
            }
        };

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(fault) => self.record_failure(fault),
        }
        if let Some(permit) = permit {
            permit.release();
        }
        result
    }

    /// Decide whether a call may proceed. Returns a trial permit when the
    /// call is the half-open probe, or the remaining cooldown on rejection.
    fn try_acquire(&self) -> Result<Option<TrialPermit<'_>>, Option<Duration>> {
        enum Decision {
            Pass,
            Probe { transitioned: bool },
            Reject(Option<Duration>),
        }

        let decision = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => Decision::Pass,
                CircuitState::Open => {
                    let now = self.clock.now();
                    match inner.next_attempt_at {
                        Some(at) if now < at => Decision::Reject(Some(at - now)),
                        _ => {
                            inner.state = CircuitState::HalfOpen;
                            self.trial_in_flight.store(true, Ordering::Release);
                            Decision::Probe { transitioned: true }
                        }
                    }
                }
                CircuitState::HalfOpen => {
                    let claimed = self
                        .trial_in_flight
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok();
                    if claimed {
                        Decision::Probe { transitioned: false }
                    } else {
                        Decision::Reject(None)
                    }
                }
            }
        };

        match decision {
            Decision::Pass => Ok(None),
            Decision::Probe { transitioned } => {
                if transitioned {
                    self.notify_transition(CircuitState::HalfOpen);
                }
                Ok(Some(TrialPermit { flag: &self.trial_in_flight, released: false }))
            }
            Decision::Reject(retry_after) => Err(retry_after),
        }
    }

    /// Record a successful call: resets the failure counter and closes a
    /// half-open circuit.
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.failures.store(0, Ordering::Release);

        let transitioned = {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::HalfOpen {
                inner.state = CircuitState::Closed;
                inner.next_attempt_at = None;
                true
            } else {
                false
            }
        };
        if transitioned {
            info!(breaker = %self.name, "circuit breaker closed after successful probe");
            self.notify_transition(CircuitState::Closed);
        }
    }

    /// Record a failed call. Exempt faults propagate without counting; a
    /// counted failure may open the circuit.
    pub fn record_failure(&self, fault: &Fault) {
        if self.is_exempt(fault) {
            debug!(breaker = %self.name, "exempt failure, not counted");
            return;
        }

        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        let now = self.clock.now();

        let transitioned = {
            let mut inner = self.inner.lock();
            inner.last_failure_at = Some(now);
            let open = match inner.state {
                CircuitState::Closed => failures >= self.config.failure_threshold,
                CircuitState::HalfOpen => true,
                CircuitState::Open => false,
            };
            if open {
                inner.state = CircuitState::Open;
                inner.next_attempt_at = Some(now + self.config.reset_timeout);
            }
            open
        };
        if transitioned {
            warn!(breaker = %self.name, failures, "circuit breaker opened");
            self.notify_transition(CircuitState::Open);
        }
    }

    /// Force the breaker back to CLOSED with zero counters. Manual recovery
    /// escape hatch.
    pub fn reset(&self) {
        self.failures.store(0, Ordering::Release);
        self.successes.store(0, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);

        let transitioned = {
            let mut inner = self.inner.lock();
            inner.last_failure_at = None;
            inner.next_attempt_at = None;
            if inner.state != CircuitState::Closed {
                inner.state = CircuitState::Closed;
                true
            } else {
                false
            }
        };
        info!(breaker = %self.name, "circuit breaker manually reset");
        if transitioned {
            self.notify_transition(CircuitState::Closed);
        }
    }

    /// Point-in-time metrics view.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let (state, last_failure_at, next_attempt_at) = {
            let inner = self.inner.lock();
            (inner.state, inner.last_failure_at, inner.next_attempt_at)
        };
        let now = self.clock.now();
        BreakerSnapshot {
            name: self.name.clone(),
            state,
            failures: self.failures.load(Ordering::Acquire),
            successes: self.successes.load(Ordering::Acquire),
            total_calls: self.total_calls.load(Ordering::Acquire),
            rejected_calls: self.rejected_calls.load(Ordering::Acquire),
            last_failure_age: last_failure_at.map(|at| now.saturating_duration_since(at)),
            retry_after: next_attempt_at.and_then(|at| at.checked_duration_since(now)),
        }
    }

    fn is_exempt(&self, fault: &Fault) -> bool {
        self.exempt.iter().any(|predicate| predicate(fault))
    }

    fn notify_transition(&self, state: CircuitState) {
        if let Some(hook) = &self.on_state_change {
            hook(state);
        }
    }
}

/// Builder for [`CircuitBreaker`], following the config-builder-with-
/// validation pattern used across this crate.
pub struct BreakerBuilder<C: Clock = SystemClock> {
    name: String,
    config: BreakerConfig,
    exempt: Vec<ExemptPredicate>,
    on_state_change: Option<StateChangeHook>,
    clock: C,
}

impl BreakerBuilder<SystemClock> {
    /// Start a builder for the named dependency.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            config: BreakerConfig::default(),
            exempt: Vec::new(),
            on_state_change: None,
            clock: SystemClock,
        }
    }
}

impl<C: Clock> BreakerBuilder<C> {
    /// Replace the whole configuration.
    pub fn config(mut self, config: BreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Counted failures before the circuit opens.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Cooldown before an open circuit admits a probe.
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    /// Exclude faults matching the predicate from the failure count.
    pub fn exempt_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Fault) -> bool + Send + Sync + 'static,
    {
        self.exempt.push(Arc::new(predicate));
        self
    }

    /// Observe state transitions.
    pub fn on_state_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(hook));
        self
    }

    /// Use a custom clock (deterministic tests).
    pub fn clock<C2: Clock>(self, clock: C2) -> BreakerBuilder<C2> {
        BreakerBuilder {
            name: self.name,
            config: self.config,
            exempt: self.exempt,
            on_state_change: self.on_state_change,
            clock,
        }
    }

    /// Validate the configuration and build the breaker.
    pub fn build(self) -> ConfigResult<CircuitBreaker<C>> {
        self.config.validate()?;
        Ok(CircuitBreaker {
            name: self.name,
            config: self.config,
            inner: Mutex::new(StateInner {
                state: CircuitState::Closed,
                last_failure_at: None,
                next_attempt_at: None,
            }),
            failures: AtomicU32::new(0),
            successes: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            trial_in_flight: AtomicBool::new(false),
            exempt: self.exempt,
            on_state_change: self.on_state_change,
            clock: self.clock,
        })
    }
}
