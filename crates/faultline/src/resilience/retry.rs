//! Bounded retries with exponential backoff and jitter.
//!
//! [`RetryExecutor::with_retry`] drives an operation under a [`RetryPolicy`]:
//! attempts are strictly sequential, the delay before attempt `k + 1` is
//! `min(initial_delay * backoff_factor^(k-1), max_delay)` (optionally scaled
//! by 0.5–1.0 jitter so simultaneous failures don't retry in lockstep), and
//! on exhaustion the last observed fault is returned unchanged so upstream
//! classification stays accurate.
//!
//! While an operation is in flight, its session (attempt count, start time,
//! last error) is visible through [`RetryExecutor::active_sessions`]; the
//! entry is removed by a drop guard on every exit path, including
//! cancellation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::fault::Fault;

use super::{ConfigError, ConfigResult};

/// Decides whether a failed attempt should be retried.
pub enum RetryCondition {
    /// Retry any failure, up to the attempt limit.
    Always,
    /// Retry only when the predicate accepts the fault and attempt number.
    Custom(Arc<dyn Fn(&Fault, u32) -> bool + Send + Sync>),
}

impl Clone for RetryCondition {
    fn clone(&self) -> Self {
        match self {
            Self::Always => Self::Always,
            Self::Custom(predicate) => Self::Custom(Arc::clone(predicate)),
        }
    }
}

impl fmt::Debug for RetryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::Custom(_) => write!(f, "Custom(<predicate>)"),
        }
    }
}

impl Default for RetryCondition {
    fn default() -> Self {
        Self::Always
    }
}

/// Hook invoked with the fault and attempt number before each backoff wait.
pub type RetryHook = Arc<dyn Fn(&Fault, u32) + Send + Sync>;

/// Retry behavior for one call. A value object, validated on construction,
/// never persisted.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total invocations are
    /// `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Cap on the computed backoff delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Scale each delay by uniform(0.5, 1.0) to spread synchronized retries.
    pub jitter: bool,
    retry_on: RetryCondition,
    on_retry: Option<RetryHook>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .field("retry_on", &self.retry_on)
            .field("has_on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetryPolicy {
    /// Create a validated policy. Jitter is enabled; use
    /// [`with_jitter`](Self::with_jitter) to disable it for deterministic
    /// timing.
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> ConfigResult<Self> {
        if initial_delay > max_delay {
            return Err(ConfigError::invalid(format!(
                "initial_delay ({:?}) cannot be greater than max_delay ({:?})",
                initial_delay, max_delay
            )));
        }
        if backoff_factor <= 0.0 {
            return Err(ConfigError::invalid("backoff_factor must be greater than 0"));
        }
        Ok(Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_factor,
            jitter: true,
            retry_on: RetryCondition::Always,
            on_retry: None,
        })
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Retry only when the predicate accepts the fault and attempt number.
    pub fn retry_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Fault, u32) -> bool + Send + Sync + 'static,
    {
        self.retry_on = RetryCondition::Custom(Arc::new(predicate));
        self
    }

    /// Observe each retry decision before the backoff wait.
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Fault, u32) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Whether a custom retry condition has been set.
    pub fn has_custom_condition(&self) -> bool {
        matches!(self.retry_on, RetryCondition::Custom(_))
    }

    /// Whether the given failure of attempt `attempt` (1-based) should be
    /// retried, ignoring the attempt limit.
    pub fn should_retry(&self, fault: &Fault, attempt: u32) -> bool {
        match &self.retry_on {
            RetryCondition::Always => true,
            RetryCondition::Custom(predicate) => predicate(fault, attempt),
        }
    }

    /// The exact backoff delay after attempt `attempt` (1-based), without
    /// jitter: `min(initial_delay * backoff_factor^(attempt-1), max_delay)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64;
        let cap = self.max_delay.as_millis() as f64;
        // Exponent capped to keep powi finite for absurd attempt counts.
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let millis = (base * self.backoff_factor.powi(exponent)).min(cap);
        Duration::from_millis(millis as u64)
    }

    /// The delay actually slept after attempt `attempt`, with jitter applied
    /// when enabled.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if !self.jitter {
            return delay;
        }
        let scale: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        Duration::from_millis((delay.as_millis() as f64 * scale) as u64)
    }

    fn notify_retry(&self, fault: &Fault, attempt: u32) {
        if let Some(hook) = &self.on_retry {
            hook(fault, attempt);
        }
    }

    // Presets. `fast` is pinned by its documented contract; the rest are
    // tuned for their named workloads.

    /// Quick operations: 3 retries, 100 ms initial, 1 s cap, x2 backoff.
    pub fn fast() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            jitter: true,
            retry_on: RetryCondition::Always,
            on_retry: None,
        }
    }

    /// General-purpose default: 3 retries, 500 ms initial, 15 s cap.
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
            jitter: true,
            retry_on: RetryCondition::Always,
            on_retry: None,
        }
    }

    /// Long-running or slow-recovering work: 5 retries, 2 s initial, 60 s
    /// cap.
    pub fn patient() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: true,
            retry_on: RetryCondition::Always,
            on_retry: None,
        }
    }

    /// Remote calls: retries only connectivity-shaped faults.
    pub fn network() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: true,
            retry_on: RetryCondition::Custom(Arc::new(|fault, _attempt| {
                matches!(
                    fault,
                    Fault::Network { .. } | Fault::Timeout { .. } | Fault::CircuitOpen { .. }
                ) || matches!(fault, Fault::Other { status: Some(status), .. } if *status >= 500)
            })),
            on_retry: None,
        }
    }

    /// Storage operations: retries contention-shaped faults only.
    pub fn database() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter: true,
            retry_on: RetryCondition::Custom(Arc::new(|fault, _attempt| {
                let message = fault.message().to_lowercase();
                matches!(fault, Fault::Timeout { .. })
                    || ["lock", "busy", "deadlock", "contention"]
                        .iter()
                        .any(|needle| message.contains(needle))
            })),
            on_retry: None,
        }
    }
}

/// An in-flight retried operation, visible while it runs.
#[derive(Debug, Clone, Serialize)]
pub struct RetrySession {
    pub operation_id: String,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Result of a retried call plus summary statistics.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, Fault>,
    /// Total invocations of the operation.
    pub attempts: u32,
    /// Accumulated backoff delay across attempts.
    pub total_delay: Duration,
}

/// Drives operations through retry policies and tracks in-flight sessions.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    sessions: Arc<DashMap<String, RetrySession>>,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute under the policy with a generated operation id.
    pub async fn with_retry<F, Fut, T>(&self, policy: &RetryPolicy, operation: F) -> Result<T, Fault>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        let operation_id = Uuid::new_v4().to_string();
        self.with_retry_outcome(&operation_id, policy, operation).await.result
    }

    /// Execute under the policy with a caller-supplied operation id.
    pub async fn with_retry_as<F, Fut, T>(
        &self,
        operation_id: &str,
        policy: &RetryPolicy,
        operation: F,
    ) -> Result<T, Fault>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        self.with_retry_outcome(operation_id, policy, operation).await.result
    }

    /// Execute under the policy and return the outcome statistics alongside
    /// the result.
    pub async fn with_retry_outcome<F, Fut, T>(
        &self,
        operation_id: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        self.sessions.insert(
            operation_id.to_string(),
            RetrySession {
                operation_id: operation_id.to_string(),
                attempts: 0,
                started_at: Utc::now(),
                last_error: None,
            },
        );
        // Removes the session on every exit path, including cancellation.
        let _guard = SessionGuard { sessions: &self.sessions, id: operation_id.to_string() };

        let mut attempt: u32 = 1;
        let mut total_delay = Duration::ZERO;

        loop {
            if let Some(mut session) = self.sessions.get_mut(operation_id) {
                session.attempts = attempt;
            }

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation_id, attempt, "operation succeeded after retries");
                    }
                    return RetryOutcome { result: Ok(value), attempts: attempt, total_delay };
                }
                Err(fault) => {
                    if let Some(mut session) = self.sessions.get_mut(operation_id) {
                        session.last_error = Some(fault.to_string());
                    }

                    if attempt > policy.max_retries {
                        warn!(
                            operation_id,
                            attempts = attempt,
                            error = %fault,
                            "retry attempts exhausted"
                        );
                        return RetryOutcome { result: Err(fault), attempts: attempt, total_delay };
                    }
                    if !policy.should_retry(&fault, attempt) {
                        debug!(operation_id, attempt, error = %fault, "fault not retryable");
                        return RetryOutcome { result: Err(fault), attempts: attempt, total_delay };
                    }

                    policy.notify_retry(&fault, attempt);
                    let delay = policy.delay_for(attempt);
                    warn!(operation_id, attempt, ?delay, "operation failed, backing off");
                    tokio::time::sleep(delay).await;
                    total_delay += delay;
                    attempt += 1;
                }
            }
        }
    }

    /// Sessions currently in flight.
    pub fn active_sessions(&self) -> Vec<RetrySession> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of sessions currently in flight.
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}

struct SessionGuard<'a> {
    sessions: &'a DashMap<String, RetrySession>,
    id: String,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
    }
}
