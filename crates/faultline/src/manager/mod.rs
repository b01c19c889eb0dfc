//! Top-level façade over classification, reporting, and resilience.
//!
//! A [`FaultManager`] is constructed once at application startup and handed
//! to every component that needs error handling; it is cheap to clone (all
//! state lives behind an `Arc`). There is deliberately no global instance.
//!
//! The manager owns the bounded report log, the per-dependency circuit
//! breaker registry, the retry executor, and the event bus. Operations are
//! composed through [`FaultManager::run`]: an optional timeout race inside an
//! optional named circuit breaker inside an optional retry policy, with every
//! terminal failure classified and recorded exactly once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::classify::{Classification, Classifier, ClassifyRule};
use crate::context::ErrorContext;
use crate::events::{EventBus, FaultEvent, FaultObserver};
use crate::fault::{error_chain, Fault};
use crate::resilience::{
    BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState, ConfigError, ConfigResult,
    RetryExecutor, RetryPolicy, RetrySession,
};

pub mod report;
pub mod stats;

pub use report::{EnvironmentSnapshot, FaultReport};
pub use stats::{FaultStatistics, HealthMetrics, HealthReport, HealthStatus, TopError};

use report::ReportLog;
use stats::{build_health_report, compute_statistics, is_critical};

/// Manager-wide configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Capacity of the bounded report log; oldest reports are evicted first.
    pub max_reports: usize,
    /// Capacity of the recent-event queue.
    pub event_capacity: usize,
    /// Configuration applied to breakers created without an explicit one.
    pub default_breaker: BreakerConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_reports: 10_000,
            event_capacity: 1_024,
            default_breaker: BreakerConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_reports == 0 {
            return Err(ConfigError::invalid("max_reports must be greater than 0"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::invalid("event_capacity must be greater than 0"));
        }
        self.default_breaker.validate()
    }
}

/// Options for recording a failure directly.
#[derive(Debug, Clone)]
pub struct HandleOptions {
    pub tags: Vec<String>,
    /// Whether a critical failure also raises the alerting side-channel.
    pub notify: bool,
    /// Operation invocations that led to this failure.
    pub attempts: u32,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self { tags: Vec::new(), notify: true, attempts: 1 }
    }
}

/// Options for [`FaultManager::run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Race the operation against this deadline; expiry fails the attempt
    /// with a timeout fault. The losing future is dropped, not aborted
    /// in-place, so operations needing hard reclamation must be cancellable
    /// themselves.
    pub timeout: Option<Duration>,
    /// Route attempts through the named circuit breaker, created lazily on
    /// first use.
    pub circuit_breaker: Option<String>,
    /// Configuration for the breaker if this call creates it.
    pub breaker_config: Option<BreakerConfig>,
    /// Retry the composed operation under this policy.
    pub retry: Option<RetryPolicy>,
    pub tags: Vec<String>,
    pub notify: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            circuit_breaker: None,
            breaker_config: None,
            retry: None,
            tags: Vec::new(),
            notify: true,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_breaker<S: Into<String>>(mut self, name: S) -> Self {
        self.circuit_breaker = Some(name.into());
        self
    }

    pub fn with_breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker_config = Some(config);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Suppress the critical alerting side-channel for this call.
    pub fn silent(mut self) -> Self {
        self.notify = false;
        self
    }
}

struct ManagerInner {
    config: ManagerConfig,
    classifier: RwLock<Classifier>,
    reports: Mutex<ReportLog>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    retries: RetryExecutor,
    events: Arc<EventBus>,
    started_at: Instant,
}

/// The error-handling façade. Clone freely; clones share all state.
#[derive(Clone)]
pub struct FaultManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for FaultManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultManager")
            .field("reports", &self.inner.reports.lock().len())
            .field("breakers", &self.inner.breakers.len())
            .field("active_retries", &self.inner.retries.active_count())
            .finish()
    }
}

impl FaultManager {
    /// Create a manager with a validated configuration.
    pub fn new(config: ManagerConfig) -> ConfigResult<Self> {
        config.validate()?;
        let event_capacity = config.event_capacity;
        let max_reports = config.max_reports;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                classifier: RwLock::new(Classifier::new()),
                reports: Mutex::new(ReportLog::new(max_reports)),
                breakers: DashMap::new(),
                retries: RetryExecutor::new(),
                events: Arc::new(EventBus::new(event_capacity)),
                started_at: Instant::now(),
            }),
        })
    }

    /// Create a manager with default configuration.
    pub fn with_defaults() -> Self {
        // The default config passes validation by construction.
        Self::new(ManagerConfig::default()).expect("default manager config is valid")
    }

    /// Time since this manager was constructed.
    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// Classify a fault without recording it.
    pub fn classify(&self, fault: &Fault) -> Classification {
        self.inner.classifier.read().classify(fault)
    }

    /// Register a classification rule ahead of the built-ins.
    pub fn add_rule(&self, rule: ClassifyRule) {
        self.inner.classifier.write().add_rule(rule);
    }

    /// Register an observer for all future events.
    pub fn subscribe(&self, observer: Arc<dyn FaultObserver>) {
        self.inner.events.subscribe(observer);
    }

    /// Recent events, newest first.
    pub fn recent_events(&self, limit: usize) -> Vec<FaultEvent> {
        self.inner.events.recent_events(limit)
    }

    /// Classify and record a failure, returning the stored report.
    ///
    /// Emits `error_occurred`, and `critical_error` for critical severities;
    /// with `notify` enabled a critical failure also logs through the
    /// alerting stub.
    pub fn handle(&self, fault: Fault, context: ErrorContext, options: HandleOptions) -> FaultReport {
        let classification = self.classify(&fault);
        let source_chain = error_chain(&fault);
        let report = FaultReport {
            id: Uuid::new_v4(),
            message: fault.to_string(),
            fault,
            classification: classification.clone(),
            context,
            source_chain,
            environment: EnvironmentSnapshot::capture(self.uptime()),
            attempts: options.attempts,
            resolved: false,
            resolution_time: None,
            resolution: None,
            tags: options.tags,
        };

        self.inner.reports.lock().push(report.clone());
        debug!(
            report_id = %report.id,
            kind = %classification.kind,
            severity = %classification.severity,
            operation = %report.context.operation,
            "failure recorded"
        );

        self.inner.events.publish(FaultEvent::ErrorOccurred {
            report_id: report.id,
            kind: classification.kind,
            severity: classification.severity,
            operation: report.context.operation.clone(),
            service: report.context.service.clone(),
            timestamp: Utc::now(),
        });

        if is_critical(classification.severity) {
            self.inner.events.publish(FaultEvent::CriticalError {
                report_id: report.id,
                message: report.message.clone(),
                service: report.context.service.clone(),
                timestamp: Utc::now(),
            });
            if options.notify {
                // Alerting stub: bridge to a pager or incident channel by
                // subscribing to critical_error events.
                error!(
                    report_id = %report.id,
                    service = %report.context.service,
                    failure = %report.message,
                    "critical failure recorded"
                );
            }
        }

        report
    }

    /// Execute an operation with composed protection: an optional timeout
    /// race, inside an optional named circuit breaker, inside an optional
    /// retry policy (so every attempt passes through the breaker).
    ///
    /// A retry policy without a custom condition retries only faults whose
    /// classification is retryable; validation and authorization failures
    /// are recorded and returned immediately.
    ///
    /// Any terminal failure is recorded via [`handle`](Self::handle) exactly
    /// once before being returned.
    pub async fn run<T, F, Fut>(
        &self,
        mut operation: F,
        context: ErrorContext,
        options: RunOptions,
    ) -> Result<T, Fault>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        let retry = options.retry.clone().map(|policy| {
            if policy.has_custom_condition() {
                policy
            } else {
                let classifier_handle = self.clone();
                policy
                    .retry_when(move |fault, _attempt| classifier_handle.classify(fault).retryable)
            }
        });
        let breaker = options
            .circuit_breaker
            .as_deref()
            .map(|name| self.breaker(name, options.breaker_config.clone()));
        let timeout = options.timeout;
        let label = context.operation.clone();

        let mut attempt = move || {
            let fut = operation();
            let breaker = breaker.clone();
            let label = label.clone();
            async move {
                let guarded = async move {
                    match timeout {
                        Some(limit) => match tokio::time::timeout(limit, fut).await {
                            Ok(result) => result,
                            Err(_) => Err(Fault::timeout(label, limit)),
                        },
                        None => fut.await,
                    }
                };
                match breaker {
                    Some(breaker) => breaker.execute(move || guarded).await,
                    None => guarded.await,
                }
            }
        };

        let (result, attempts) = match &retry {
            Some(policy) => {
                let operation_id = format!("{}-{}", context.operation, Uuid::new_v4());
                let outcome =
                    self.inner.retries.with_retry_outcome(&operation_id, policy, attempt).await;
                (outcome.result, outcome.attempts)
            }
            None => (attempt().await, 1),
        };

        match result {
            Ok(value) => Ok(value),
            Err(fault) => {
                let handle_options =
                    HandleOptions { tags: options.tags, notify: options.notify, attempts };
                self.handle(fault.clone(), context, handle_options);
                Err(fault)
            }
        }
    }

    /// Get or lazily create the named circuit breaker.
    ///
    /// Manager-created breakers exempt validation faults from the failure
    /// count: a rejected input says nothing about dependency health. State
    /// changes are forwarded to the event bus.
    fn breaker(&self, name: &str, config: Option<BreakerConfig>) -> Arc<CircuitBreaker> {
        let entry = self.inner.breakers.entry(name.to_string()).or_insert_with(|| {
            let config = match config {
                Some(config) => match config.validate() {
                    Ok(()) => config,
                    Err(err) => {
                        warn!(breaker = name, %err, "invalid breaker config, using defaults");
                        self.inner.config.default_breaker.clone()
                    }
                },
                None => self.inner.config.default_breaker.clone(),
            };

            let events = Arc::clone(&self.inner.events);
            let breaker_name = name.to_string();
            Arc::new(
                CircuitBreaker::builder(name)
                    .config(config)
                    .exempt_when(|fault| matches!(fault, Fault::Validation { .. }))
                    .on_state_change(move |state| {
                        events.publish(FaultEvent::CircuitBreakerStateChanged {
                            name: breaker_name.clone(),
                            state,
                            timestamp: Utc::now(),
                        });
                    })
                    .build()
                    // The config was validated or replaced by the default.
                    .expect("validated breaker config"),
            )
        });
        Arc::clone(entry.value())
    }

    /// Aggregate statistics over the report log, optionally restricted to
    /// reports whose context timestamp falls within the trailing `window`.
    /// The rate denominator is the window, or one hour when unfiltered.
    pub fn statistics(&self, window: Option<Duration>) -> FaultStatistics {
        let log = self.inner.reports.lock();
        match window {
            Some(window) => {
                let span = chrono::Duration::from_std(window)
                    .unwrap_or_else(|_| chrono::Duration::hours(1));
                let cutoff = Utc::now()
                    .checked_sub_signed(span)
                    .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
                compute_statistics(
                    log.iter().filter(|report| report.context.timestamp >= cutoff),
                    window.as_secs_f64() / 60.0,
                )
            }
            None => compute_statistics(log.iter(), 60.0),
        }
    }

    /// Mark a report resolved. Idempotent: returns true only the first time
    /// an existing report is resolved.
    pub fn resolve(&self, id: Uuid, resolution: Option<&str>) -> bool {
        let event = {
            let mut log = self.inner.reports.lock();
            match log.find_mut(id) {
                Some(report) if !report.resolved => {
                    report.resolved = true;
                    report.resolution_time = Some(Utc::now());
                    report.resolution = resolution.map(str::to_string);
                    Some(FaultEvent::ErrorResolved {
                        report_id: id,
                        resolution: report.resolution.clone(),
                        timestamp: Utc::now(),
                    })
                }
                _ => None,
            }
        };

        match event {
            Some(event) => {
                self.inner.events.publish(event);
                true
            }
            None => false,
        }
    }

    /// The newest reports, up to `limit`.
    pub fn recent(&self, limit: usize) -> Vec<FaultReport> {
        self.inner.reports.lock().recent(limit)
    }

    /// Number of buffered reports.
    pub fn report_count(&self) -> usize {
        self.inner.reports.lock().len()
    }

    /// Snapshots of every breaker created so far.
    pub fn breaker_status(&self) -> HashMap<String, BreakerSnapshot> {
        self.inner
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Force the named breaker back to CLOSED. Returns false when no such
    /// breaker exists.
    pub fn reset_breaker(&self, name: &str) -> bool {
        match self.inner.breakers.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Retry sessions currently in flight.
    pub fn active_retries(&self) -> Vec<RetrySession> {
        self.inner.retries.active_sessions()
    }

    /// Derive the heuristic health report from the last hour of reports,
    /// breaker states, and retry pressure.
    pub fn health_report(&self) -> HealthReport {
        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        let (errors_last_hour, critical_last_hour, buffered_reports) = {
            let log = self.inner.reports.lock();
            let mut errors = 0usize;
            let mut critical = 0usize;
            for report in log.iter().filter(|report| report.context.timestamp >= hour_ago) {
                errors += 1;
                if is_critical(report.classification.severity) {
                    critical += 1;
                }
            }
            (errors, critical, log.len())
        };

        let mut open_breakers: Vec<String> = self
            .inner
            .breakers
            .iter()
            .filter(|entry| entry.value().state() == CircuitState::Open)
            .map(|entry| entry.key().clone())
            .collect();
        open_breakers.sort();

        build_health_report(HealthMetrics {
            errors_last_hour,
            critical_last_hour,
            open_breakers,
            active_retries: self.inner.retries.active_count(),
            buffered_reports,
            uptime: self.uptime(),
        })
    }
}
