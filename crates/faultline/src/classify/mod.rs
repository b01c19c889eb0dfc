//! Fault classification.
//!
//! [`Classifier::classify`] maps a [`Fault`] to a [`Classification`]
//! deterministically: custom rules first (in registration order, newest
//! first), then the built-in predicate rules for untyped faults, then the
//! structured table for tagged variants, then the conservative fallback.
//! Classification is a pure function: same input, same output, and it never
//! fails.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::fault::Fault;

/// The taxonomy a fault is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Transient,
    Permanent,
    Timeout,
    Network,
    Authentication,
    Authorization,
    Validation,
    Business,
    System,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Validation => "validation",
            Self::Business => "business",
            Self::System => "system",
        };
        write!(f, "{}", name)
    }
}

/// Severity levels for monitoring and alerting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// The outcome of classifying a fault. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: FaultKind,
    pub severity: Severity,
    pub retryable: bool,
    pub category: String,
    pub description: String,
}

impl Classification {
    /// Build a classification value.
    pub fn new<C: Into<String>, D: Into<String>>(
        kind: FaultKind,
        severity: Severity,
        retryable: bool,
        category: C,
        description: D,
    ) -> Self {
        Self {
            kind,
            severity,
            retryable,
            category: category.into(),
            description: description.into(),
        }
    }

    /// The conservative fallback for faults no rule recognizes. Unknown
    /// errors are not retried automatically.
    pub fn fallback() -> Self {
        Self::new(
            FaultKind::System,
            Severity::Medium,
            false,
            "unknown",
            "Unrecognized error; not retried automatically",
        )
    }
}

/// Predicate over a fault, shared so rules stay cheap to clone.
type RulePredicate = Arc<dyn Fn(&Fault) -> bool + Send + Sync>;

/// A single classification rule: a named predicate and the classification it
/// produces on match.
#[derive(Clone)]
pub struct ClassifyRule {
    name: String,
    matches: RulePredicate,
    classification: Classification,
}

impl ClassifyRule {
    /// Create a rule from a predicate and the classification it yields.
    pub fn new<N, F>(name: N, matches: F, classification: Classification) -> Self
    where
        N: Into<String>,
        F: Fn(&Fault) -> bool + Send + Sync + 'static,
    {
        Self { name: name.into(), matches: Arc::new(matches), classification }
    }

    /// The rule's name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ClassifyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifyRule")
            .field("name", &self.name)
            .field("classification", &self.classification)
            .finish()
    }
}

/// Ordered first-match classifier with prepend-only custom rules.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassifyRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    /// Create a classifier loaded with the built-in rules.
    pub fn new() -> Self {
        Self { rules: builtin_rules() }
    }

    /// Create a classifier with no rules at all; only the structured table
    /// and the fallback apply.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Register a rule ahead of every existing rule, so custom rules take
    /// precedence over built-ins. Rules cannot be removed.
    pub fn add_rule(&mut self, rule: ClassifyRule) {
        self.rules.insert(0, rule);
    }

    /// Number of registered rules (custom plus built-in).
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Classify a fault. Deterministic, total, side-effect free.
    pub fn classify(&self, fault: &Fault) -> Classification {
        for rule in &self.rules {
            if (rule.matches)(fault) {
                return rule.classification.clone();
            }
        }
        structured(fault).unwrap_or_else(Classification::fallback)
    }
}

/// Classification table for the tagged variants. `Other` is handled by the
/// predicate rules and returns `None` here.
fn structured(fault: &Fault) -> Option<Classification> {
    let classification = match fault {
        Fault::Network { .. } => Classification::new(
            FaultKind::Network,
            Severity::High,
            true,
            "connectivity",
            "Connection-level failure reaching a dependency",
        ),
        Fault::Timeout { .. } => Classification::new(
            FaultKind::Timeout,
            Severity::Medium,
            true,
            "timeout",
            "Operation exceeded its deadline",
        ),
        Fault::Authentication { .. } => Classification::new(
            FaultKind::Authentication,
            Severity::High,
            false,
            "auth",
            "Caller could not be identified",
        ),
        Fault::Authorization { .. } => Classification::new(
            FaultKind::Authorization,
            Severity::Medium,
            false,
            "auth",
            "Caller lacks permission for the operation",
        ),
        Fault::Validation { .. } => Classification::new(
            FaultKind::Validation,
            Severity::Low,
            false,
            "input",
            "Input rejected before any side effect",
        ),
        Fault::Business { .. } => Classification::new(
            FaultKind::Business,
            Severity::Medium,
            false,
            "business",
            "Domain rule rejected the operation",
        ),
        Fault::System { .. } => Classification::new(
            FaultKind::System,
            Severity::High,
            false,
            "system",
            "Internal failure",
        ),
        Fault::CircuitOpen { .. } => Classification::new(
            FaultKind::Transient,
            Severity::Medium,
            true,
            "availability",
            "Dependency shed load; safe to retry after cooldown",
        ),
        Fault::Other { .. } => return None,
    };
    Some(classification)
}

fn message_of(fault: &Fault) -> String {
    match fault {
        Fault::Other { message, .. } => message.to_lowercase(),
        other => other.to_string().to_lowercase(),
    }
}

fn code_matches(fault: &Fault, needles: &[&str]) -> bool {
    fault
        .code()
        .map(|code| {
            let code = code.to_lowercase();
            needles.iter().any(|needle| code.contains(needle))
        })
        .unwrap_or(false)
}

/// Built-in predicate rules, evaluated in order. These only fire for
/// [`Fault::Other`]; tagged variants are resolved by the structured table.
fn builtin_rules() -> Vec<ClassifyRule> {
    let only_other = |fault: &Fault| matches!(fault, Fault::Other { .. });

    vec![
        ClassifyRule::new(
            "integrity-loss",
            |fault| {
                let message = fault.message().to_lowercase();
                ["corrupt", "data loss", "integrity"].iter().any(|needle| message.contains(needle))
            },
            Classification::new(
                FaultKind::System,
                Severity::Critical,
                false,
                "integrity",
                "Possible data corruption or loss",
            ),
        ),
        ClassifyRule::new(
            "connection-failure",
            move |fault| {
                only_other(fault)
                    && (code_matches(
                        fault,
                        &["econnrefused", "econnreset", "epipe", "enotfound", "connection"],
                    ) || message_of(fault).contains("connection refused")
                        || message_of(fault).contains("connection reset"))
            },
            Classification::new(
                FaultKind::Network,
                Severity::High,
                true,
                "connectivity",
                "Connection-level failure reaching a dependency",
            ),
        ),
        ClassifyRule::new(
            "timed-out",
            move |fault| {
                only_other(fault)
                    && (code_matches(fault, &["etimedout", "timedout"])
                        || message_of(fault).contains("timed out")
                        || message_of(fault).contains("timeout"))
            },
            Classification::new(
                FaultKind::Timeout,
                Severity::Medium,
                true,
                "timeout",
                "Operation exceeded its deadline",
            ),
        ),
        ClassifyRule::new(
            "http-unauthorized",
            |fault| matches!(fault, Fault::Other { status: Some(401), .. }),
            Classification::new(
                FaultKind::Authentication,
                Severity::High,
                false,
                "auth",
                "Caller could not be identified",
            ),
        ),
        ClassifyRule::new(
            "http-forbidden",
            |fault| matches!(fault, Fault::Other { status: Some(403), .. }),
            Classification::new(
                FaultKind::Authorization,
                Severity::Medium,
                false,
                "auth",
                "Caller lacks permission for the operation",
            ),
        ),
        ClassifyRule::new(
            "http-invalid-input",
            |fault| matches!(fault, Fault::Other { status: Some(400 | 422), .. }),
            Classification::new(
                FaultKind::Validation,
                Severity::Low,
                false,
                "input",
                "Request rejected as invalid",
            ),
        ),
        ClassifyRule::new(
            "http-throttled",
            |fault| matches!(fault, Fault::Other { status: Some(429), .. }),
            Classification::new(
                FaultKind::Transient,
                Severity::Medium,
                true,
                "throttling",
                "Rate limited upstream; retry with backoff",
            ),
        ),
        ClassifyRule::new(
            "http-server-error",
            |fault| matches!(fault, Fault::Other { status: Some(status), .. } if *status >= 500),
            Classification::new(
                FaultKind::Transient,
                Severity::High,
                true,
                "upstream",
                "Upstream server failure; may recover",
            ),
        ),
        ClassifyRule::new(
            "network-message",
            move |fault| {
                only_other(fault)
                    && ["network", "dns", "socket"]
                        .iter()
                        .any(|needle| message_of(fault).contains(needle))
            },
            Classification::new(
                FaultKind::Network,
                Severity::High,
                true,
                "connectivity",
                "Network-shaped failure detected from the message",
            ),
        ),
    ]
}

#[cfg(test)]
mod tests {
    //! Unit tests for fault classification.
    //!
    //! Tests cover the structured table, the built-in predicate rules,
    //! ordered first-match semantics, custom rule precedence, and the
    //! conservative fallback.

    use std::time::Duration;

    use super::*;

    /// Validates the structured table for each tagged variant.
    ///
    /// Assertions:
    /// - Confirms validation faults classify as non-retryable low severity.
    /// - Confirms network faults classify as retryable.
    /// - Confirms circuit-open faults classify as transient and retryable.
    #[test]
    fn test_structured_classification() {
        let classifier = Classifier::new();

        let c = classifier.classify(&Fault::validation("email", "missing @"));
        assert_eq!(c.kind, FaultKind::Validation);
        assert_eq!(c.severity, Severity::Low);
        assert!(!c.retryable);

        let c = classifier.classify(&Fault::network("connection refused"));
        assert_eq!(c.kind, FaultKind::Network);
        assert!(c.retryable);

        let c = classifier.classify(&Fault::circuit_open("billing", None));
        assert_eq!(c.kind, FaultKind::Transient);
        assert!(c.retryable);
    }

    /// Validates predicate rules over untyped faults.
    ///
    /// Assertions:
    /// - Confirms `ECONNREFUSED` codes classify as network.
    /// - Confirms status 401 classifies as authentication.
    /// - Confirms status 503 classifies as transient and retryable.
    /// - Confirms status 429 classifies as transient (throttling).
    #[test]
    fn test_untyped_rules() {
        let classifier = Classifier::new();

        let c = classifier.classify(&Fault::other_code("refused", "ECONNREFUSED"));
        assert_eq!(c.kind, FaultKind::Network);

        let c = classifier.classify(&Fault::other_status("no token", 401));
        assert_eq!(c.kind, FaultKind::Authentication);
        assert!(!c.retryable);

        let c = classifier.classify(&Fault::other_status("bad gateway", 503));
        assert_eq!(c.kind, FaultKind::Transient);
        assert!(c.retryable);

        let c = classifier.classify(&Fault::other_status("slow down", 429));
        assert_eq!(c.category, "throttling");
    }

    /// Validates first-match ordering: the connection rule precedes the
    /// timeout rule, so a message carrying both markers classifies as
    /// network.
    #[test]
    fn test_first_match_wins() {
        let classifier = Classifier::new();
        let c = classifier.classify(&Fault::other("connection reset during timeout"));
        assert_eq!(c.kind, FaultKind::Network);
    }

    /// Validates the conservative fallback for unrecognized faults.
    ///
    /// Assertions:
    /// - Confirms `kind` equals `FaultKind::System`.
    /// - Confirms `severity` equals `Severity::Medium`.
    /// - Ensures `!retryable` evaluates to true.
    /// - Confirms `category` equals `"unknown"`.
    #[test]
    fn test_fallback_classification() {
        let classifier = Classifier::new();
        let c = classifier.classify(&Fault::other("something inexplicable"));
        assert_eq!(c.kind, FaultKind::System);
        assert_eq!(c.severity, Severity::Medium);
        assert!(!c.retryable);
        assert_eq!(c.category, "unknown");
    }

    /// Validates custom rules take precedence over built-ins, including the
    /// structured table.
    #[test]
    fn test_custom_rule_precedence() {
        let mut classifier = Classifier::new();
        classifier.add_rule(ClassifyRule::new(
            "payment-declines-are-business",
            |fault| fault.message().contains("declined"),
            Classification::new(
                FaultKind::Business,
                Severity::Low,
                false,
                "payments",
                "Card declined by the issuer",
            ),
        ));

        // Would otherwise classify as network via the structured table.
        let c = classifier.classify(&Fault::network("card declined"));
        assert_eq!(c.kind, FaultKind::Business);
        assert_eq!(c.category, "payments");
    }

    /// Validates integrity-shaped messages escalate to critical severity
    /// regardless of variant.
    #[test]
    fn test_integrity_rule_is_critical() {
        let classifier = Classifier::new();

        let c = classifier.classify(&Fault::system("ledger index corrupted"));
        assert_eq!(c.severity, Severity::Critical);
        assert_eq!(c.category, "integrity");

        let c = classifier.classify(&Fault::other("possible data loss in segment 4"));
        assert_eq!(c.severity, Severity::Critical);
    }

    /// Validates classification purity: repeated calls on the same input
    /// return identical values.
    #[test]
    fn test_classification_is_pure() {
        let classifier = Classifier::new();
        let fault = Fault::timeout("report_export", Duration::from_secs(30));
        let first = classifier.classify(&fault);
        let second = classifier.classify(&fault);
        assert_eq!(first, second);
    }

    /// Validates an empty classifier still resolves tagged variants and
    /// falls back for untyped faults.
    #[test]
    fn test_empty_classifier() {
        let classifier = Classifier::empty();
        assert_eq!(classifier.rule_count(), 0);

        let c = classifier.classify(&Fault::business("quota", "exceeded"));
        assert_eq!(c.kind, FaultKind::Business);

        let c = classifier.classify(&Fault::other_status("teapot", 418));
        assert_eq!(c.category, "unknown");
    }
}
