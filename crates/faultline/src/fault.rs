//! The closed boundary error representation.
//!
//! Heterogeneous upstream failures (I/O errors, HTTP client errors, domain
//! errors) are converted into a single [`Fault`] value before they enter the
//! classification and resilience machinery. Structured variants carry a tagged
//! kind plus the fields that matter for that kind; anything that arrives
//! untyped lands in [`Fault::Other`] with whatever machine code, status, and
//! message could be salvaged, and is classified by the generic rule list.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Standard result type for fallible operations handled by this crate.
pub type FaultResult<T> = Result<T, Fault>;

/// A normalized failure at the boundary of the error-handling core.
///
/// `Fault` is plain data: it is `Clone` and serializable so reports and
/// events can carry it to dashboards. Upstream error chains are rendered to
/// strings at conversion time (see [`error_chain`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fault", rename_all = "snake_case")]
pub enum Fault {
    /// Connection-level failure reaching a remote dependency.
    Network { message: String, status: Option<u16> },

    /// An operation exceeded its deadline.
    Timeout { operation: String, duration: Duration },

    /// The caller could not be identified.
    Authentication { message: String },

    /// The caller was identified but lacks permission.
    Authorization { operation: String, required_permission: Option<String> },

    /// Input failed validation before any side effect occurred.
    Validation { field: String, message: String },

    /// A domain rule rejected the operation.
    Business { rule: String, message: String },

    /// An internal failure with no more specific shape.
    System { message: String, code: Option<String> },

    /// A circuit breaker rejected the call without invoking the dependency.
    CircuitOpen { dependency: String, retry_after: Option<Duration> },

    /// Untyped boundary errors: whatever code/status/message survived
    /// conversion. Classified by the ordered predicate rules.
    Other { code: Option<String>, status: Option<u16>, message: String },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network { message, status } => {
                if let Some(status) = status {
                    write!(f, "Network error (status {}): {}", status, message)
                } else {
                    write!(f, "Network error: {}", message)
                }
            }
            Self::Timeout { operation, duration } => {
                write!(f, "Operation '{}' timed out after {:?}", operation, duration)
            }
            Self::Authentication { message } => {
                write!(f, "Authentication failed: {}", message)
            }
            Self::Authorization { operation, required_permission } => {
                if let Some(perm) = required_permission {
                    write!(f, "Unauthorized to perform '{}' (requires: {})", operation, perm)
                } else {
                    write!(f, "Unauthorized to perform '{}'", operation)
                }
            }
            Self::Validation { field, message } => {
                write!(f, "Validation error for field '{}': {}", field, message)
            }
            Self::Business { rule, message } => {
                write!(f, "Business rule '{}' rejected: {}", rule, message)
            }
            Self::System { message, code } => {
                if let Some(code) = code {
                    write!(f, "System error [{}]: {}", code, message)
                } else {
                    write!(f, "System error: {}", message)
                }
            }
            Self::CircuitOpen { dependency, retry_after } => {
                if let Some(retry) = retry_after {
                    write!(f, "Circuit breaker open for '{}' (retry in {:?})", dependency, retry)
                } else {
                    write!(f, "Circuit breaker open for '{}'", dependency)
                }
            }
            Self::Other { code, status, message } => {
                write!(f, "Error")?;
                if let Some(code) = code {
                    write!(f, " [{}]", code)?;
                }
                if let Some(status) = status {
                    write!(f, " (status {})", status)?;
                }
                write!(f, ": {}", message)
            }
        }
    }
}

impl std::error::Error for Fault {}

impl Fault {
    /// Create a network fault.
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network { message: message.into(), status: None }
    }

    /// Create a network fault carrying an HTTP-like status.
    pub fn network_status<S: Into<String>>(message: S, status: u16) -> Self {
        Self::Network { message: message.into(), status: Some(status) }
    }

    /// Create a timeout fault.
    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    /// Create an authentication fault.
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::Authentication { message: message.into() }
    }

    /// Create an authorization fault.
    pub fn authorization<O: Into<String>>(operation: O) -> Self {
        Self::Authorization { operation: operation.into(), required_permission: None }
    }

    /// Create an authorization fault naming the missing permission.
    pub fn authorization_with_perm<O: Into<String>, P: Into<String>>(
        operation: O,
        permission: P,
    ) -> Self {
        Self::Authorization {
            operation: operation.into(),
            required_permission: Some(permission.into()),
        }
    }

    /// Create a validation fault for a specific field.
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Create a business-rule fault.
    pub fn business<R: Into<String>, M: Into<String>>(rule: R, message: M) -> Self {
        Self::Business { rule: rule.into(), message: message.into() }
    }

    /// Create a system fault.
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System { message: message.into(), code: None }
    }

    /// Create a system fault with a machine code.
    pub fn system_code<S: Into<String>, C: Into<String>>(message: S, code: C) -> Self {
        Self::System { message: message.into(), code: Some(code.into()) }
    }

    /// Create a circuit-open fault for a named dependency.
    pub fn circuit_open<S: Into<String>>(dependency: S, retry_after: Option<Duration>) -> Self {
        Self::CircuitOpen { dependency: dependency.into(), retry_after }
    }

    /// Create an untyped fault from a bare message.
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other { code: None, status: None, message: message.into() }
    }

    /// Create an untyped fault carrying a machine code.
    pub fn other_code<S: Into<String>, C: Into<String>>(message: S, code: C) -> Self {
        Self::Other { code: Some(code.into()), status: None, message: message.into() }
    }

    /// Create an untyped fault carrying an HTTP-like status.
    pub fn other_status<S: Into<String>>(message: S, status: u16) -> Self {
        Self::Other { code: None, status: Some(status), message: message.into() }
    }

    /// The machine code attached to this fault, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::System { code, .. } | Self::Other { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The HTTP-like status attached to this fault, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Network { status, .. } | Self::Other { status, .. } => *status,
            _ => None,
        }
    }

    /// The human-readable message of this fault.
    pub fn message(&self) -> &str {
        match self {
            Self::Network { message, .. }
            | Self::Authentication { message }
            | Self::Validation { message, .. }
            | Self::Business { message, .. }
            | Self::System { message, .. }
            | Self::Other { message, .. } => message,
            Self::Timeout { operation, .. } => operation,
            Self::Authorization { operation, .. } => operation,
            Self::CircuitOpen { dependency, .. } => dependency,
        }
    }
}

// Standard conversions from common error types. The original error chain is
// rendered into the message; the io error kind survives as the machine code
// so the predicate rules can still classify connection-level failures.
impl From<std::io::Error> for Fault {
    fn from(err: std::io::Error) -> Self {
        Self::Other {
            code: Some(format!("{:?}", err.kind())),
            status: None,
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Fault {
    fn from(err: serde_json::Error) -> Self {
        Self::System { message: err.to_string(), code: Some("serialization".to_string()) }
    }
}

/// Render an error and its `source()` chain as display strings, outermost
/// first.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    //! Unit tests for the boundary fault type.

    use super::*;

    /// Validates `Fault` display forms for each structured variant.
    ///
    /// Assertions:
    /// - Ensures each variant's rendered message names its payload.
    #[test]
    fn test_fault_display() {
        let fault = Fault::network_status("connection refused", 502);
        assert_eq!(fault.to_string(), "Network error (status 502): connection refused");

        let fault = Fault::timeout("sync_batch", Duration::from_secs(5));
        assert!(fault.to_string().contains("sync_batch"));

        let fault = Fault::authorization_with_perm("delete_report", "admin");
        assert!(fault.to_string().contains("requires: admin"));

        let fault = Fault::circuit_open("billing", Some(Duration::from_secs(30)));
        assert!(fault.to_string().contains("billing"));
    }

    /// Validates accessor behavior for the code/status extraction scenario.
    ///
    /// Assertions:
    /// - Confirms `fault.code()` equals `Some("ETIMEDOUT")`.
    /// - Confirms `fault.status()` equals `Some(503)`.
    /// - Confirms structured variants without those fields return `None`.
    #[test]
    fn test_fault_accessors() {
        let fault = Fault::other_code("request timed out", "ETIMEDOUT");
        assert_eq!(fault.code(), Some("ETIMEDOUT"));
        assert_eq!(fault.status(), None);

        let fault = Fault::other_status("bad gateway", 503);
        assert_eq!(fault.status(), Some(503));

        let fault = Fault::validation("email", "missing @");
        assert_eq!(fault.code(), None);
        assert_eq!(fault.status(), None);
    }

    /// Validates `From<std::io::Error>` conversion preserves the kind as a
    /// machine code.
    #[test]
    fn test_fault_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let fault = Fault::from(io);
        match fault {
            Fault::Other { code: Some(code), .. } => assert_eq!(code, "ConnectionRefused"),
            other => panic!("Expected Other fault, got {:?}", other),
        }
    }

    /// Validates `error_chain` renders the full source chain outermost first.
    #[test]
    fn test_error_chain() {
        let inner = std::io::Error::other("disk full");
        let fault = Fault::from(inner);
        let chain = error_chain(&fault);
        assert_eq!(chain.len(), 1);
        assert!(chain[0].contains("disk full"));
    }

    /// Validates faults serialize with a snake_case tag for dashboards.
    #[test]
    fn test_fault_serialization() {
        let fault = Fault::validation("amount", "must be positive");
        let json = serde_json::to_value(&fault).expect("fault should serialize");
        assert_eq!(json["fault"], "validation");
        assert_eq!(json["field"], "amount");
    }
}
