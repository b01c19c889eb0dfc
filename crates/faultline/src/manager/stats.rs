//! Aggregation over recorded reports: statistics and the derived health
//! report.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::classify::Severity;

use super::report::FaultReport;

/// How many top error messages to report, and how long each may be.
const TOP_ERRORS: usize = 10;
const TOP_ERROR_MESSAGE_CHARS: usize = 120;

/// A frequently seen error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopError {
    pub message: String,
    pub count: usize,
}

/// Aggregated view over the (optionally time-filtered) report log.
#[derive(Debug, Clone, Serialize)]
pub struct FaultStatistics {
    pub total: usize,
    pub by_kind: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
    pub by_category: HashMap<String, usize>,
    /// Faults per minute over the queried window.
    pub error_rate: f64,
    /// Mean time to resolution in minutes, over resolved reports only; 0.0
    /// when nothing is resolved.
    pub mttr_minutes: f64,
    /// Top messages by occurrence, truncated for display.
    pub top_errors: Vec<TopError>,
}

pub(crate) fn compute_statistics<'a, I>(reports: I, window_minutes: f64) -> FaultStatistics
where
    I: Iterator<Item = &'a FaultReport>,
{
    let mut total = 0usize;
    let mut by_kind: HashMap<String, usize> = HashMap::new();
    let mut by_severity: HashMap<String, usize> = HashMap::new();
    let mut by_category: HashMap<String, usize> = HashMap::new();
    let mut by_message: HashMap<String, usize> = HashMap::new();
    let mut resolved_minutes = Vec::new();

    for report in reports {
        total += 1;
        *by_kind.entry(report.classification.kind.to_string()).or_default() += 1;
        *by_severity.entry(report.classification.severity.to_string()).or_default() += 1;
        *by_category.entry(report.classification.category.clone()).or_default() += 1;
        *by_message.entry(report.message.clone()).or_default() += 1;
        if let Some(minutes) = report.resolution_minutes() {
            resolved_minutes.push(minutes);
        }
    }

    let mttr_minutes = if resolved_minutes.is_empty() {
        0.0
    } else {
        resolved_minutes.iter().sum::<f64>() / resolved_minutes.len() as f64
    };

    let mut ranked: Vec<(String, usize)> = by_message.into_iter().collect();
    // Count descending, message ascending for a stable ranking.
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let top_errors = ranked
        .into_iter()
        .take(TOP_ERRORS)
        .map(|(message, count)| TopError { message: truncate(&message), count })
        .collect();

    let error_rate = if window_minutes > 0.0 { total as f64 / window_minutes } else { 0.0 };

    FaultStatistics {
        total,
        by_kind,
        by_severity,
        by_category,
        error_rate,
        mttr_minutes,
        top_errors,
    }
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= TOP_ERROR_MESSAGE_CHARS {
        message.to_string()
    } else {
        let mut truncated: String = message.chars().take(TOP_ERROR_MESSAGE_CHARS).collect();
        truncated.push('…');
        truncated
    }
}

/// Coarse health classification derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Raw inputs to the health score.
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    pub errors_last_hour: usize,
    pub critical_last_hour: usize,
    pub open_breakers: Vec<String>,
    pub active_retries: usize,
    pub buffered_reports: usize,
    pub uptime: Duration,
}

/// Heuristic composite health indicator. Not a calibrated SLO: fixed
/// deductions from a 0-100 score, clamped at zero.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub score: u8,
    pub issues: Vec<String>,
    pub metrics: HealthMetrics,
    pub recommendations: Vec<String>,
}

pub(crate) fn build_health_report(metrics: HealthMetrics) -> HealthReport {
    let mut score: i32 = 100;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if metrics.errors_last_hour > 100 {
        score -= 30;
        issues.push(format!(
            "High error volume: {} errors in the last hour",
            metrics.errors_last_hour
        ));
        recommendations
            .push("Investigate the dominant error sources before volume compounds".to_string());
    }

    if metrics.critical_last_hour > 0 {
        score -= 40;
        issues.push(format!(
            "{} critical error(s) in the last hour",
            metrics.critical_last_hour
        ));
        recommendations.push("Critical failures need immediate attention".to_string());
    }

    if !metrics.open_breakers.is_empty() {
        score -= 25;
        issues.push(format!("Open circuit breakers: {}", metrics.open_breakers.join(", ")));
        recommendations.push(
            "Check the guarded dependencies before resetting any breaker manually".to_string(),
        );
    }

    if metrics.active_retries > 10 {
        score -= 15;
        issues.push(format!("{} operations currently retrying", metrics.active_retries));
        recommendations
            .push("Retry pressure suggests downstream latency or failures".to_string());
    }

    let score = score.clamp(0, 100) as u8;
    let overall = if score >= 80 {
        HealthStatus::Healthy
    } else if score >= 60 {
        HealthStatus::Warning
    } else {
        HealthStatus::Critical
    };

    HealthReport { overall, score, issues, metrics, recommendations }
}

/// Severity shorthand used by the manager when bucketing health inputs.
pub(crate) fn is_critical(severity: Severity) -> bool {
    severity == Severity::Critical
}
