//! Fault reports and the bounded report log.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::Classification;
use crate::context::ErrorContext;
use crate::fault::Fault;

/// Process state captured when a report is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub app_version: String,
    pub os: String,
    pub arch: String,
    pub pid: u32,
    /// Elapsed time since the owning manager was constructed.
    pub uptime: Duration,
}

impl EnvironmentSnapshot {
    /// Capture the current process environment.
    pub fn capture(uptime: Duration) -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            pid: std::process::id(),
            uptime,
        }
    }
}

/// One handled failure. Created once; only the resolution fields and tags
/// are ever mutated afterwards, by the manager's resolve path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultReport {
    pub id: Uuid,
    pub fault: Fault,
    pub message: String,
    pub classification: Classification,
    pub context: ErrorContext,
    /// Rendered `Error::source()` chain, outermost first.
    pub source_chain: Vec<String>,
    pub environment: EnvironmentSnapshot,
    /// Operation invocations before this failure was recorded.
    pub attempts: u32,
    pub resolved: bool,
    pub resolution_time: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub tags: Vec<String>,
}

impl FaultReport {
    /// Minutes from the failure's context timestamp to its resolution, when
    /// resolved.
    pub fn resolution_minutes(&self) -> Option<f64> {
        self.resolution_time.map(|resolved_at| {
            (resolved_at - self.context.timestamp).num_milliseconds() as f64 / 60_000.0
        })
    }
}

/// Bounded FIFO of reports: push evicts the oldest entry once capacity is
/// reached.
#[derive(Debug)]
pub(crate) struct ReportLog {
    entries: VecDeque<FaultReport>,
    capacity: usize,
}

impl ReportLog {
    /// Create a log holding at most `capacity` reports (clamped to at least
    /// one).
    pub(crate) fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::new(), capacity: capacity.max(1) }
    }

    pub(crate) fn push(&mut self, report: FaultReport) {
        if self.entries.len() >= self.capacity {
            let _ = self.entries.pop_front();
        }
        self.entries.push_back(report);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &FaultReport> {
        self.entries.iter()
    }

    pub(crate) fn find_mut(&mut self, id: Uuid) -> Option<&mut FaultReport> {
        self.entries.iter_mut().find(|report| report.id == id)
    }

    /// Newest reports first, up to `limit`.
    pub(crate) fn recent(&self, limit: usize) -> Vec<FaultReport> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}
