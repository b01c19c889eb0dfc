//! Notification surface.
//!
//! State changes in the error-handling core are published as [`FaultEvent`]
//! records through an explicit observer registration interface plus a bounded
//! queue of recent events that poll-based consumers (dashboards, alerting
//! bridges) can drain. Delivery is synchronous and in-process; wiring events
//! to an external transport is the subscriber's concern.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use uuid::Uuid;

use crate::classify::{FaultKind, Severity};
use crate::resilience::CircuitState;

/// A notification record. The serialized `event` tag preserves the names
/// external consumers key on.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FaultEvent {
    ErrorOccurred {
        report_id: Uuid,
        kind: FaultKind,
        severity: Severity,
        operation: String,
        service: String,
        timestamp: DateTime<Utc>,
    },
    CriticalError {
        report_id: Uuid,
        message: String,
        service: String,
        timestamp: DateTime<Utc>,
    },
    CircuitBreakerStateChanged {
        name: String,
        state: CircuitState,
        timestamp: DateTime<Utc>,
    },
    ErrorResolved {
        report_id: Uuid,
        resolution: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

/// Receives every published event. Implementations must be fast; delivery is
/// synchronous on the publishing path.
pub trait FaultObserver: Send + Sync {
    fn on_event(&self, event: &FaultEvent);
}

/// Observer that discards everything. Useful as a default collaborator in
/// tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl FaultObserver for NoOpObserver {
    fn on_event(&self, _event: &FaultEvent) {}
}

/// Subscriber registry plus a bounded FIFO of recent events for polling.
///
/// The buffer overwrites oldest-first once `capacity` is reached, so a slow
/// poller loses history rather than blocking publishers.
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn FaultObserver>>>,
    recent: Mutex<VecDeque<FaultEvent>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` recent events. A capacity of
    /// zero is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            recent: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register an observer for all future events.
    pub fn subscribe(&self, observer: Arc<dyn FaultObserver>) {
        self.subscribers.write().push(observer);
    }

    /// Number of registered observers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Record the event and deliver it to every observer.
    pub fn publish(&self, event: FaultEvent) {
        {
            let mut recent = self.recent.lock();
            if recent.len() >= self.capacity {
                let _ = recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        let subscribers = self.subscribers.read().clone();
        for observer in subscribers {
            observer.on_event(&event);
        }
    }

    /// The most recent events, newest first, up to `limit`.
    pub fn recent_events(&self, limit: usize) -> Vec<FaultEvent> {
        self.recent.lock().iter().rev().take(limit).cloned().collect()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the event bus.

    use parking_lot::Mutex as TestMutex;

    use super::*;

    fn resolved_event(n: u32) -> FaultEvent {
        FaultEvent::ErrorResolved {
            report_id: Uuid::new_v4(),
            resolution: Some(format!("fix {}", n)),
            timestamp: Utc::now(),
        }
    }

    struct Recorder(TestMutex<Vec<String>>);

    impl FaultObserver for Recorder {
        fn on_event(&self, event: &FaultEvent) {
            let tag = serde_json::to_value(event)
                .ok()
                .and_then(|v| v["event"].as_str().map(str::to_string))
                .unwrap_or_default();
            self.0.lock().push(tag);
        }
    }

    /// Validates subscribers receive published events with the expected
    /// serialized tags.
    #[test]
    fn test_publish_delivers_to_subscribers() {
        let bus = EventBus::new(16);
        let recorder = Arc::new(Recorder(TestMutex::new(Vec::new())));
        bus.subscribe(recorder.clone());

        bus.publish(resolved_event(1));
        bus.publish(FaultEvent::CircuitBreakerStateChanged {
            name: "billing".to_string(),
            state: CircuitState::Open,
            timestamp: Utc::now(),
        });

        assert_eq!(
            *recorder.0.lock(),
            vec!["error_resolved".to_string(), "circuit_breaker_state_changed".to_string()]
        );
    }

    /// Validates the recent buffer is bounded and evicts oldest-first.
    ///
    /// Assertions:
    /// - Confirms only the newest `capacity` events survive.
    /// - Confirms `recent_events` returns newest first.
    #[test]
    fn test_recent_buffer_bounded() {
        let bus = EventBus::new(3);
        for n in 0..5 {
            bus.publish(resolved_event(n));
        }

        let recent = bus.recent_events(10);
        assert_eq!(recent.len(), 3);
        match &recent[0] {
            FaultEvent::ErrorResolved { resolution: Some(resolution), .. } => {
                assert_eq!(resolution, "fix 4");
            }
            other => panic!("Expected ErrorResolved, got {:?}", other),
        }
    }

    /// Validates a no-op observer subscribes cleanly.
    #[test]
    fn test_noop_observer() {
        let bus = EventBus::new(4);
        bus.subscribe(Arc::new(NoOpObserver));
        bus.publish(resolved_event(0));
        assert_eq!(bus.subscriber_count(), 1);
    }
}
