//! Process-wide event counters exposed on `/metrics`
//!
//! The counters are the only shared mutable state in the core. They are kept
//! behind a small metrics object passed into the dispatcher rather than a
//! process-global singleton, so tests can inspect them in isolation.

use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Event-processing counters
pub struct Metrics {
    started_at: Instant,
    inner: RwLock<Counters>,
}

#[derive(Default)]
struct Counters {
    processed_events: u64,
    errors: u64,
    last_event_time: Option<DateTime<Utc>>,
}

impl Metrics {
    /// Create a fresh counter set; uptime starts now
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            inner: RwLock::new(Counters::default()),
        }
    }

    /// Record a processed event and stamp its arrival time
    pub fn record_event(&self) {
        let mut inner = self.inner.write();
        inner.processed_events += 1;
        inner.last_event_time = Some(Utc::now());
    }

    /// Record a handler error
    pub fn record_error(&self) {
        self.inner.write().errors += 1;
    }

    /// Snapshot for the `/metrics` endpoint
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read();
        MetricsSnapshot {
            processed_events: inner.processed_events,
            errors: inner.errors,
            last_event_time: inner.last_event_time,
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Events consumed from the channel, successful or not
    pub processed_events: u64,
    /// Handler errors (the dispatcher keeps running)
    pub errors: u64,
    /// Arrival time of the most recent event
    pub last_event_time: Option<DateTime<Utc>>,
    /// Seconds since process start
    pub uptime_seconds: u64,
}
