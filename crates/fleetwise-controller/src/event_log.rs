use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use parking_lot::Mutex;

use serde::Serialize;

/// The default number of retained events.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 1000;

/// The default number of events returned by [`EventLog::recent`].
pub const DEFAULT_EVENTS_LIMIT: usize = 50;

/// The severity of an [`EventLogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Regular operation.
    Info,
    /// Something worth the operator attention.
    Warning,
    /// A failure.
    Error,
}

/// A human-readable operational event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventLogEntry {
    /// Time the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Event description.
    pub message: String,
    /// Event severity.
    pub level: EventLevel,
}

/// A page of the most recent events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventPage {
    /// Events, oldest first.
    pub events: Vec<EventLogEntry>,
    /// Number of retained events.
    pub total_count: usize,
}

/// A bounded, append-only log of [`EventLogEntry`]s.
///
/// Once the log holds more than its capacity, the oldest entries are
/// discarded at once, keeping only the newest half.
#[derive(Debug)]
pub struct EventLog {
    entries: Mutex<VecDeque<EventLogEntry>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    /// Creates an [`EventLog`] retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity + 1)),
            capacity,
        }
    }

    /// Appends an informational event.
    #[inline]
    pub fn info(&self, message: impl Into<String>) {
        self.append(message, EventLevel::Info);
    }

    /// Appends a warning event.
    #[inline]
    pub fn warning(&self, message: impl Into<String>) {
        self.append(message, EventLevel::Warning);
    }

    /// Appends an error event.
    #[inline]
    pub fn error(&self, message: impl Into<String>) {
        self.append(message, EventLevel::Error);
    }

    /// Appends an event with the given [`EventLevel`].
    pub fn append(&self, message: impl Into<String>, level: EventLevel) {
        let entry = EventLogEntry {
            timestamp: Utc::now(),
            message: message.into(),
            level,
        };

        let mut entries = self.entries.lock();
        entries.push_back(entry);

        if entries.len() > self.capacity {
            let keep = self.capacity.div_ceil(2);
            let excess = entries.len() - keep;
            let _ = entries.drain(..excess);
        }
    }

    /// Returns the newest `limit` events along with the number of retained
    /// events.
    #[must_use]
    pub fn recent(&self, limit: usize) -> EventPage {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(limit);

        EventPage {
            events: entries.iter().skip(skip).cloned().collect(),
            total_count: entries.len(),
        }
    }

    /// Returns the number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns the maximum number of retained events.
    #[must_use]
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
