use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use tokio::time::Instant;

/// Process-wide counters.
///
/// Counters only grow for the whole lifetime of the process.
#[derive(Debug)]
pub struct SystemCounters {
    messages: AtomicU64,
    errors: AtomicU64,
    transport_connected: AtomicBool,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Default for SystemCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCounters {
    /// Creates [`SystemCounters`] starting now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            transport_connected: AtomicBool::new(false),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Counts an inbound message.
    #[inline]
    pub fn record_message(&self) {
        let _ = self.messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an error.
    #[inline]
    pub fn record_error(&self) {
        let _ = self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of inbound messages.
    #[must_use]
    #[inline]
    pub fn message_count(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// Returns the number of errors.
    #[must_use]
    #[inline]
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns the time the counters started.
    #[must_use]
    #[inline]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns the time elapsed since the counters started.
    #[must_use]
    #[inline]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the transport is connected to the broker.
    #[must_use]
    #[inline]
    pub fn transport_connected(&self) -> bool {
        self.transport_connected.load(Ordering::Relaxed)
    }

    pub(crate) fn set_transport_connected(&self, connected: bool) {
        self.transport_connected.store(connected, Ordering::Relaxed);
    }
}

/// Formats a duration as `HH:MM:SS`.
///
/// Hours are not wrapped, so they may take more than two digits.
#[must_use]
pub fn format_uptime(uptime: Duration) -> String {
    let seconds = uptime.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
