use std::time::Duration;

use tokio::time::Instant;

use crate::device::DeviceStatus;

/// The default liveness window.
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(30);

/// Classifies a device last seen at `last_seen`.
///
/// A device is [`DeviceStatus::Connected`] while less than `window` has
/// elapsed since it was last seen, and [`DeviceStatus::Disconnected`]
/// afterwards.
#[must_use]
pub fn evaluate(last_seen: Instant, now: Instant, window: Duration) -> DeviceStatus {
    if now.saturating_duration_since(last_seen) < window {
        DeviceStatus::Connected
    } else {
        DeviceStatus::Disconnected
    }
}
