use chrono::{DateTime, Utc};

use fleetwise::color::Rgb;
use fleetwise::fields::{ACTION_BUTTON_PRESSED, AVAILABLE, LED_ON, RGB_COLOR};
use fleetwise::value::{AttributeValue, Attributes};

use serde::Serialize;
use serde_json::Value as JsonValue;

use tokio::time::Instant;

/// The device type of color-capable devices.
pub const RGB_CONTROLLER: &str = "rgb_controller";

/// The device type assigned when a device does not report one.
pub const UNKNOWN: &str = "unknown";

/// The liveness status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// The device has been seen within the liveness window.
    Connected,
    /// The device has been silent for longer than the liveness window.
    Disconnected,
}

/// A device known to the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRecord {
    /// Identifier chosen by the device itself.
    pub id: String,
    /// Device type.
    #[serde(rename = "type")]
    pub device_type: String,
    /// Reported IP address.
    #[serde(rename = "ip")]
    pub ip_address: String,
    /// Liveness status as of the last read.
    pub status: DeviceStatus,
    /// Attributes reported by the device, merged across reports.
    pub attributes: Attributes,
    /// Time of the first registration.
    pub created_at: DateTime<Utc>,
    /// Whether the action button of the device is pressed.
    pub action_button_pressed: bool,
    /// Whether the led of the device is on.
    pub led_on: bool,
    /// The color of the device, in the `"red,green,blue"` format.
    pub rgb_color: String,
    /// Whether the device takes part in color coordination.
    pub available: bool,
    /// The last telemetry payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_data: Option<JsonValue>,
    /// Time of the last telemetry payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_data_time: Option<DateTime<Utc>>,
    /// Time of the last button report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_button_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) last_seen: Instant,
}

impl DeviceRecord {
    pub(crate) fn new(id: &str, device_type: &str, ip_address: &str, now: Instant) -> Self {
        Self {
            id: id.into(),
            device_type: device_type.into(),
            ip_address: ip_address.into(),
            status: DeviceStatus::Connected,
            attributes: Attributes::default(),
            created_at: Utc::now(),
            action_button_pressed: false,
            led_on: false,
            rgb_color: Rgb::BLACK.to_string(),
            available: true,
            last_data: None,
            last_data_time: None,
            last_button_time: None,
            last_seen: now,
        }
    }

    /// Whether the device is color-capable.
    #[must_use]
    pub fn is_rgb_controller(&self) -> bool {
        self.device_type == RGB_CONTROLLER
    }

    /// Returns the device color.
    ///
    /// A color that cannot be parsed is read as [`Rgb::BLACK`].
    #[must_use]
    pub fn color(&self) -> Rgb {
        self.rgb_color.parse().unwrap_or(Rgb::BLACK)
    }

    /// Returns the instant the device was last seen.
    #[must_use]
    pub const fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Whether the device can take part in a color mix.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.is_rgb_controller()
            && self.status == DeviceStatus::Connected
            && !self.action_button_pressed
    }

    // Applies an update and refreshes liveness.
    pub(crate) fn apply(&mut self, update: DeviceUpdate, now: Instant) {
        let DeviceUpdate {
            attributes,
            action_button_pressed,
            led_on,
            rgb_color,
            available,
            last_data,
            last_data_time,
            last_button_time,
        } = update;

        self.attributes.extend(attributes);

        if let Some(pressed) = action_button_pressed {
            self.action_button_pressed = pressed;
        }
        if let Some(led_on) = led_on {
            self.led_on = led_on;
        }
        if let Some(rgb_color) = rgb_color {
            self.rgb_color = rgb_color;
        }
        if let Some(available) = available {
            self.available = available;
        }
        if last_data.is_some() {
            self.last_data = last_data;
        }
        if last_data_time.is_some() {
            self.last_data_time = last_data_time;
        }
        if last_button_time.is_some() {
            self.last_button_time = last_button_time;
        }

        self.rederive_available();
        self.status = DeviceStatus::Connected;
        self.last_seen = now;
    }

    pub(crate) fn rederive_available(&mut self) {
        if self.is_rgb_controller() {
            self.available = !self.action_button_pressed;
        }
    }
}

/// A partial update of a [`DeviceRecord`].
///
/// Fields left to [`None`] keep their previous value, and attributes are
/// merged key by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceUpdate {
    /// Attributes to add or overwrite.
    pub attributes: Attributes,
    /// Action button state.
    pub action_button_pressed: Option<bool>,
    /// Led state.
    pub led_on: Option<bool>,
    /// Color in the `"red,green,blue"` format.
    pub rgb_color: Option<String>,
    /// Availability, ignored for color-capable devices.
    pub available: Option<bool>,
    /// Telemetry payload.
    pub last_data: Option<JsonValue>,
    /// Time of the telemetry payload.
    pub last_data_time: Option<DateTime<Utc>>,
    /// Time of the button report.
    pub last_button_time: Option<DateTime<Utc>>,
}

impl DeviceUpdate {
    /// Creates an empty [`DeviceUpdate`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Extracts the coordination fields out of canonical attributes.
    ///
    /// Attributes themselves are not carried over.
    #[must_use]
    pub fn coordination(attributes: &Attributes) -> Self {
        Self {
            action_button_pressed: attributes
                .get(ACTION_BUTTON_PRESSED)
                .and_then(AttributeValue::as_bool),
            led_on: attributes.get(LED_ON).and_then(AttributeValue::as_bool),
            rgb_color: attributes.get(RGB_COLOR).and_then(color_text),
            available: attributes.get(AVAILABLE).and_then(AttributeValue::as_bool),
            ..Self::default()
        }
    }

    /// Sets the attributes to merge.
    #[must_use]
    #[inline]
    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

// Devices report their color either as text or as an array of channels.
fn color_text(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::Text(text) => Some(text.clone()),
        AttributeValue::Structured(JsonValue::Array(channels)) => {
            let channels = channels
                .iter()
                .map(JsonValue::as_i64)
                .collect::<Option<Vec<i64>>>()?;
            let [red, green, blue] = channels.as_slice() else {
                return None;
            };
            Some(Rgb::clamped(*red, *green, *blue).to_string())
        }
        _ => None,
    }
}
