use std::sync::Arc;

use chrono::Utc;

use fleetwise::fields::{self, ACTION_BUTTON_PRESSED, ERROR, IP, LED_ON, TYPE};
use fleetwise::topic::{MessageKind, TopicScheme};

use serde_json::{Map, Value as JsonValue};

use tracing::{debug, error, info, warn};

use crate::counters::SystemCounters;
use crate::device::{DeviceUpdate, UNKNOWN};
use crate::error::{Error, Result};
use crate::event_log::EventLog;
use crate::registry::Registry;

// Error description used when an error report cannot be decoded.
const UNKNOWN_ERROR: &str = "Unknown";

/// The result of routing an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The topic does not address a device of the fleet.
    Discarded,
    /// The topic has an unknown message kind.
    Unrecognized(String),
    /// The message has been handled.
    Handled(MessageKind),
    /// The message payload has been rejected.
    Rejected(MessageKind, Error),
}

/// Dispatches inbound device messages to their handlers.
///
/// Every handler recovers from malformed payloads, so routing never fails.
#[derive(Debug, Clone)]
pub struct Router {
    scheme: TopicScheme,
    registry: Arc<Registry>,
    events: Arc<EventLog>,
    counters: Arc<SystemCounters>,
}

impl Router {
    /// Creates a [`Router`] for the topics of a [`TopicScheme`].
    #[must_use]
    pub const fn new(
        scheme: TopicScheme,
        registry: Arc<Registry>,
        events: Arc<EventLog>,
        counters: Arc<SystemCounters>,
    ) -> Self {
        Self {
            scheme,
            registry,
            events,
            counters,
        }
    }

    /// Routes a message received on `topic`.
    ///
    /// The message is counted before anything else, whatever its outcome.
    pub fn route(&self, topic: &str, payload: &[u8]) -> RouteOutcome {
        self.counters.record_message();

        let Some(device_topic) = self.scheme.parse(topic) else {
            debug!(topic, "Topic does not address a device of the fleet, discard it");
            return RouteOutcome::Discarded;
        };

        let id = device_topic.device_id;
        let kind = match device_topic.message_kind() {
            Ok(kind) => kind,
            Err(e) => {
                warn!(device = id, "Message ignored: {e}");
                return RouteOutcome::Unrecognized(device_topic.kind.into());
            }
        };

        debug!(device = id, %kind, "Message received");

        let result = match kind {
            MessageKind::Status => self.status(id, payload),
            MessageKind::Data => self.data(id, payload),
            MessageKind::Button => self.button(id, payload),
            MessageKind::Disconnect => {
                let _ = self.registry.remove(id);
                Ok(())
            }
            MessageKind::Error => {
                self.device_error(id, payload);
                Ok(())
            }
        };

        match result {
            Ok(()) => RouteOutcome::Handled(kind),
            Err(e) => {
                self.counters.record_error();
                error!(device = id, %kind, "Message dropped: {e}");
                self.events
                    .error(format!("Failed to handle {kind} message of {id}: {e}"));
                RouteOutcome::Rejected(kind, e)
            }
        }
    }

    /// Returns the [`TopicScheme`] of the routed topics.
    #[must_use]
    #[inline]
    pub const fn topic_scheme(&self) -> &TopicScheme {
        &self.scheme
    }

    /// Returns the [`Registry`] messages are routed to.
    #[must_use]
    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn status(&self, id: &str, payload: &[u8]) -> Result<()> {
        let payload = decode_object(payload)?;

        let device_type = fields::lookup(&payload, TYPE);
        let ip_address = payload.get(IP);
        if device_type.is_none() && ip_address.is_none() {
            return Err(Error::payload_decode(
                "Status payload carries neither a type nor an ip",
            ));
        }

        let device_type = device_type
            .and_then(JsonValue::as_str)
            .unwrap_or(UNKNOWN);
        let ip_address = ip_address.and_then(JsonValue::as_str).unwrap_or(UNKNOWN);

        let _ = self.registry.register(
            id,
            device_type,
            ip_address,
            fields::normalize(&payload),
        );
        Ok(())
    }

    fn data(&self, id: &str, payload: &[u8]) -> Result<()> {
        let payload: JsonValue = serde_json::from_slice(payload)
            .map_err(|e| Error::payload_decode(format!("Invalid data payload: {e}")))?;

        // Reported coordination fields overwrite optimistic state.
        let mut update = match &payload {
            JsonValue::Object(map) => DeviceUpdate::coordination(&fields::normalize(map)),
            _ => DeviceUpdate::new(),
        };
        update.last_data = Some(payload);
        update.last_data_time = Some(Utc::now());

        if !self.registry.update(id, update) {
            debug!(device = id, "Data from an unregistered device, discard it");
        }
        Ok(())
    }

    fn button(&self, id: &str, payload: &[u8]) -> Result<()> {
        let payload = decode_object(payload)?;

        let pressed = fields::lookup(&payload, ACTION_BUTTON_PRESSED).and_then(JsonValue::as_bool);
        let led_on = fields::lookup(&payload, LED_ON).and_then(JsonValue::as_bool);

        let (Some(pressed), Some(led_on)) = (pressed, led_on) else {
            return Err(Error::payload_decode(
                "Button payload needs boolean button and led states",
            ));
        };

        let update = DeviceUpdate {
            action_button_pressed: Some(pressed),
            led_on: Some(led_on),
            last_button_time: Some(Utc::now()),
            ..DeviceUpdate::new()
        };

        if self.registry.update(id, update) {
            info!(device = id, pressed, led_on, "Button state changed");
        } else {
            debug!(device = id, "Button state from an unregistered device, discard it");
        }
        Ok(())
    }

    fn device_error(&self, id: &str, payload: &[u8]) {
        self.counters.record_error();

        let description = decode_object(payload)
            .ok()
            .and_then(|payload| payload.get(ERROR).map(error_text))
            .unwrap_or_else(|| UNKNOWN_ERROR.into());

        warn!(device = id, "Device error: {description}");
        self.events
            .error(format!("Device {id} error: {description}"));
    }

    pub(crate) fn transport_connected(&self) {
        self.counters.set_transport_connected(true);
        info!("Connected to the broker");
        self.events.info("Connected to the broker");
    }

    pub(crate) fn transport_disconnected(&self) {
        self.counters.set_transport_connected(false);
        warn!("Disconnected from the broker");
        self.events.warning("Disconnected from the broker");
    }

    pub(crate) fn transport_error(&self, e: &Error) {
        self.counters.set_transport_connected(false);
        self.counters.record_error();
        error!("Transport error: {e}");
        self.events.error(format!("Transport error: {e}"));
    }
}

fn decode_object(payload: &[u8]) -> Result<Map<String, JsonValue>> {
    match serde_json::from_slice(payload) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(Error::payload_decode("Payload is not an object")),
        Err(e) => Err(Error::payload_decode(format!("Invalid payload: {e}"))),
    }
}

fn error_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use fleetwise::topic::{MessageKind, TopicScheme};
    use fleetwise::value::AttributeValue;

    use serde_json::json;

    use crate::counters::SystemCounters;
    use crate::device::RGB_CONTROLLER;
    use crate::error::ErrorKind;
    use crate::event_log::{EventLevel, EventLog};
    use crate::liveness::DEFAULT_LIVENESS_WINDOW;
    use crate::registry::Registry;

    use super::{RouteOutcome, Router};

    struct Fixture {
        router: Router,
        events: Arc<EventLog>,
        counters: Arc<SystemCounters>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_scheme(TopicScheme::default())
        }

        fn with_scheme(scheme: TopicScheme) -> Self {
            let events = Arc::new(EventLog::default());
            let counters = Arc::new(SystemCounters::new());
            let registry = Arc::new(Registry::new(DEFAULT_LIVENESS_WINDOW, Arc::clone(&events)));
            Self {
                router: Router::new(
                    scheme,
                    registry,
                    Arc::clone(&events),
                    Arc::clone(&counters),
                ),
                events,
                counters,
            }
        }

        fn send(&self, topic: &str, payload: &serde_json::Value) -> RouteOutcome {
            self.router
                .route(topic, &serde_json::to_vec(payload).unwrap())
        }

        fn registry(&self) -> &Registry {
            self.router.registry()
        }
    }

    #[test]
    fn test_status_registers_device() {
        let fixture = Fixture::new();
        let outcome = fixture.send(
            "devices/rgb-1/status",
            &json!({
                "t": "rgb_controller",
                "ip": "10.0.0.3",
                "fw": "2.0.1",
                "rgb": "10,0,0",
                "btn": false,
            }),
        );

        assert_eq!(outcome, RouteOutcome::Handled(MessageKind::Status));

        let record = fixture.registry().get("rgb-1").unwrap();
        assert_eq!(record.device_type, RGB_CONTROLLER);
        assert_eq!(record.ip_address, "10.0.0.3");
        assert_eq!(record.rgb_color, "10,0,0");
        assert!(record.available);
        assert_eq!(
            record.attributes["firmware"],
            AttributeValue::Text("2.0.1".into())
        );
        assert_eq!(fixture.counters.message_count(), 1);
        assert_eq!(fixture.counters.error_count(), 0);
    }

    #[test]
    fn test_status_without_type_defaults_to_unknown() {
        let fixture = Fixture::new();
        let _ = fixture.send("devices/esp-01/status", &json!({ "ip": "10.0.0.2" }));

        let record = fixture.registry().get("esp-01").unwrap();
        assert_eq!(record.device_type, "unknown");
        assert_eq!(fixture.registry().stats().by_type.get("unknown"), Some(&1));
    }

    #[test]
    fn test_malformed_status() {
        let fixture = Fixture::new();

        let outcome = fixture.router.route("devices/esp-01/status", b"{ not json");
        assert!(matches!(
            outcome,
            RouteOutcome::Rejected(MessageKind::Status, ref e) if e.kind() == ErrorKind::PayloadDecode
        ));

        let outcome = fixture.send("devices/esp-01/status", &json!({ "uptime": 3 }));
        assert!(matches!(outcome, RouteOutcome::Rejected(MessageKind::Status, _)));

        assert!(fixture.registry().is_empty());
        assert_eq!(fixture.counters.message_count(), 2);
        assert_eq!(fixture.counters.error_count(), 2);
        assert_eq!(fixture.events.recent(1).events[0].level, EventLevel::Error);
    }

    #[test]
    fn test_data_updates_known_device() {
        let fixture = Fixture::new();
        let _ = fixture.send("devices/esp-01/status", &json!({ "type": "sensor" }));
        let outcome = fixture.send("devices/esp-01/data", &json!({ "temperature": 21.5 }));

        assert_eq!(outcome, RouteOutcome::Handled(MessageKind::Data));

        let record = fixture.registry().get("esp-01").unwrap();
        assert_eq!(record.last_data, Some(json!({ "temperature": 21.5 })));
        assert!(record.last_data_time.is_some());
    }

    #[test]
    fn test_data_accepts_any_json_value() {
        let fixture = Fixture::new();
        let _ = fixture.send("devices/esp-01/status", &json!({ "type": "sensor" }));
        let outcome = fixture.send("devices/esp-01/data", &json!([1, 2, 3]));

        assert_eq!(outcome, RouteOutcome::Handled(MessageKind::Data));
        assert_eq!(
            fixture.registry().get("esp-01").unwrap().last_data,
            Some(json!([1, 2, 3]))
        );
    }

    #[test]
    fn test_data_for_unknown_device() {
        let fixture = Fixture::new();
        let outcome = fixture.send("devices/ghost/data", &json!({ "temperature": 3 }));

        assert_eq!(outcome, RouteOutcome::Handled(MessageKind::Data));
        assert!(fixture.registry().is_empty());
        assert_eq!(fixture.counters.error_count(), 0);
    }

    #[test]
    fn test_unparseable_data() {
        let fixture = Fixture::new();
        let outcome = fixture.router.route("devices/ghost/data", b"\xff\xfe");

        assert!(matches!(outcome, RouteOutcome::Rejected(MessageKind::Data, _)));
        assert_eq!(fixture.counters.error_count(), 1);
        assert!(fixture.registry().get("ghost").is_none());
    }

    #[test]
    fn test_data_overrides_coordination_fields() {
        let fixture = Fixture::new();
        let _ = fixture.send(
            "devices/rgb-1/status",
            &json!({ "type": "rgb_controller", "rgb_color": "10,0,0" }),
        );
        let _ = fixture.send("devices/rgb-1/data", &json!({ "rgb": "0,0,10", "led": true }));

        let record = fixture.registry().get("rgb-1").unwrap();
        assert_eq!(record.rgb_color, "0,0,10");
        assert!(record.led_on);
    }

    #[test]
    fn test_button() {
        let fixture = Fixture::new();
        let _ = fixture.send("devices/rgb-1/status", &json!({ "type": "rgb_controller" }));
        let outcome = fixture.send("devices/rgb-1/button", &json!({ "btn": true, "led": false }));

        assert_eq!(outcome, RouteOutcome::Handled(MessageKind::Button));

        let record = fixture.registry().get("rgb-1").unwrap();
        assert!(record.action_button_pressed);
        assert!(!record.available);
        assert!(!record.led_on);
        assert!(record.last_button_time.is_some());
    }

    #[test]
    fn test_malformed_button() {
        let fixture = Fixture::new();
        let _ = fixture.send("devices/rgb-1/status", &json!({ "type": "rgb_controller" }));
        let outcome = fixture.send(
            "devices/rgb-1/button",
            &json!({ "action_button_pressed": "yes", "led_on": false }),
        );

        assert!(matches!(outcome, RouteOutcome::Rejected(MessageKind::Button, _)));
        assert!(!fixture.registry().get("rgb-1").unwrap().action_button_pressed);
    }

    #[test]
    fn test_disconnect() {
        let fixture = Fixture::new();
        let _ = fixture.send("devices/esp-01/status", &json!({ "type": "sensor" }));
        assert_eq!(fixture.registry().stats().by_type.get("sensor"), Some(&1));

        let outcome = fixture.router.route("devices/esp-01/disconnect", b"");
        assert_eq!(outcome, RouteOutcome::Handled(MessageKind::Disconnect));
        assert!(fixture.registry().get("esp-01").is_none());
        assert_eq!(fixture.registry().stats().by_type.get("sensor"), None);

        // Disconnecting twice is harmless.
        let outcome = fixture.router.route("devices/esp-01/disconnect", b"");
        assert_eq!(outcome, RouteOutcome::Handled(MessageKind::Disconnect));
    }

    #[test]
    fn test_device_error() {
        let fixture = Fixture::new();
        let _ = fixture.send("devices/esp-01/error", &json!({ "error": "sensor fault" }));
        let _ = fixture.router.route("devices/esp-01/error", b"garbage");

        assert_eq!(fixture.counters.error_count(), 2);
        assert!(fixture.registry().is_empty());

        let page = fixture.events.recent(2);
        assert_eq!(page.events[0].message, "Device esp-01 error: sensor fault");
        assert_eq!(page.events[1].message, "Device esp-01 error: Unknown");
        assert_eq!(page.events[1].level, EventLevel::Error);
    }

    #[test]
    fn test_discarded_and_unrecognized_topics() {
        let fixture = Fixture::new();

        assert_eq!(
            fixture.router.route("devices/discovery", b"{}"),
            RouteOutcome::Discarded
        );
        assert_eq!(
            fixture.router.route("devices/esp-01/reboot", b"{}"),
            RouteOutcome::Unrecognized("reboot".into())
        );

        assert_eq!(fixture.counters.message_count(), 2);
        assert_eq!(fixture.counters.error_count(), 0);
        assert!(fixture.registry().is_empty());
    }

    #[test]
    fn test_multi_level_prefix() {
        let fixture = Fixture::with_scheme(TopicScheme::new("site/devices"));
        let outcome = fixture.send("site/devices/esp-01/status", &json!({ "type": "sensor" }));

        assert_eq!(outcome, RouteOutcome::Handled(MessageKind::Status));
        assert_eq!(fixture.registry().get("esp-01").unwrap().device_type, "sensor");
    }

    #[test]
    fn test_foreign_prefix_is_discarded() {
        let fixture = Fixture::with_scheme(TopicScheme::new("lab"));

        assert_eq!(
            fixture.send("other/esp-02/status", &json!({ "type": "sensor" })),
            RouteOutcome::Discarded
        );
        assert_eq!(
            fixture.send("devices/esp-02/status", &json!({ "type": "sensor" })),
            RouteOutcome::Discarded
        );

        assert!(fixture.registry().is_empty());
        assert_eq!(fixture.counters.message_count(), 2);
        assert_eq!(fixture.counters.error_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_keep_device_online() {
        let fixture = Fixture::new();
        let _ = fixture.send("devices/esp-01/status", &json!({ "type": "sensor" }));

        tokio::time::advance(Duration::from_secs(20)).await;
        let _ = fixture.send("devices/esp-01/data", &json!({ "temperature": 20 }));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(fixture.registry().online_snapshot().len(), 1);

        // Error reports do not refresh liveness.
        let _ = fixture.send("devices/esp-01/error", &json!({ "error": "overheat" }));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(fixture.registry().online_snapshot().is_empty());
    }
}
