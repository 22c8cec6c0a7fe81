use fleetwise::color::Rgb;
use fleetwise::command::Command;

use serde::Serialize;

use tracing::{info, warn};

use crate::device::DeviceRecord;
use crate::error::{Error, ErrorKind, Result};
use crate::event_log::EventLog;
use crate::publisher::{CommandPublisher, Outbound, unix_timestamp};
use crate::registry::{Devices, Registry};

/// The minimum number of eligible devices for a color mix.
pub const MIN_MIX_DEVICES: usize = 2;

/// A color given to a device by a mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColorAssignment<'a> {
    /// Device identifier.
    pub device_id: &'a str,
    /// Assigned color.
    pub color: Rgb,
}

/// The result of a color mix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MixOutcome {
    /// Eligible devices, ordered by identifier, with their new colors.
    pub assignments: Vec<(String, Rgb)>,
    /// Devices whose command could not be published.
    pub failed: Vec<String>,
}

impl MixOutcome {
    /// Returns the number of eligible devices.
    #[must_use]
    pub fn eligible(&self) -> usize {
        self.assignments.len()
    }

    /// Returns the number of devices whose command has been published.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.assignments.len() - self.failed.len()
    }

    /// Whether some, but not all, commands failed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty() && self.failed.len() < self.assignments.len()
    }

    /// Returns the color assignments.
    pub fn iter(&self) -> impl Iterator<Item = ColorAssignment<'_>> {
        self.assignments
            .iter()
            .map(|(device_id, color)| ColorAssignment {
                device_id,
                color: *color,
            })
    }
}

/// Rotates colors right by one position.
///
/// The color at position `i` moves to position `i + 1`, and the last color
/// moves to the first position.
pub fn rotate_colors(colors: &mut [Rgb]) {
    colors.rotate_right(1);
}

// Eligible devices ordered by identifier.
pub(crate) fn eligible_devices(devices: &Devices) -> Vec<&DeviceRecord> {
    let mut eligible: Vec<&DeviceRecord> = devices
        .records()
        .filter(|record| record.is_eligible())
        .collect();
    eligible.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    eligible
}

// Rotates the colors of all eligible devices.
//
// The registry stays locked for the whole mix, so no device joins or leaves
// the eligible set halfway.
pub(crate) fn mix<P: CommandPublisher + ?Sized>(
    registry: &Registry,
    outbound: &Outbound<'_, P>,
    events: &EventLog,
) -> Result<MixOutcome> {
    let outcome = registry.with_devices(|devices, now, window| {
        devices.refresh_liveness(now, window);

        let (ids, mut colors): (Vec<String>, Vec<Rgb>) = eligible_devices(devices)
            .into_iter()
            .map(|record| (record.id.clone(), record.color()))
            .unzip();

        if ids.len() < MIN_MIX_DEVICES {
            return Err(ids.len());
        }

        rotate_colors(&mut colors);

        let timestamp = unix_timestamp();
        let mut failed = Vec::new();

        for (id, color) in ids.iter().zip(&colors) {
            match outbound.command(id, &Command::set_color(*color, timestamp)) {
                Ok(()) => {
                    if let Some(record) = devices.get_mut(id) {
                        record.rgb_color = color.to_string();
                        record.led_on = true;
                    }
                }
                Err(e) => {
                    warn!(device = %id, "Color mix command failed: {e}");
                    failed.push(id.clone());
                }
            }
        }

        Ok(MixOutcome {
            assignments: ids.into_iter().zip(colors).collect(),
            failed,
        })
    });

    match outcome {
        Ok(outcome) => {
            info!(
                eligible = outcome.eligible(),
                succeeded = outcome.succeeded(),
                "Color mix completed"
            );
            events.info(format!(
                "Color mix: {}/{} devices updated",
                outcome.succeeded(),
                outcome.eligible()
            ));
            for id in &outcome.failed {
                events.error(format!("Color mix command failed for {id}"));
            }
            Ok(outcome)
        }
        Err(eligible) => {
            warn!(eligible, "Not enough devices for a color mix");
            events.warning(format!(
                "Color mix needs at least {MIN_MIX_DEVICES} eligible devices, found {eligible}"
            ));
            Err(Error::new(
                ErrorKind::InsufficientEligibleDevices,
                format!(
                    "At least {MIN_MIX_DEVICES} eligible devices are needed, found {eligible}"
                ),
            ))
        }
    }
}

// Sets the color of a known device.
pub(crate) fn set_color<P: CommandPublisher + ?Sized>(
    registry: &Registry,
    outbound: &Outbound<'_, P>,
    events: &EventLog,
    id: &str,
    channels: (i64, i64, i64),
) -> Result<Rgb> {
    let color = Rgb::clamped(channels.0, channels.1, channels.2);

    registry.with_devices(|devices, _, _| -> Result<()> {
        let record = devices.get_mut(id).ok_or_else(|| Error::unknown_device(id))?;
        outbound.command(id, &Command::set_color(color, unix_timestamp()))?;
        record.rgb_color = color.to_string();
        record.led_on = true;
        Ok(())
    })?;

    info!(device = id, %color, "Color set");
    events.info(format!("Color set: {id} -> {color}"));

    Ok(color)
}

// Releases the action button of a device.
//
// The command is published even for unknown devices, the local state is
// updated only for known ones.
pub(crate) fn reset_button<P: CommandPublisher + ?Sized>(
    registry: &Registry,
    outbound: &Outbound<'_, P>,
    events: &EventLog,
    id: &str,
) -> Result<bool> {
    let known = registry.with_devices(|devices, _, _| -> Result<bool> {
        outbound.command(id, &Command::reset_button(unix_timestamp()))?;
        let Some(record) = devices.get_mut(id) else {
            return Ok(false);
        };
        record.action_button_pressed = false;
        record.available = true;
        Ok(true)
    })?;

    if known {
        info!(device = id, "Action button reset");
    } else {
        warn!(device = id, "Action button reset sent to an unknown device");
    }
    events.info(format!("Action button reset: {id}"));

    Ok(known)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use fleetwise::color::Rgb;
    use fleetwise::topic::TopicScheme;
    use fleetwise::value::AttributeValue;

    use serde_json::json;

    use crate::device::tests::attributes;
    use crate::device::{DeviceUpdate, RGB_CONTROLLER};
    use crate::error::ErrorKind;
    use crate::event_log::EventLog;
    use crate::liveness::DEFAULT_LIVENESS_WINDOW;
    use crate::publisher::Outbound;
    use crate::registry::Registry;
    use crate::tests::RecordingPublisher;

    use super::{mix, reset_button, rotate_colors, set_color};

    struct Fixture {
        registry: Registry,
        events: Arc<EventLog>,
        scheme: TopicScheme,
    }

    impl Fixture {
        fn new() -> Self {
            let events = Arc::new(EventLog::default());
            Self {
                registry: Registry::new(DEFAULT_LIVENESS_WINDOW, Arc::clone(&events)),
                events,
                scheme: TopicScheme::default(),
            }
        }

        fn rgb(&self, id: &str, color: &str, pressed: bool) {
            let _ = self.registry.register(
                id,
                RGB_CONTROLLER,
                "10.0.0.5",
                attributes(&[
                    ("rgb_color", AttributeValue::Text(color.into())),
                    ("action_button_pressed", AttributeValue::Bool(pressed)),
                ]),
            );
        }

        fn color(&self, id: &str) -> String {
            self.registry.get(id).unwrap().rgb_color
        }
    }

    fn sorted(colors: Vec<Rgb>) -> Vec<(u8, u8, u8)> {
        let mut channels: Vec<(u8, u8, u8)> = colors
            .into_iter()
            .map(|color| (color.red, color.green, color.blue))
            .collect();
        channels.sort_unstable();
        channels
    }

    #[test]
    fn test_rotate_colors() {
        let mut colors = [Rgb::new(1, 0, 0), Rgb::new(2, 0, 0), Rgb::new(3, 0, 0)];
        rotate_colors(&mut colors);

        assert_eq!(
            colors,
            [Rgb::new(3, 0, 0), Rgb::new(1, 0, 0), Rgb::new(2, 0, 0)]
        );
    }

    #[test]
    fn test_mix_two_devices() {
        let fixture = Fixture::new();
        fixture.rgb("devA", "10,0,0", false);
        fixture.rgb("devB", "0,10,0", false);

        let publisher = RecordingPublisher::new();
        let outbound = Outbound::new(&publisher, &fixture.scheme);

        let outcome = mix(&fixture.registry, &outbound, &fixture.events).unwrap();

        assert_eq!(outcome.succeeded(), 2);
        assert_eq!(outcome.eligible(), 2);
        assert_eq!(fixture.color("devA"), "0,10,0");
        assert_eq!(fixture.color("devB"), "10,0,0");
        assert!(fixture.registry.get("devA").unwrap().led_on);

        let published = publisher.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, "devices/devA/command");
        assert_eq!(published[0].1["command"], "SET_COLOR");
        assert_eq!(published[0].1["green"], 10);
        assert_eq!(published[1].0, "devices/devB/command");
        assert_eq!(published[1].1["red"], 10);
    }

    #[test]
    fn test_mix_conserves_colors() {
        let fixture = Fixture::new();
        let colors = ["1,2,3", "40,50,60", "255,0,0", "1,2,3", "9,9,9"];
        for (i, color) in colors.iter().enumerate() {
            fixture.rgb(&format!("dev-{i}"), color, false);
        }

        let publisher = RecordingPublisher::new();
        let outbound = Outbound::new(&publisher, &fixture.scheme);
        let outcome = mix(&fixture.registry, &outbound, &fixture.events).unwrap();

        let before: Vec<Rgb> = colors.iter().map(|color| color.parse().unwrap()).collect();
        let after: Vec<Rgb> = outcome.iter().map(|assignment| assignment.color).collect();
        assert_eq!(sorted(before), sorted(after));

        // Each device gets a single color, the one of its predecessor.
        let ids: Vec<&str> = outcome.iter().map(|assignment| assignment.device_id).collect();
        assert_eq!(ids, ["dev-0", "dev-1", "dev-2", "dev-3", "dev-4"]);
        assert_eq!(fixture.color("dev-0"), "9,9,9");
        assert_eq!(fixture.color("dev-1"), "1,2,3");
        assert_eq!(fixture.color("dev-4"), "1,2,3");
    }

    #[test]
    fn test_mix_skips_ineligible_devices() {
        let fixture = Fixture::new();
        fixture.rgb("devA", "10,0,0", false);
        fixture.rgb("devB", "0,10,0", true);
        fixture.rgb("devC", "0,0,10", false);
        let _ = fixture
            .registry
            .register("esp-01", "sensor", "10.0.0.2", attributes(&[]));

        let publisher = RecordingPublisher::new();
        let outbound = Outbound::new(&publisher, &fixture.scheme);
        let outcome = mix(&fixture.registry, &outbound, &fixture.events).unwrap();

        assert_eq!(outcome.eligible(), 2);
        assert_eq!(fixture.color("devA"), "0,0,10");
        assert_eq!(fixture.color("devB"), "0,10,0");
        assert_eq!(fixture.color("devC"), "10,0,0");
    }

    #[test]
    fn test_mix_unparseable_color_is_black() {
        let fixture = Fixture::new();
        fixture.rgb("devA", "not a color", false);
        fixture.rgb("devB", "0,10,0", false);

        let publisher = RecordingPublisher::new();
        let outbound = Outbound::new(&publisher, &fixture.scheme);
        let _ = mix(&fixture.registry, &outbound, &fixture.events).unwrap();

        assert_eq!(fixture.color("devA"), "0,10,0");
        assert_eq!(fixture.color("devB"), "0,0,0");
    }

    #[test]
    fn test_mix_needs_two_devices() {
        let fixture = Fixture::new();
        let publisher = RecordingPublisher::new();
        let outbound = Outbound::new(&publisher, &fixture.scheme);

        let error = mix(&fixture.registry, &outbound, &fixture.events).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InsufficientEligibleDevices);

        fixture.rgb("devA", "10,0,0", false);
        let error = mix(&fixture.registry, &outbound, &fixture.events).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InsufficientEligibleDevices);

        assert!(publisher.published().is_empty());
        assert_eq!(fixture.color("devA"), "10,0,0");
    }

    #[test]
    fn test_mix_partial_failure() {
        let fixture = Fixture::new();
        fixture.rgb("devA", "10,0,0", false);
        fixture.rgb("devB", "0,10,0", false);
        fixture.rgb("devC", "0,0,10", false);

        let publisher = RecordingPublisher::failing(&["devB"]);
        let outbound = Outbound::new(&publisher, &fixture.scheme);
        let outcome = mix(&fixture.registry, &outbound, &fixture.events).unwrap();

        assert!(outcome.is_partial());
        assert_eq!(outcome.succeeded(), 2);
        assert_eq!(outcome.failed, ["devB"]);
        assert_eq!(publisher.published().len(), 2);

        // The failed device keeps its color.
        assert_eq!(fixture.color("devA"), "0,0,10");
        assert_eq!(fixture.color("devB"), "0,10,0");
        assert_eq!(fixture.color("devC"), "0,10,0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_mix_ignores_stale_devices() {
        let fixture = Fixture::new();
        fixture.rgb("devA", "10,0,0", false);
        fixture.rgb("devB", "0,10,0", false);

        tokio::time::advance(Duration::from_secs(31)).await;
        fixture.rgb("devC", "0,0,10", false);

        let publisher = RecordingPublisher::new();
        let outbound = Outbound::new(&publisher, &fixture.scheme);
        let error = mix(&fixture.registry, &outbound, &fixture.events).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::InsufficientEligibleDevices);
    }

    #[test]
    fn test_set_color() {
        let fixture = Fixture::new();
        fixture.rgb("devA", "10,0,0", false);

        let publisher = RecordingPublisher::new();
        let outbound = Outbound::new(&publisher, &fixture.scheme);

        let color = set_color(
            &fixture.registry,
            &outbound,
            &fixture.events,
            "devA",
            (300, -5, 7),
        )
        .unwrap();

        assert_eq!(color, Rgb::new(255, 0, 7));
        assert_eq!(fixture.color("devA"), "255,0,7");

        let published = publisher.published();
        let payload = &published[0].1;
        assert_eq!(payload["command"], "SET_COLOR");
        assert_eq!(
            [&payload["red"], &payload["green"], &payload["blue"]],
            [&json!(255), &json!(0), &json!(7)]
        );
        assert!(payload["timestamp"].is_f64());

        let error = set_color(
            &fixture.registry,
            &outbound,
            &fixture.events,
            "ghost",
            (1, 1, 1),
        )
        .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnknownDevice);
        assert_eq!(publisher.published().len(), 1);
    }

    #[test]
    fn test_set_color_publish_failure_keeps_state() {
        let fixture = Fixture::new();
        fixture.rgb("devA", "10,0,0", false);

        let publisher = RecordingPublisher::failing(&["devA"]);
        let outbound = Outbound::new(&publisher, &fixture.scheme);

        let error = set_color(
            &fixture.registry,
            &outbound,
            &fixture.events,
            "devA",
            (0, 0, 0),
        )
        .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Publish);
        assert_eq!(fixture.color("devA"), "10,0,0");
    }

    #[test]
    fn test_reset_button() {
        let fixture = Fixture::new();
        fixture.rgb("devA", "10,0,0", true);
        assert!(!fixture.registry.get("devA").unwrap().available);

        let publisher = RecordingPublisher::new();
        let outbound = Outbound::new(&publisher, &fixture.scheme);

        assert!(reset_button(&fixture.registry, &outbound, &fixture.events, "devA").unwrap());

        let record = fixture.registry.get("devA").unwrap();
        assert!(!record.action_button_pressed);
        assert!(record.available);
        assert_eq!(publisher.published()[0].1["command"], "RESET_BUTTON");

        // Unknown devices still receive the command.
        assert!(!reset_button(&fixture.registry, &outbound, &fixture.events, "ghost").unwrap());
        assert_eq!(publisher.published()[1].0, "devices/ghost/command");
        assert!(fixture.registry.get("ghost").is_none());
    }

    #[test]
    fn test_reported_state_overrides_mix() {
        let fixture = Fixture::new();
        fixture.rgb("devA", "10,0,0", false);
        fixture.rgb("devB", "0,10,0", false);

        let publisher = RecordingPublisher::new();
        let outbound = Outbound::new(&publisher, &fixture.scheme);
        let _ = mix(&fixture.registry, &outbound, &fixture.events).unwrap();

        let update = DeviceUpdate {
            rgb_color: Some("10,0,0".into()),
            ..DeviceUpdate::new()
        };
        assert!(fixture.registry.update("devA", update));
        assert_eq!(fixture.color("devA"), "10,0,0");
    }
}
