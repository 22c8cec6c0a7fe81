use alloc::string::String;

use serde_json::{Map, Value};

use crate::value::{AttributeValue, Attributes};

/// Canonical name of the device type field.
pub const TYPE: &str = "type";
/// Canonical name of the free heap field.
pub const FREE_HEAP: &str = "free_heap";
/// Canonical name of the uptime field.
pub const UPTIME: &str = "uptime";
/// Canonical name of the version field.
pub const VERSION: &str = "version";
/// Canonical name of the firmware field.
pub const FIRMWARE: &str = "firmware";
/// Canonical name of the configuration mode field.
pub const CONFIG_MODE: &str = "config_mode";
/// Canonical name of the broker address field.
pub const MQTT_BROKER: &str = "mqtt_broker";
/// Canonical name of the led state field.
pub const LED_STATE: &str = "led_state";
/// Canonical name of the action button field.
pub const ACTION_BUTTON_PRESSED: &str = "action_button_pressed";
/// Canonical name of the led field.
pub const LED_ON: &str = "led_on";
/// Canonical name of the RGB color field.
pub const RGB_COLOR: &str = "rgb_color";
/// Canonical name of the availability field.
pub const AVAILABLE: &str = "available";

/// Name of the IP address field. It has no aliases.
pub const IP: &str = "ip";
/// Name of the error description field of an error report.
pub const ERROR: &str = "error";

/// A canonical field name along with its legacy aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldAlias {
    /// Canonical name.
    pub canonical: &'static str,
    /// Legacy aliases, in lookup order.
    pub aliases: &'static [&'static str],
}

impl FieldAlias {
    const fn new(canonical: &'static str, aliases: &'static [&'static str]) -> Self {
        Self { canonical, aliases }
    }

    /// Returns the names of the field in lookup order, canonical first.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        core::iter::once(self.canonical).chain(self.aliases.iter().copied())
    }

    /// Whether `key` is one of the names of the field.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        self.names().any(|name| name == key)
    }
}

/// Field names accepted in device payloads.
pub const FIELD_ALIASES: &[FieldAlias] = &[
    FieldAlias::new(TYPE, &["t"]),
    FieldAlias::new(FREE_HEAP, &["heap"]),
    FieldAlias::new(UPTIME, &["up"]),
    FieldAlias::new(VERSION, &["ver"]),
    FieldAlias::new(FIRMWARE, &["fw"]),
    FieldAlias::new(CONFIG_MODE, &["cfg"]),
    FieldAlias::new(MQTT_BROKER, &["mqtt"]),
    FieldAlias::new(LED_STATE, &["led_s"]),
    FieldAlias::new(ACTION_BUTTON_PRESSED, &["btn"]),
    FieldAlias::new(LED_ON, &["led"]),
    FieldAlias::new(RGB_COLOR, &["rgb"]),
    FieldAlias::new(AVAILABLE, &["avail"]),
];

/// Returns the [`FieldAlias`] of a canonical name.
#[must_use]
pub fn alias_of(canonical: &str) -> Option<&'static FieldAlias> {
    FIELD_ALIASES
        .iter()
        .find(|alias| alias.canonical == canonical)
}

/// Looks up a field by its canonical name.
///
/// The canonical name is tried first, then each alias in order. The first
/// present key wins. Names outside of [`FIELD_ALIASES`] are looked up
/// verbatim.
#[must_use]
pub fn lookup<'a>(payload: &'a Map<String, Value>, canonical: &str) -> Option<&'a Value> {
    match alias_of(canonical) {
        Some(alias) => alias.names().find_map(|name| payload.get(name)),
        None => payload.get(canonical),
    }
}

/// Converts a payload into [`Attributes`] with canonical field names.
///
/// Aliased fields come first, in [`FIELD_ALIASES`] order, followed by the
/// remaining fields under their original names.
#[must_use]
pub fn normalize(payload: &Map<String, Value>) -> Attributes {
    let mut attributes = Attributes::default();

    for alias in FIELD_ALIASES {
        if let Some(value) = alias.names().find_map(|name| payload.get(name)) {
            let _ = attributes.insert(alias.canonical.into(), AttributeValue::from(value));
        }
    }

    for (key, value) in payload {
        if !FIELD_ALIASES.iter().any(|alias| alias.matches(key)) {
            let _ = attributes.insert(key.clone(), AttributeValue::from(value));
        }
    }

    attributes
}
