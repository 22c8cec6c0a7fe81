use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// The default prefix of all device topics.
pub const DEFAULT_PREFIX: &str = "devices";

/// The last segment of the topic a controller publishes device commands on.
pub const COMMAND_SEGMENT: &str = "command";

/// The last segment of the topic a controller publishes discovery broadcasts on.
pub const DISCOVERY_SEGMENT: &str = "discovery";

/// All [`MessageKind`]s.
pub const ALL_MESSAGE_KINDS: &[MessageKind] = &[
    MessageKind::Status,
    MessageKind::Data,
    MessageKind::Button,
    MessageKind::Disconnect,
    MessageKind::Error,
];

/// All kinds of messages a device publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// The device announces itself along with its description.
    Status,
    /// The device reports telemetry data.
    Data,
    /// The device reports the state of its action button and its led.
    Button,
    /// The device leaves the fleet.
    Disconnect,
    /// The device reports an error.
    Error,
}

impl MessageKind {
    /// Returns the topic segment associated with the [`MessageKind`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Data => "data",
            Self::Button => "button",
            Self::Disconnect => "disconnect",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

/// An error produced when a topic segment is not a known [`MessageKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMessageKind(pub String);

impl fmt::Display for UnknownMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message kind `{}`", self.0)
    }
}

impl core::error::Error for UnknownMessageKind {}

impl FromStr for MessageKind {
    type Err = UnknownMessageKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_MESSAGE_KINDS
            .iter()
            .find(|kind| kind.name() == s)
            .copied()
            .ok_or_else(|| UnknownMessageKind(s.into()))
    }
}

/// A topic published by a device, split into its routing parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTopic<'a> {
    /// Device identifier.
    pub device_id: &'a str,
    /// Raw message kind segment.
    pub kind: &'a str,
}

impl<'a> DeviceTopic<'a> {
    // Splits the `{device_id}/{kind}` part of a topic.
    fn split(path: &'a str) -> Option<Self> {
        let mut segments = path.split('/');
        let device_id = segments.next()?;
        let kind = segments.next()?;

        if device_id.is_empty() {
            return None;
        }

        Some(Self { device_id, kind })
    }

    /// Returns the [`MessageKind`] of the topic.
    ///
    /// # Errors
    ///
    /// Fails when the kind segment is not a known [`MessageKind`].
    pub fn message_kind(&self) -> Result<MessageKind, UnknownMessageKind> {
        self.kind.parse()
    }
}

/// The topic layout of a fleet, rooted at a prefix.
///
/// The prefix may span several levels, such as `site/devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl TopicScheme {
    /// Creates a [`TopicScheme`] from a prefix.
    #[must_use]
    #[inline]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Returns the prefix.
    #[must_use]
    #[inline]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Splits a topic in the `{prefix}/{device_id}/{kind}` format.
    ///
    /// Returns [`None`] when the topic does not start with the prefix,
    /// when it has no device identifier or kind segment, or when the
    /// device identifier is empty. Segments after the kind are ignored.
    #[must_use]
    pub fn parse<'a>(&self, topic: &'a str) -> Option<DeviceTopic<'a>> {
        let path = topic
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('/')?;
        DeviceTopic::split(path)
    }

    /// Returns the topic a device publishes a [`MessageKind`] on.
    #[must_use]
    pub fn device_topic(&self, device_id: &str, kind: MessageKind) -> String {
        format!("{}/{device_id}/{kind}", self.prefix)
    }

    /// Returns the topic a device receives its commands on.
    #[must_use]
    pub fn command_topic(&self, device_id: &str) -> String {
        format!("{}/{device_id}/{COMMAND_SEGMENT}", self.prefix)
    }

    /// Returns the topic all devices receive discovery broadcasts on.
    #[must_use]
    pub fn discovery_topic(&self) -> String {
        format!("{}/{DISCOVERY_SEGMENT}", self.prefix)
    }

    /// Returns the subscription filter matching a [`MessageKind`] of
    /// every device.
    #[must_use]
    pub fn subscription_filter(&self, kind: MessageKind) -> String {
        format!("{}/+/{kind}", self.prefix)
    }

    /// Returns the subscription filters for all [`MessageKind`]s.
    #[must_use]
    pub fn subscription_filters(&self) -> Vec<String> {
        ALL_MESSAGE_KINDS
            .iter()
            .map(|kind| self.subscription_filter(*kind))
            .collect()
    }
}
