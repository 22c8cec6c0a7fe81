use chrono::Utc;

use fleetwise::command::{Command, CommandSource, GenericCommand};
use fleetwise::topic::TopicScheme;

use serde::Serialize;

use crate::error::Result;

/// The outbound port commands are published through.
///
/// Publishing is fire-and-forget: an implementation hands the payload over
/// to its transport and returns without waiting for the device.
pub trait CommandPublisher: Send + Sync {
    /// Publishes a payload on a topic.
    ///
    /// # Errors
    ///
    /// Fails when the transport refuses the payload.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

impl<P: CommandPublisher + ?Sized> CommandPublisher for std::sync::Arc<P> {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        (**self).publish(topic, payload)
    }
}

/// Returns the current time as seconds since the Unix epoch.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn unix_timestamp() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

// Encodes commands and sends them to the topics of a scheme.
pub(crate) struct Outbound<'a, P: ?Sized> {
    publisher: &'a P,
    scheme: &'a TopicScheme,
}

impl<'a, P: CommandPublisher + ?Sized> Outbound<'a, P> {
    pub(crate) const fn new(publisher: &'a P, scheme: &'a TopicScheme) -> Self {
        Self { publisher, scheme }
    }

    pub(crate) fn command(&self, device_id: &str, command: &Command) -> Result<()> {
        self.send(&self.scheme.command_topic(device_id), command)
    }

    pub(crate) fn generic(&self, device_id: &str, command: &str, source: CommandSource) -> Result<()> {
        let command = GenericCommand::new(command, unix_timestamp(), source);
        self.send(&self.scheme.command_topic(device_id), &command)
    }

    pub(crate) fn discovery(&self) -> Result<()> {
        let command = Command::discover(unix_timestamp());
        self.send(&self.scheme.discovery_topic(), &command)
    }

    fn send<T: Serialize>(&self, topic: &str, payload: &T) -> Result<()> {
        let payload = serde_json::to_vec(payload)?;
        self.publisher.publish(topic, payload)
    }
}
