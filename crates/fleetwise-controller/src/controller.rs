use std::sync::Arc;
use std::time::Duration;

use fleetwise::color::Rgb;
use fleetwise::command::CommandSource;
use fleetwise::topic::{DEFAULT_PREFIX, TopicScheme};

use serde::Serialize;

use tracing::{info, warn};

use crate::counters::{SystemCounters, format_uptime};
use crate::device::DeviceRecord;
use crate::error::{Error, ErrorKind, Result};
use crate::event_log::{DEFAULT_EVENT_LOG_CAPACITY, EventLog, EventPage};
use crate::liveness::DEFAULT_LIVENESS_WINDOW;
use crate::mixer::{self, MixOutcome};
use crate::publisher::{CommandPublisher, Outbound};
use crate::registry::{DeviceStats, Registry};
use crate::router::{RouteOutcome, Router};
use crate::transport::{self, BrokerConnection, MqttPublisher, ReceiverHandle};

/// The controller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    topic_prefix: String,
    liveness_window: Duration,
    event_log_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            topic_prefix: DEFAULT_PREFIX.into(),
            liveness_window: DEFAULT_LIVENESS_WINDOW,
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
        }
    }
}

impl ControllerConfig {
    /// Creates a [`ControllerConfig`] with the default settings.
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the prefix of all device topics.
    #[must_use]
    #[inline]
    pub fn topic_prefix(mut self, topic_prefix: impl Into<String>) -> Self {
        self.topic_prefix = topic_prefix.into();
        self
    }

    /// Sets the time after which a silent device is considered offline.
    #[must_use]
    #[inline]
    pub const fn liveness_window(mut self, liveness_window: Duration) -> Self {
        self.liveness_window = liveness_window;
        self
    }

    /// Sets the maximum number of retained events.
    #[must_use]
    #[inline]
    pub const fn event_log_capacity(mut self, event_log_capacity: usize) -> Self {
        self.event_log_capacity = event_log_capacity;
        self
    }
}

/// A summary of the controller state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    /// Time since the controller started, as `HH:MM:SS`.
    pub uptime: String,
    /// Number of inbound messages.
    pub message_count: u64,
    /// Number of errors.
    pub error_count: u64,
    /// Number of known devices.
    pub device_count: usize,
    /// Number of online devices.
    pub online_count: usize,
    /// Whether the transport is connected to the broker.
    pub transport_connected: bool,
}

/// A controller for a fleet of `fleetwise` devices.
///
/// The main functionalities include:
///
/// - Routing inbound device messages into the device registry.
/// - Reporting the fleet state, its counters and its recent events.
/// - Sending commands to single devices or to the whole fleet.
/// - Rotating the colors of all eligible RGB devices.
///
/// Commands are handed over to a [`CommandPublisher`] without waiting for
/// the devices. Local state is updated optimistically, and the next report
/// of each device overwrites it.
#[derive(Debug)]
pub struct Controller<P> {
    scheme: TopicScheme,
    router: Router,
    registry: Arc<Registry>,
    events: Arc<EventLog>,
    counters: Arc<SystemCounters>,
    publisher: P,
}

impl<P: CommandPublisher> Controller<P> {
    /// Creates a [`Controller`] publishing its commands through `publisher`.
    #[must_use]
    pub fn new(config: ControllerConfig, publisher: P) -> Self {
        let events = Arc::new(EventLog::new(config.event_log_capacity));
        let counters = Arc::new(SystemCounters::new());
        let registry = Arc::new(Registry::new(config.liveness_window, Arc::clone(&events)));
        let scheme = TopicScheme::new(config.topic_prefix);
        let router = Router::new(
            scheme.clone(),
            Arc::clone(&registry),
            Arc::clone(&events),
            Arc::clone(&counters),
        );

        events.info("Controller started");

        Self {
            scheme,
            router,
            registry,
            events,
            counters,
            publisher,
        }
    }

    /// Returns the [`Router`] inbound messages are fed to.
    #[must_use]
    #[inline]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Returns the [`TopicScheme`].
    #[must_use]
    #[inline]
    pub const fn topic_scheme(&self) -> &TopicScheme {
        &self.scheme
    }

    /// Returns the [`CommandPublisher`].
    #[must_use]
    #[inline]
    pub const fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Routes an inbound message.
    #[inline]
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> RouteOutcome {
        self.router.route(topic, payload)
    }

    /// Returns the [`DeviceStats`].
    #[must_use]
    #[inline]
    pub fn stats(&self) -> DeviceStats {
        self.registry.stats()
    }

    /// Returns all online devices, in no particular order.
    #[must_use]
    #[inline]
    pub fn online_snapshot(&self) -> Vec<DeviceRecord> {
        self.registry.online_snapshot()
    }

    /// Returns the devices a color mix would involve, ordered by identifier.
    #[must_use]
    pub fn eligible_devices(&self) -> Vec<DeviceRecord> {
        self.registry.with_devices(|devices, now, window| {
            devices.refresh_liveness(now, window);
            mixer::eligible_devices(devices)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    /// Returns a device.
    ///
    /// # Errors
    ///
    /// The device is unknown.
    pub fn device(&self, id: &str) -> Result<DeviceRecord> {
        self.registry
            .get(id)
            .ok_or_else(|| Error::unknown_device(id))
    }

    /// Returns the newest `limit` events.
    #[must_use]
    #[inline]
    pub fn events(&self, limit: usize) -> EventPage {
        self.events.recent(limit)
    }

    /// Returns the [`SystemInfo`].
    #[must_use]
    pub fn system_info(&self) -> SystemInfo {
        let online_count = self.registry.online_snapshot().len();

        SystemInfo {
            uptime: format_uptime(self.counters.uptime()),
            message_count: self.counters.message_count(),
            error_count: self.counters.error_count(),
            device_count: self.registry.len(),
            online_count,
            transport_connected: self.counters.transport_connected(),
        }
    }

    /// Rotates the colors of all eligible devices by one position.
    ///
    /// A command failure for a device does not stop the others, and is
    /// reported in the returned [`MixOutcome`].
    ///
    /// # Errors
    ///
    /// Fewer than two devices are eligible, and no command is sent.
    pub fn mix(&self) -> Result<MixOutcome> {
        let outcome = mixer::mix(&self.registry, &self.outbound(), &self.events)?;
        for _ in &outcome.failed {
            self.counters.record_error();
        }
        Ok(outcome)
    }

    /// Sets the color of a device, clamping each channel to `[0, 255]`.
    ///
    /// # Errors
    ///
    /// The device is unknown or the command cannot be published.
    pub fn set_color(&self, id: &str, red: i64, green: i64, blue: i64) -> Result<Rgb> {
        mixer::set_color(
            &self.registry,
            &self.outbound(),
            &self.events,
            id,
            (red, green, blue),
        )
        .inspect_err(|e| self.record_publish_error(e))
    }

    /// Releases the action button of a device.
    ///
    /// Returns whether the device is known. The command is published in
    /// any case.
    ///
    /// # Errors
    ///
    /// The command cannot be published.
    pub fn reset_button(&self, id: &str) -> Result<bool> {
        mixer::reset_button(&self.registry, &self.outbound(), &self.events, id)
            .inspect_err(|e| self.record_publish_error(e))
    }

    /// Sends a free-form command to a device.
    ///
    /// # Errors
    ///
    /// The device is unknown or the command cannot be published.
    pub fn send_command(&self, id: &str, command: &str) -> Result<()> {
        if !self.registry.contains(id) {
            return Err(Error::unknown_device(id));
        }

        self.outbound()
            .generic(id, command, CommandSource::Operator)
            .inspect_err(|e| self.record_command_error(e))?;

        info!(device = id, command, "Command sent");
        self.events.info(format!("Command sent: {id} -> {command}"));
        Ok(())
    }

    /// Sends a free-form command to every online device.
    ///
    /// Returns how many devices the command has been sent to.
    pub fn broadcast(&self, command: &str) -> usize {
        let outbound = self.outbound();

        let sent = self
            .registry
            .online_snapshot()
            .iter()
            .filter(|record| {
                outbound
                    .generic(&record.id, command, CommandSource::Broadcast)
                    .inspect_err(|e| self.record_command_error(e))
                    .is_ok()
            })
            .count();

        info!(command, sent, "Command broadcast");
        self.events
            .info(format!("Broadcast command: {command} -> {sent} devices"));
        sent
    }

    /// Asks every listening device to announce itself.
    ///
    /// # Errors
    ///
    /// The discovery broadcast cannot be published.
    pub fn discover(&self) -> Result<()> {
        self.outbound()
            .discovery()
            .inspect_err(|e| self.record_command_error(e))?;

        info!("Device discovery started");
        self.events.info("Device discovery started");
        Ok(())
    }

    fn outbound(&self) -> Outbound<'_, P> {
        Outbound::new(&self.publisher, &self.scheme)
    }

    fn record_publish_error(&self, e: &Error) {
        if e.kind() == ErrorKind::Publish {
            self.record_command_error(e);
        }
    }

    fn record_command_error(&self, e: &Error) {
        self.counters.record_error();
        warn!("Command not sent: {e}");
        self.events.error(format!("Command not sent: {e}"));
    }
}

impl Controller<MqttPublisher> {
    /// Starts the task receiving device messages from the broker.
    ///
    /// On every connection the task subscribes to the topics of all
    /// message kinds, and routes each received message. Connection errors
    /// are counted, and polling resumes after the retry delay of the
    /// [`BrokerConnection`].
    ///
    /// Call [`ReceiverHandle::shutdown`] to stop it.
    #[must_use]
    pub fn start_receiver(&self, connection: BrokerConnection) -> ReceiverHandle {
        transport::spawn_receiver(
            &self.publisher,
            connection,
            self.router.clone(),
            self.scheme.subscription_filters(),
        )
    }
}
