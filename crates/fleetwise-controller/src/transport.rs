use std::fmt;
use std::time::Duration;

use rumqttc::v5::{
    AsyncClient, Event, EventLoop, MqttOptions, mqttbytes::QoS, mqttbytes::v5::Packet,
};

use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info};

use crate::error::{Error, ErrorKind, Result};
use crate::publisher::CommandPublisher;
use crate::router::{RouteOutcome, Router};

/// The default broker host.
pub const DEFAULT_BROKER_HOST: &str = "localhost";

/// The default broker port.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// The default client identifier.
pub const DEFAULT_CLIENT_ID: &str = "fleetwise-controller";

// Keep alive time to send `pingreq` to broker when the connection is idle.
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

// The capacity of the bounded request channel of the client.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

// Time waited after a connection error before polling again.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// The broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    host: String,
    port: u16,
    client_id: String,
    keep_alive: Duration,
    channel_capacity: usize,
    retry_delay: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.into(),
            port: DEFAULT_BROKER_PORT,
            client_id: DEFAULT_CLIENT_ID.into(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl BrokerConfig {
    /// Creates a [`BrokerConfig`] with the default settings.
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the broker host.
    #[must_use]
    #[inline]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the broker port.
    #[must_use]
    #[inline]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the client identifier.
    #[must_use]
    #[inline]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Sets the keep alive interval.
    #[must_use]
    #[inline]
    pub const fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets how many requests the client buffers before refusing new ones.
    #[must_use]
    #[inline]
    pub const fn channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }

    /// Sets the delay before polling again after a connection error.
    #[must_use]
    #[inline]
    pub const fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Returns the broker address as `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A [`CommandPublisher`] backed by an `MQTT` client.
///
/// Commands are enqueued without waiting, at most once.
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    /// Returns the underlying client.
    #[must_use]
    #[inline]
    pub const fn client(&self) -> &AsyncClient {
        &self.client
    }
}

impl CommandPublisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| {
                error!("Impossible to publish on topic {topic}: {e}");
                Error::from(e)
            })
    }
}

/// The receiving side of a broker connection.
///
/// It holds the [`EventLoop`] along with the settings of the loop polling it.
pub struct BrokerConnection {
    eventloop: EventLoop,
    retry_delay: Duration,
}

impl fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl BrokerConnection {
    /// Returns the delay before polling again after a connection error.
    #[must_use]
    #[inline]
    pub const fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

/// Creates an `MQTT` client for a broker.
///
/// No connection is made until the returned [`BrokerConnection`] is polled,
/// which is what [`crate::controller::Controller::start_receiver`] does.
#[must_use]
pub fn connect(config: &BrokerConfig) -> (MqttPublisher, BrokerConnection) {
    let mut mqttoptions = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    let _ = mqttoptions.set_keep_alive(config.keep_alive);

    let (client, eventloop) = AsyncClient::new(mqttoptions, config.channel_capacity);

    (
        MqttPublisher { client },
        BrokerConnection {
            eventloop,
            retry_delay: config.retry_delay,
        },
    )
}

/// A handle to the receiver task.
#[derive(Debug)]
pub struct ReceiverHandle {
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ReceiverHandle {
    /// Whether the receiver task has stopped.
    #[must_use]
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the receiver task and waits for it to finish.
    pub async fn shutdown(self) {
        // Stop the infinite loop
        self.cancellation_token.cancel();

        if let Err(e) = self.handle.await {
            error!("Failed to await the receiver task: {e}");
        }
    }
}

pub(crate) fn spawn_receiver(
    publisher: &MqttPublisher,
    connection: BrokerConnection,
    router: Router,
    filters: Vec<String>,
) -> ReceiverHandle {
    let cancellation_token = CancellationToken::new();

    let handle = tokio::spawn(run_receiver(
        publisher.client.clone(),
        connection.eventloop,
        router,
        filters,
        cancellation_token.clone(),
        connection.retry_delay,
    ));

    ReceiverHandle {
        cancellation_token,
        handle,
    }
}

async fn run_receiver(
    client: AsyncClient,
    mut eventloop: EventLoop,
    router: Router,
    filters: Vec<String>,
    cancellation_token: CancellationToken,
    retry_delay: Duration,
) {
    loop {
        let event = tokio::select! {
            biased;
            // Use the cancellation token to stop the loop
            () = cancellation_token.cancelled() => { break; }
            // Poll the `MQTT` event coming from the network
            event = eventloop.poll() => event,
        };

        match event {
            Ok(event) => handle_event(&client, &router, &filters, event),
            Err(e) => {
                router.transport_error(&Error::from(e));
                tokio::select! {
                    biased;
                    () = cancellation_token.cancelled() => { break; }
                    () = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }
    drop(eventloop);
    drop(client);
}

fn handle_event(client: &AsyncClient, router: &Router, filters: &[String], event: Event) {
    let packet = match event {
        Event::Incoming(packet) => packet,
        Event::Outgoing(outgoing) => {
            debug!("Outgoing packet: {:?}", outgoing);
            return;
        }
    };

    match packet {
        Packet::ConnAck(_) => {
            router.transport_connected();
            subscribe(client, router, filters);
        }
        Packet::Publish(publish) => {
            let _ = route_publish(router, &publish.topic, &publish.payload);
        }
        Packet::Disconnect(_) => router.transport_disconnected(),
        packet => debug!("Packet ignored: {:?}", packet),
    }
}

// Subscriptions are renewed on every connection, since a clean session
// forgets them.
fn subscribe(client: &AsyncClient, router: &Router, filters: &[String]) {
    for filter in filters {
        match client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
            Ok(()) => info!("Subscribed to topic {filter}"),
            Err(e) => router.transport_error(&Error::new(
                ErrorKind::Transport,
                format!("Impossible to subscribe to topic {filter}: {e}"),
            )),
        }
    }
}

fn route_publish(router: &Router, topic: &[u8], payload: &[u8]) -> RouteOutcome {
    let topic = String::from_utf8_lossy(topic);
    router.route(&topic, payload)
}
