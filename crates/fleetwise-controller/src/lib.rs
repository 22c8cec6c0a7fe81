//! The `fleetwise-controller` library crate keeps track of a fleet of
//! `fleetwise` devices that announce themselves and report their telemetry
//! over an `MQTT` broker, and lets an operator inspect and command them.
//!
//! Core functionalities of this crate include:
//!
//! - Routing every inbound device message to the handler of its kind
//! - Maintaining an in-memory registry of devices, whose liveness is
//!   recomputed lazily on each read
//! - Rotating the colors of all eligible RGB devices in a single step
//! - Sending commands and discovery broadcasts to devices
//! - Recording a bounded log of operational events
//!
//! The registry never manages a connection by itself. Inbound messages are
//! fed to a [`router::Router`] and outbound commands go through a
//! [`publisher::CommandPublisher`]. The [`transport`] module plugs both into
//! a `rumqttc` client, driving its event loop on a `tokio` task.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// The controller facade over the fleet state.
pub mod controller;
/// System-wide message and error counters.
pub mod counters;
/// Device records and their updates.
pub mod device;
/// Error management.
pub mod error;
/// A bounded log of operational events.
pub mod event_log;
/// Liveness classification of devices.
pub mod liveness;
/// Color coordination among RGB devices.
pub mod mixer;
/// The outbound command port.
pub mod publisher;
/// The device registry.
pub mod registry;
/// Inbound message routing.
pub mod router;
/// The `MQTT` adapter.
pub mod transport;

#[cfg(test)]
mod tests;
