//! The communication interface among `fleetwise` devices and their controller.
//!
//! This crate provides APIs to:
//!
//! - Build and decode the topics a device publishes on and the topics a
//!   controller publishes commands to. Every inbound topic has the shape
//!   `{prefix}/{device_id}/{kind}`.
//! - Encode and decode the command payloads sent to a device, such as
//!   setting its color or resetting its action button.
//! - Resolve payload field names, since firmware releases have used both
//!   canonical names and shorter legacy aliases for the same field.
//! - Represent open-ended device attributes as tagged values.
//!
//! A device serializes its reports while the controller deserializes them,
//! and the other way around for commands, so all structures here are both
//! serializable and deserializable.
//!
//! This crate can be compiled for both `std` and `no_std` environments.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

/// RGB colors exchanged with color-capable devices.
pub mod color;
/// Command payloads sent from a controller to its devices.
pub mod command;
/// Canonical payload field names and their legacy aliases.
pub mod fields;
/// Topic definitions and parsing.
pub mod topic;
/// Tagged device attribute values.
pub mod value;

#[cfg(test)]
pub(crate) fn serialize<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap()
}

#[cfg(test)]
pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap()
}
