use alloc::string::String;

use serde::{Deserialize, Serialize};

use crate::color::Rgb;

/// The origin of a [`GenericCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandSource {
    /// An operator addressed a single device.
    #[serde(rename = "web")]
    Operator,
    /// An operator addressed every online device.
    Broadcast,
}

/// A free-form command forwarded to a device as is.
///
/// Timestamps are expressed as seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericCommand {
    /// Command name, interpreted by the device firmware.
    pub command: String,
    /// Time the command was issued.
    pub timestamp: f64,
    /// Command origin.
    pub source: CommandSource,
}

impl GenericCommand {
    /// Creates a [`GenericCommand`].
    #[must_use]
    pub fn new(command: impl Into<String>, timestamp: f64, source: CommandSource) -> Self {
        Self {
            command: command.into(),
            timestamp,
            source,
        }
    }
}

/// A coordination command understood by every device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Sets the color of an RGB device.
    SetColor {
        /// Red channel.
        red: u8,
        /// Green channel.
        green: u8,
        /// Blue channel.
        blue: u8,
        /// Time the command was issued, in Unix seconds.
        timestamp: f64,
    },
    /// Releases the action button of a device.
    ResetButton {
        /// Time the command was issued, in Unix seconds.
        timestamp: f64,
    },
    /// Asks every listening device to announce itself again.
    Discover {
        /// Time the command was issued, in Unix seconds.
        timestamp: f64,
    },
}

impl Command {
    /// Creates a [`Command::SetColor`].
    #[must_use]
    pub const fn set_color(color: Rgb, timestamp: f64) -> Self {
        Self::SetColor {
            red: color.red,
            green: color.green,
            blue: color.blue,
            timestamp,
        }
    }

    /// Creates a [`Command::ResetButton`].
    #[must_use]
    pub const fn reset_button(timestamp: f64) -> Self {
        Self::ResetButton { timestamp }
    }

    /// Creates a [`Command::Discover`].
    #[must_use]
    pub const fn discover(timestamp: f64) -> Self {
        Self::Discover { timestamp }
    }

    /// Returns the command name as it appears in the payload.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SetColor { .. } => "SET_COLOR",
            Self::ResetButton { .. } => "RESET_BUTTON",
            Self::Discover { .. } => "DISCOVER",
        }
    }
}
