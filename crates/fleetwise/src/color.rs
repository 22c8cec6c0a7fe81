use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// The largest value of a color channel.
pub const MAX_CHANNEL: i64 = 255;

/// An RGB color with 8-bit channels.
///
/// Devices report their color as text in the `"red,green,blue"` format,
/// which is the format produced by [`fmt::Display`] and accepted by
/// [`FromStr`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    /// Red channel.
    pub red: u8,
    /// Green channel.
    pub green: u8,
    /// Blue channel.
    pub blue: u8,
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.red, self.green, self.blue)
    }
}

impl Rgb {
    /// The color with all channels off.
    pub const BLACK: Self = Self::new(0, 0, 0);

    /// Creates an [`Rgb`].
    #[must_use]
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Creates an [`Rgb`] clamping each channel to the `[0, 255]` range.
    #[must_use]
    pub fn clamped(red: i64, green: i64, blue: i64) -> Self {
        Self::new(clamp_channel(red), clamp_channel(green), clamp_channel(blue))
    }
}

#[inline]
fn clamp_channel(value: i64) -> u8 {
    u8::try_from(value.clamp(0, MAX_CHANNEL)).unwrap_or(u8::MAX)
}

/// An error produced while parsing an [`Rgb`] from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorParseError {
    /// The text does not contain exactly three channels.
    ChannelCount(usize),
    /// A channel is not an integer.
    InvalidChannel,
}

impl fmt::Display for ColorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelCount(count) => {
                write!(f, "expected 3 color channels, found {count}")
            }
            Self::InvalidChannel => "a color channel is not an integer".fmt(f),
        }
    }
}

impl core::error::Error for ColorParseError {}

impl FromStr for Rgb {
    type Err = ColorParseError;

    // Out-of-range channels are clamped rather than rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut channels = [0i64; 3];
        let mut count = 0;

        for part in s.split(',') {
            if let Some(channel) = channels.get_mut(count) {
                *channel = part
                    .trim()
                    .parse()
                    .map_err(|_| ColorParseError::InvalidChannel)?;
            }
            count += 1;
        }

        if count != channels.len() {
            return Err(ColorParseError::ChannelCount(count));
        }

        let [red, green, blue] = channels;
        Ok(Self::clamped(red, green, blue))
    }
}
