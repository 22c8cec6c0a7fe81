use std::borrow::Cow;

/// All possible error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A device payload cannot be decoded.
    PayloadDecode,
    /// An operation targets a device absent from the registry.
    UnknownDevice,
    /// A color mix needs at least two eligible devices.
    InsufficientEligibleDevices,
    /// A command cannot be handed over to the transport.
    Publish,
    /// The transport connection failed.
    Transport,
    /// A command payload cannot be serialized.
    Serialization,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::PayloadDecode => "Payload Decode",
            Self::UnknownDevice => "Unknown Device",
            Self::InsufficientEligibleDevices => "Insufficient Eligible Devices",
            Self::Publish => "Publish",
            Self::Transport => "Transport",
            Self::Serialization => "Serialization",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// A controller error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {description}")]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[inline]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn unknown_device(id: &str) -> Self {
        Self::new(
            ErrorKind::UnknownDevice,
            format!("Device `{id}` not found"),
        )
    }

    pub(crate) fn payload_decode(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::PayloadDecode, description)
    }
}

impl From<rumqttc::v5::ClientError> for Error {
    fn from(e: rumqttc::v5::ClientError) -> Self {
        Self::new(ErrorKind::Publish, e.to_string())
    }
}

impl From<rumqttc::v5::ConnectionError> for Error {
    fn from(e: rumqttc::v5::ConnectionError) -> Self {
        Self::new(ErrorKind::Transport, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Serialization, e.to_string())
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
