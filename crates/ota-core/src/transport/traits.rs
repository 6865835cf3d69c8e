//! GATT transport abstraction.
//!
//! Defines the `GattTransport` trait the transfer engine drives, allowing
//! different implementations (btleplug, mock, device emulator).

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No Bluetooth adapter available")]
    AdapterNotFound,

    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Device not found: {address}")]
    DeviceNotFound { address: String },

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Attribute not found: {0}")]
    AttributeNotFound(Attribute),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// OTA service attributes the engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// Start/stop commands and their acknowledgements.
    Command,
    /// Firmware chunks and sector acknowledgements.
    Firmware,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Command => write!(f, "command"),
            Attribute::Firmware => write!(f, "firmware"),
        }
    }
}

/// Notification handler registered with [`GattTransport::subscribe`].
///
/// Invoked on whatever execution context the transport delivers
/// notifications from. Transports drop their handlers on disconnect.
pub type NotifyCallback = Box<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Abstract attribute read/write/notify transport.
///
/// This trait enables:
/// - Production implementation using btleplug
/// - Mock implementation for unit testing
/// - An in-process device emulator for end-to-end tests
pub trait GattTransport: Send + Sync {
    /// Write `data` to `attribute`, optionally waiting for a link-level
    /// write response.
    fn write(
        &self,
        attribute: Attribute,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError>;

    /// Register for notifications on `attribute`, replacing any previous handler.
    fn subscribe(&self, attribute: Attribute, callback: NotifyCallback)
    -> Result<(), TransportError>;

    /// Maximum bytes per write negotiated with the peer (the ATT MTU).
    fn unit_size(&self) -> usize;

    /// Tear down the link.
    fn disconnect(&self) -> Result<(), TransportError>;

    /// Check if the peer is still connected.
    fn is_connected(&self) -> bool;
}
