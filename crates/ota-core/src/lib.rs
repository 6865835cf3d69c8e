//! OTA-Core: firmware-over-the-air transfer engine for BLE devices.
//!
//! This crate delivers a firmware image to a device running a NimBLE OTA
//! receiver, over a GATT service with a command characteristic and a
//! firmware characteristic.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, CRC-16, 20-byte command and acknowledgement frames
//! - **Payload**: Sector segmentation and chunking of the firmware image
//! - **Transport**: GATT abstraction (btleplug, mock, device emulator)
//! - **Dispatch**: Routing of notifications to the waiting state machine
//! - **State**: Transfer state machine and acknowledgement handlers
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use ota_core::payload::FirmwareImage;
//! use ota_core::session::{OtaSession, SessionConfig};
//! use ota_core::transport::{BleOptions, BleTransport};
//!
//! let image = FirmwareImage::load("firmware.bin").expect("read image");
//! let transport = BleTransport::connect("AA:BB:CC:DD:EE:FF", &BleOptions::default())
//!     .expect("connect");
//!
//! let session = OtaSession::new(SessionConfig::default());
//! let report = session.run(&transport, &image).expect("OTA failed");
//! println!("sent {} sectors", report.sectors_sent);
//! ```

pub mod dispatch;
pub mod error;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use dispatch::{DispatchError, NotificationDispatcher};
pub use error::OtaError;
pub use events::{NullObserver, OtaEvent, OtaObserver, PacketDirection, TracingObserver};
pub use payload::{FirmwareImage, PayloadError};
pub use protocol::{CommandResponse, SectorStatus};
pub use session::{OtaSession, SessionConfig};
pub use state::{RetryPolicy, TransferReport, TransferState};
#[cfg(feature = "ble")]
pub use transport::{BleOptions, BleTransport};
pub use transport::{
    Attribute, DeviceEmulator, FaultPlan, GattTransport, MockTransport, TransportError,
};
