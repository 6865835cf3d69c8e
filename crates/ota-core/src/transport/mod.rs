//! Transport layer module.

#[cfg(feature = "ble")]
pub mod ble;
pub mod emulator;
pub mod mock;
pub mod traits;

#[cfg(feature = "ble")]
pub use ble::{BleOptions, BleTransport};
pub use emulator::{DeviceEmulator, FaultPlan};
pub use mock::{MockTransport, WriteRecord};
pub use traits::{Attribute, GattTransport, NotifyCallback, TransportError};
