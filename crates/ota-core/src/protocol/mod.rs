//! Protocol module - OTA wire definitions.

pub mod ack;
pub mod constants;
pub mod crc;
pub mod frame;

pub use ack::{CommandResponse, SectorStatus};
pub use constants::*;
pub use crc::crc16;
pub use frame::{Command, CommandAck, CommandFrame, Frame, SectorAck};
