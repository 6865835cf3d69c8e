//! Typed interpretation of acknowledgement fields.
//!
//! The raw `u16` stays on the decoded frames; these enums are what the state
//! machine matches on.

use std::fmt;

use super::constants::*;
use super::frame::{CommandAck, SectorAck};

/// Outcome carried by a command acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResponse {
    Accepted,
    Rejected,
    /// The acknowledgement itself arrived corrupted.
    ChecksumFailure,
    Unknown(u16),
}

impl CommandResponse {
    pub fn from_raw(value: u16) -> Self {
        match value {
            ACK_ACCEPTED => Self::Accepted,
            ACK_REJECTED => Self::Rejected,
            RSP_CRC_ERROR => Self::ChecksumFailure,
            other => Self::Unknown(other),
        }
    }

    pub fn raw(&self) -> u16 {
        match self {
            Self::Accepted => ACK_ACCEPTED,
            Self::Rejected => ACK_REJECTED,
            Self::ChecksumFailure => RSP_CRC_ERROR,
            Self::Unknown(v) => *v,
        }
    }
}

impl fmt::Display for CommandResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
            Self::ChecksumFailure => write!(f, "checksum failure"),
            Self::Unknown(v) => write!(f, "unknown (0x{:04X})", v),
        }
    }
}

/// Status carried by a sector acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorStatus {
    Success,
    CrcError,
    /// Device expects a different sector; the ack's `current_sector` says which.
    SectorError,
    LengthError,
    /// The acknowledgement itself arrived corrupted.
    ChecksumFailure,
    Unknown(u16),
}

impl SectorStatus {
    pub fn from_raw(value: u16) -> Self {
        match value {
            FW_ACK_SUCCESS => Self::Success,
            FW_ACK_CRC_ERROR => Self::CrcError,
            FW_ACK_SECTOR_ERROR => Self::SectorError,
            FW_ACK_LEN_ERROR => Self::LengthError,
            RSP_CRC_ERROR => Self::ChecksumFailure,
            other => Self::Unknown(other),
        }
    }

    pub fn raw(&self) -> u16 {
        match self {
            Self::Success => FW_ACK_SUCCESS,
            Self::CrcError => FW_ACK_CRC_ERROR,
            Self::SectorError => FW_ACK_SECTOR_ERROR,
            Self::LengthError => FW_ACK_LEN_ERROR,
            Self::ChecksumFailure => RSP_CRC_ERROR,
            Self::Unknown(v) => *v,
        }
    }

    /// Statuses answered by resending the same sector.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CrcError | Self::LengthError | Self::ChecksumFailure
        )
    }
}

impl fmt::Display for SectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::CrcError => write!(f, "CRC error"),
            Self::SectorError => write!(f, "sector error"),
            Self::LengthError => write!(f, "length error"),
            Self::ChecksumFailure => write!(f, "ack checksum failure"),
            Self::Unknown(v) => write!(f, "unknown (0x{:04X})", v),
        }
    }
}

impl CommandAck {
    pub fn response_kind(&self) -> CommandResponse {
        CommandResponse::from_raw(self.response)
    }
}

impl SectorAck {
    pub fn status_kind(&self) -> SectorStatus {
        SectorStatus::from_raw(self.status)
    }
}
