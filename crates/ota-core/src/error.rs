//! Error types for OTA transfers.

use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::payload::PayloadError;
use crate::protocol::ack::{CommandResponse, SectorStatus};
use crate::transport::TransportError;

/// Result type for OTA session operations.
pub type Result<T> = std::result::Result<T, OtaError>;

/// Reasons a transfer session ends without completing.
#[derive(Debug, Error)]
pub enum OtaError {
    /// Device refused the start command.
    #[error("Start command rejected: {response}")]
    StartRejected { response: CommandResponse },

    /// Sector acknowledgement carried a status outside the protocol.
    #[error("Unknown error: sector {sector} acknowledged with {status}")]
    UnknownStatus { sector: usize, status: SectorStatus },

    /// Device asked to resume from a sector the image does not have.
    #[error("Device requested sector {target}, image has {sector_count} sectors")]
    InvalidSectorTarget { target: u16, sector_count: usize },

    /// Acknowledgement did not arrive in time.
    #[error("Transfer stalled: no acknowledgement within {timeout_ms}ms")]
    Stalled { timeout_ms: u64 },

    /// Retry policy exhausted.
    #[error("Giving up on {request} after {attempts} attempts")]
    RetryLimit { request: String, attempts: u32 },

    /// Invalid image or transport geometry.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// Link failure or disconnection.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<DispatchError> for OtaError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Timeout { timeout_ms } => OtaError::Stalled { timeout_ms },
            DispatchError::Closed => OtaError::Transport(TransportError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_errors_map() {
        assert!(matches!(
            OtaError::from(DispatchError::Timeout { timeout_ms: 10 }),
            OtaError::Stalled { timeout_ms: 10 }
        ));
        assert!(matches!(
            OtaError::from(DispatchError::Closed),
            OtaError::Transport(TransportError::Disconnected)
        ));
    }

    #[test]
    fn test_messages() {
        let e = OtaError::StartRejected {
            response: CommandResponse::Rejected,
        };
        assert_eq!(e.to_string(), "Start command rejected: rejected");

        let e = OtaError::UnknownStatus {
            sector: 4,
            status: SectorStatus::Unknown(9),
        };
        assert_eq!(
            e.to_string(),
            "Unknown error: sector 4 acknowledged with unknown (0x0009)"
        );
    }
}
