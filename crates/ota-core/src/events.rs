//! Event system for UI decoupling.
//!
//! Allows CLI or GUI front ends to follow a transfer without tight
//! coupling to the core logic.

use std::fmt;

use crate::state::machine::{TransferReport, TransferState};
use crate::transport::Attribute;

/// Events emitted by an OTA session.
#[derive(Debug, Clone)]
pub enum OtaEvent {
    /// State machine transition.
    PhaseChanged {
        from: TransferState,
        to: TransferState,
    },
    /// Start command written.
    StartSent { image_size: u32, attempt: u32 },
    /// Device accepted the start command.
    StartAccepted,
    /// All chunks of a sector written.
    SectorSent {
        sector: usize,
        tag: u16,
        chunks: usize,
        attempt: u32,
    },
    /// Sector will be resent after a recoverable failure.
    SectorRetry { sector: usize, reason: String },
    /// Device moved the cursor.
    SectorRedirect { from: usize, to: usize },
    /// Sector acknowledged.
    Progress {
        sector: usize,
        total: usize,
        percent: f64,
    },
    /// Frame written or notification received.
    Packet {
        direction: PacketDirection,
        attribute: Attribute,
        length: usize,
        data: Option<Vec<u8>>,
    },
    /// Transfer finished successfully.
    Complete { report: TransferReport },
    /// Transfer ended on an error.
    Aborted { reason: String },
}

/// Packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving OTA events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait OtaObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &OtaEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl OtaObserver for NullObserver {
    fn on_event(&self, _event: &OtaEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl OtaObserver for TracingObserver {
    fn on_event(&self, event: &OtaEvent) {
        match event {
            OtaEvent::PhaseChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Phase changed");
            }
            OtaEvent::StartSent {
                image_size,
                attempt,
            } => {
                tracing::info!(image_size, attempt, "Start command sent");
            }
            OtaEvent::StartAccepted => {
                tracing::info!("Start command accepted");
            }
            OtaEvent::SectorSent {
                sector,
                tag,
                chunks,
                attempt,
            } => {
                tracing::debug!(
                    sector,
                    tag = %format!("{:04X}", tag),
                    chunks,
                    attempt,
                    "Sector sent"
                );
            }
            OtaEvent::SectorRetry { sector, reason } => {
                tracing::warn!(sector, reason = %reason, "Resending sector");
            }
            OtaEvent::SectorRedirect { from, to } => {
                tracing::warn!(from, to, "Device requested sector");
            }
            OtaEvent::Progress {
                sector,
                total,
                percent,
            } => {
                tracing::info!(
                    sector,
                    total,
                    progress = %format!("{:.1}%", percent),
                    "Progress"
                );
            }
            OtaEvent::Packet {
                direction,
                attribute,
                length,
                ..
            } => {
                tracing::trace!(dir = %direction, attr = %attribute, len = length, "Packet");
            }
            OtaEvent::Complete { report } => {
                tracing::info!(
                    sectors = report.sector_count,
                    sent = report.sectors_sent,
                    retries = report.retries,
                    redirects = report.redirects,
                    "OTA update complete"
                );
            }
            OtaEvent::Aborted { reason } => {
                tracing::error!(reason = %reason, "OTA update aborted");
            }
        }
    }
}
