//! Transfer state machine: states, session state and retry policy.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::payload::{FirmwareImage, Sector};

/// Phase of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    #[default]
    Init,
    AwaitingStartAck,
    UploadingSector(usize),
    AwaitingSectorAck(usize),
    Complete,
    Aborted,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::Init => write!(f, "INIT"),
            TransferState::AwaitingStartAck => write!(f, "AWAITING_START_ACK"),
            TransferState::UploadingSector(i) => write!(f, "UPLOADING_SECTOR({})", i),
            TransferState::AwaitingSectorAck(i) => write!(f, "AWAITING_SECTOR_ACK({})", i),
            TransferState::Complete => write!(f, "COMPLETE"),
            TransferState::Aborted => write!(f, "ABORTED"),
        }
    }
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Complete | TransferState::Aborted)
    }
}

/// How many times the same request may be sent.
///
/// Retries on corruption are immediate; `None` keeps resending for as long
/// as the device keeps asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub const UNBOUNDED: Self = Self { max_attempts: None };

    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
        }
    }

    /// Whether a request already sent `attempts` times may be sent again.
    pub fn allows_another(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}

/// Outcome counters for a finished transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub image_size: u32,
    pub sector_count: usize,
    /// Sector uploads, resends included.
    pub sectors_sent: usize,
    /// Resends of the start command or of a sector.
    pub retries: usize,
    /// Device-directed cursor jumps.
    pub redirects: usize,
}

/// Runtime state of one transfer. Owned by the session driving it.
#[derive(Debug)]
pub struct TransferSession {
    state: TransferState,
    sectors: Vec<Sector>,
    cursor: usize,
    /// Sends of the request currently in flight.
    attempts: u32,
    policy: RetryPolicy,
    report: TransferReport,
}

impl TransferSession {
    pub fn new(image: &FirmwareImage, policy: RetryPolicy) -> Self {
        let sectors = image.sectors();
        Self {
            state: TransferState::Init,
            cursor: 0,
            attempts: 0,
            policy,
            report: TransferReport {
                image_size: image.size_u32(),
                sector_count: sectors.len(),
                ..Default::default()
            },
            sectors,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, new_state: TransferState) {
        tracing::debug!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
    }

    pub fn image_size(&self) -> u32 {
        self.report.image_size
    }

    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current_sector(&self) -> &Sector {
        &self.sectors[self.cursor]
    }

    pub fn is_last_sector(&self) -> bool {
        self.cursor + 1 == self.sectors.len()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn report(&self) -> &TransferReport {
        &self.report
    }

    /// Record that the start command went out.
    pub fn record_start_sent(&mut self) {
        self.attempts += 1;
        if self.attempts > 1 {
            self.report.retries += 1;
        }
    }

    /// Record that the sector at the cursor went out.
    pub fn record_sector_sent(&mut self) {
        self.attempts += 1;
        self.report.sectors_sent += 1;
        if self.attempts > 1 {
            self.report.retries += 1;
        }
    }

    pub fn retry_allowed(&self) -> bool {
        self.policy.allows_another(self.attempts)
    }

    /// Move to the next sector. Returns false if the cursor was on the last one.
    pub fn advance(&mut self) -> bool {
        self.attempts = 0;
        if self.is_last_sector() {
            return false;
        }
        self.cursor += 1;
        true
    }

    /// Reposition the cursor at the device's request.
    /// Returns false if `target` is outside the image.
    pub fn jump_to(&mut self, target: usize) -> bool {
        if target >= self.sectors.len() {
            return false;
        }
        self.attempts = 0;
        self.cursor = target;
        self.report.redirects += 1;
        true
    }

    /// Clear the attempt counter when the handshake is accepted.
    pub fn begin_upload(&mut self) {
        self.attempts = 0;
        self.cursor = 0;
    }

    /// Percentage reported once sector `index` is acknowledged:
    /// `index / (count - 1) * 100`, or 100 for a single-sector image.
    pub fn progress_percent(&self, index: usize) -> f64 {
        let count = self.sectors.len();
        if count <= 1 {
            100.0
        } else {
            index as f64 / (count - 1) as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(len: usize, policy: RetryPolicy) -> TransferSession {
        let image = FirmwareImage::from_bytes(vec![0x11; len]).unwrap();
        TransferSession::new(&image, policy)
    }

    #[test]
    fn test_progress_values() {
        let s = session(3 * 4096, RetryPolicy::UNBOUNDED);
        assert_eq!(s.progress_percent(0), 0.0);
        assert_eq!(s.progress_percent(1), 50.0);
        assert_eq!(s.progress_percent(2), 100.0);
    }

    #[test]
    fn test_single_sector_progress_is_complete() {
        let s = session(10, RetryPolicy::UNBOUNDED);
        assert_eq!(s.sector_count(), 1);
        assert_eq!(s.progress_percent(0), 100.0);
    }

    #[test]
    fn test_advance_and_jump() {
        let mut s = session(3 * 4096, RetryPolicy::UNBOUNDED);
        assert!(s.advance());
        assert!(s.advance());
        assert!(s.is_last_sector());
        assert!(!s.advance());

        assert!(s.jump_to(0));
        assert_eq!(s.cursor(), 0);
        assert!(!s.jump_to(3));
        assert_eq!(s.cursor(), 0);
        assert_eq!(s.report().redirects, 1);
    }

    #[test]
    fn test_retry_policy() {
        assert!(RetryPolicy::UNBOUNDED.allows_another(u32::MAX - 1));
        let p = RetryPolicy::bounded(3);
        assert!(p.allows_another(2));
        assert!(!p.allows_another(3));
    }

    #[test]
    fn test_attempt_accounting() {
        let mut s = session(4096, RetryPolicy::bounded(2));
        s.record_sector_sent();
        assert!(s.retry_allowed());
        s.record_sector_sent();
        assert!(!s.retry_allowed());
        assert_eq!(s.report().retries, 1);
        assert_eq!(s.report().sectors_sent, 2);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TransferState::UploadingSector(3).to_string(), "UPLOADING_SECTOR(3)");
        assert!(TransferState::Aborted.is_terminal());
        assert!(!TransferState::AwaitingStartAck.is_terminal());
    }
}
