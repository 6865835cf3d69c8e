//! Acknowledgement handlers.
//!
//! Each handler inspects one decoded acknowledgement, updates the
//! [`TransferSession`] and tells the session loop what to do next. They
//! never touch the transport.

use tracing::{debug, warn};

use crate::error::OtaError;
use crate::events::{OtaEvent, OtaObserver};
use crate::protocol::ack::{CommandResponse, SectorStatus};
use crate::protocol::frame::{CommandAck, SectorAck};
use crate::state::machine::{TransferSession, TransferState};

/// Result of handling an acknowledgement.
#[derive(Debug)]
pub enum HandleResult {
    /// Send the same request again.
    Resend,
    /// Send the request for the sector now at the cursor.
    Continue,
    /// Last sector acknowledged.
    Complete,
    /// Fatal protocol outcome.
    Abort(OtaError),
}

/// Handler context.
pub struct HandlerContext<'a, O: OtaObserver> {
    pub observer: &'a O,
    pub session: &'a mut TransferSession,
}

impl<O: OtaObserver> HandlerContext<'_, O> {
    fn emit(&self, event: OtaEvent) {
        self.observer.on_event(&event);
    }

    fn goto(&mut self, to: TransferState) {
        let from = self.session.state();
        self.session.goto_state(to);
        self.emit(OtaEvent::PhaseChanged { from, to });
    }

    fn retry_or_give_up(&self, request: String) -> HandleResult {
        if self.session.retry_allowed() {
            HandleResult::Resend
        } else {
            HandleResult::Abort(OtaError::RetryLimit {
                request,
                attempts: self.session.attempts(),
            })
        }
    }
}

/// Handle the acknowledgement to a start command.
pub fn handle_start_ack<O: OtaObserver>(
    ack: &CommandAck,
    ctx: &mut HandlerContext<'_, O>,
) -> HandleResult {
    match ack.response_kind() {
        CommandResponse::ChecksumFailure => {
            warn!("Start acknowledgement corrupted, resending start command");
            ctx.retry_or_give_up("start command".to_string())
        }
        CommandResponse::Accepted => {
            ctx.session.begin_upload();
            ctx.emit(OtaEvent::StartAccepted);
            ctx.goto(TransferState::UploadingSector(0));
            HandleResult::Continue
        }
        response => HandleResult::Abort(OtaError::StartRejected { response }),
    }
}

/// Handle the acknowledgement to a sector upload.
///
/// Success is attributed to the sector at the cursor; the sector echoed by
/// the device is only logged.
pub fn handle_sector_ack<O: OtaObserver>(
    ack: &SectorAck,
    ctx: &mut HandlerContext<'_, O>,
) -> HandleResult {
    let sector = ctx.session.cursor();
    let status = ack.status_kind();
    debug!(
        sector,
        echoed = ack.sector_sent,
        current = ack.current_sector,
        %status,
        "Sector ack"
    );

    match status {
        SectorStatus::Success => {
            let total = ctx.session.sector_count();
            ctx.emit(OtaEvent::Progress {
                sector,
                total,
                percent: ctx.session.progress_percent(sector),
            });
            if ctx.session.advance() {
                ctx.goto(TransferState::UploadingSector(ctx.session.cursor()));
                HandleResult::Continue
            } else {
                HandleResult::Complete
            }
        }
        s if s.is_retryable() => {
            ctx.emit(OtaEvent::SectorRetry {
                sector,
                reason: s.to_string(),
            });
            let result = ctx.retry_or_give_up(format!("sector {}", sector));
            if matches!(result, HandleResult::Resend) {
                ctx.goto(TransferState::UploadingSector(sector));
            }
            result
        }
        SectorStatus::SectorError => {
            let target = ack.current_sector;
            if !ctx.session.jump_to(target as usize) {
                return HandleResult::Abort(OtaError::InvalidSectorTarget {
                    target,
                    sector_count: ctx.session.sector_count(),
                });
            }
            ctx.emit(OtaEvent::SectorRedirect {
                from: sector,
                to: target as usize,
            });
            ctx.goto(TransferState::UploadingSector(target as usize));
            HandleResult::Continue
        }
        status => HandleResult::Abort(OtaError::UnknownStatus { sector, status }),
    }
}
