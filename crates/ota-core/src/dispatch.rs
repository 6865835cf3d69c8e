//! Notification dispatch.
//!
//! Transport notifications arrive on the transport's own execution context.
//! Each channel (command acks, sector acks) gets a sink that decodes the raw
//! payload and pushes the typed frame into a FIFO; the state machine is the
//! single consumer and pulls one frame per request it issued.
//!
//! Frames that are not exactly 20 bytes are dropped without delivery, so a
//! waiting consumer only learns about them through its timeout.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::protocol::frame::{CommandAck, SectorAck};
use crate::transport::NotifyCallback;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DispatchError {
    #[error("No acknowledgement within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    /// Every sink was dropped: the transport went away.
    #[error("Notification channel closed")]
    Closed,
}

/// Consumer side of the two acknowledgement channels.
pub struct NotificationDispatcher {
    command_rx: Receiver<CommandAck>,
    sector_rx: Receiver<SectorAck>,
}

/// Producer side, one sink per channel, handed to the transport.
pub struct NotificationSinks {
    pub command: NotifyCallback,
    pub firmware: NotifyCallback,
}

fn command_sink(tx: Sender<CommandAck>) -> NotifyCallback {
    Box::new(move |data: &[u8]| match CommandAck::from_bytes(data) {
        Some(ack) => {
            if !ack.checksum_ok {
                warn!("Command response CRC error");
            }
            trace!(?ack, "Command ack queued");
            if tx.send(ack).is_err() {
                debug!("Command ack dropped, dispatcher gone");
            }
        }
        None => debug!(len = data.len(), "Ignoring malformed command notification"),
    })
}

fn firmware_sink(tx: Sender<SectorAck>) -> NotifyCallback {
    Box::new(move |data: &[u8]| match SectorAck::from_bytes(data) {
        Some(ack) => {
            if !ack.checksum_ok {
                warn!("Sector ack CRC error");
            }
            trace!(?ack, "Sector ack queued");
            if tx.send(ack).is_err() {
                debug!("Sector ack dropped, dispatcher gone");
            }
        }
        None => debug!(len = data.len(), "Ignoring malformed firmware notification"),
    })
}

fn recv<T>(rx: &Receiver<T>, timeout: Option<Duration>) -> Result<T, DispatchError> {
    match timeout {
        None => rx.recv().map_err(|_| DispatchError::Closed),
        Some(t) => rx.recv_timeout(t).map_err(|e| match e {
            RecvTimeoutError::Timeout => DispatchError::Timeout {
                timeout_ms: t.as_millis() as u64,
            },
            RecvTimeoutError::Disconnected => DispatchError::Closed,
        }),
    }
}

impl NotificationDispatcher {
    /// Create a dispatcher together with the sinks that feed it.
    ///
    /// The dispatcher keeps no sender of its own: once the transport drops
    /// both sinks, pending and future receives fail with `Closed`.
    pub fn channel() -> (Self, NotificationSinks) {
        let (command_tx, command_rx) = mpsc::channel();
        let (sector_tx, sector_rx) = mpsc::channel();
        (
            Self {
                command_rx,
                sector_rx,
            },
            NotificationSinks {
                command: command_sink(command_tx),
                firmware: firmware_sink(sector_tx),
            },
        )
    }

    /// Wait for the next command acknowledgement. `None` waits indefinitely.
    pub fn next_command_ack(&self, timeout: Option<Duration>) -> Result<CommandAck, DispatchError> {
        recv(&self.command_rx, timeout)
    }

    /// Wait for the next sector acknowledgement. `None` waits indefinitely.
    pub fn next_sector_ack(&self, timeout: Option<Duration>) -> Result<SectorAck, DispatchError> {
        recv(&self.sector_rx, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;
    use std::thread;

    const SHORT: Option<Duration> = Some(Duration::from_millis(50));

    #[test]
    fn test_delivery_preserves_order() {
        let (dispatcher, sinks) = NotificationDispatcher::channel();
        (sinks.firmware)(&SectorAck::new(0, FW_ACK_SUCCESS, 1).to_bytes());
        (sinks.firmware)(&SectorAck::new(1, FW_ACK_CRC_ERROR, 1).to_bytes());

        let first = dispatcher.next_sector_ack(SHORT).unwrap();
        let second = dispatcher.next_sector_ack(SHORT).unwrap();
        assert_eq!(first.sector_sent, 0);
        assert_eq!(second.status, FW_ACK_CRC_ERROR);
    }

    #[test]
    fn test_channels_are_independent() {
        let (dispatcher, sinks) = NotificationDispatcher::channel();
        (sinks.command)(&CommandAck::new(CMD_START, ACK_ACCEPTED).to_bytes());

        assert!(matches!(
            dispatcher.next_sector_ack(SHORT),
            Err(DispatchError::Timeout { timeout_ms: 50 })
        ));
        assert_eq!(
            dispatcher.next_command_ack(SHORT).unwrap().response,
            ACK_ACCEPTED
        );
    }

    #[test]
    fn test_malformed_payload_not_delivered() {
        let (dispatcher, sinks) = NotificationDispatcher::channel();
        (sinks.command)(&[0u8; 7]);
        assert!(matches!(
            dispatcher.next_command_ack(SHORT),
            Err(DispatchError::Timeout { .. })
        ));
    }

    #[test]
    fn test_corrupt_frame_delivered_with_sentinel() {
        let (dispatcher, sinks) = NotificationDispatcher::channel();
        let mut frame = CommandAck::new(CMD_START, ACK_ACCEPTED).to_bytes();
        frame[18] ^= 0x10;
        (sinks.command)(&frame);
        assert_eq!(
            dispatcher.next_command_ack(SHORT).unwrap().response,
            RSP_CRC_ERROR
        );
    }

    #[test]
    fn test_dropped_sinks_close_channel() {
        let (dispatcher, sinks) = NotificationDispatcher::channel();
        drop(sinks);
        assert_eq!(dispatcher.next_command_ack(None), Err(DispatchError::Closed));
    }

    #[test]
    fn test_cross_thread_delivery() {
        let (dispatcher, sinks) = NotificationDispatcher::channel();
        let producer = thread::spawn(move || {
            for i in 0..3u16 {
                (sinks.firmware)(&SectorAck::new(i, FW_ACK_SUCCESS, i + 1).to_bytes());
            }
        });
        for i in 0..3u16 {
            let ack = dispatcher.next_sector_ack(None).unwrap();
            assert_eq!(ack.sector_sent, i);
        }
        producer.join().unwrap();
    }
}
