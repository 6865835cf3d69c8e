//! OTA Session - High-level orchestrator for a firmware transfer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result as AnyResult;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::dispatch::{NotificationDispatcher, NotificationSinks};
use crate::error::{OtaError, Result};
use crate::events::{OtaEvent, OtaObserver, PacketDirection, TracingObserver};
use crate::payload::{FirmwareImage, chunk, max_chunk_payload};
use crate::protocol::frame::Command;
use crate::state::handlers::{HandleResult, HandlerContext, handle_sector_ack, handle_start_ack};
use crate::state::machine::{RetryPolicy, TransferReport, TransferSession, TransferState};
use crate::transport::{Attribute, GattTransport, NotifyCallback, TransportError};

/// Configuration for an OTA session.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Overrides the unit size reported by the transport.
    pub unit_size: Option<usize>,
    /// Bound on each acknowledgement wait. Unset waits forever.
    pub ack_timeout_ms: Option<u64>,
    /// Sends of one request before giving up. Unset retries forever.
    pub max_attempts: Option<u32>,
    /// Write a stop command before disconnecting on a protocol failure.
    pub send_stop_on_abort: bool,
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> AnyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> AnyResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
        }
    }

    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_ms.map(Duration::from_millis)
    }
}

/// OTA Session - drives one image through the transfer state machine.
pub struct OtaSession<O: OtaObserver> {
    config: SessionConfig,
    observer: Arc<O>,
}

impl OtaSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: OtaObserver + 'static> OtaSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Transfer `image` over `transport`.
    ///
    /// The transport is disconnected when this returns, whatever the outcome.
    #[instrument(skip_all, fields(image_size = image.len()))]
    pub fn run<T: GattTransport>(
        &self,
        transport: &T,
        image: &FirmwareImage,
    ) -> Result<TransferReport> {
        let transport = ObservableTransport {
            inner: transport,
            observer: &self.observer,
        };
        let mut session = TransferSession::new(image, self.config.retry_policy());
        info!(
            size = image.len(),
            sectors = session.sector_count(),
            "Starting OTA update"
        );

        match self.drive(&transport, &mut session) {
            Ok(()) => {
                self.goto(&mut session, TransferState::Complete);
                let report = session.report().clone();
                self.emit(OtaEvent::Complete {
                    report: report.clone(),
                });
                self.close(&transport);
                Ok(report)
            }
            Err(e) => {
                let transfer_open = matches!(
                    session.state(),
                    TransferState::UploadingSector(_) | TransferState::AwaitingSectorAck(_)
                );
                self.goto(&mut session, TransferState::Aborted);
                self.emit(OtaEvent::Aborted {
                    reason: e.to_string(),
                });
                if self.config.send_stop_on_abort
                    && transfer_open
                    && !matches!(e, OtaError::Transport(_))
                {
                    let stop = Command::Stop.to_bytes();
                    if let Err(err) = transport.write(Attribute::Command, &stop, true) {
                        warn!(error = %err, "Failed to send stop command");
                    }
                }
                self.close(&transport);
                Err(e)
            }
        }
    }

    fn drive<T: GattTransport>(
        &self,
        transport: &T,
        session: &mut TransferSession,
    ) -> Result<()> {
        let unit_size = self.config.unit_size.unwrap_or_else(|| transport.unit_size());
        let max_payload = max_chunk_payload(unit_size)?;
        let timeout = self.config.ack_timeout();

        let (dispatcher, sinks) = NotificationDispatcher::channel();
        let NotificationSinks { command, firmware } = sinks;
        transport.subscribe(Attribute::Command, command)?;

        let start = Command::Start {
            image_size: session.image_size(),
        }
        .to_bytes();
        self.goto(session, TransferState::AwaitingStartAck);
        loop {
            session.record_start_sent();
            transport.write(Attribute::Command, &start, true)?;
            self.emit(OtaEvent::StartSent {
                image_size: session.image_size(),
                attempt: session.attempts(),
            });

            let ack = dispatcher.next_command_ack(timeout)?;
            let mut ctx = HandlerContext {
                observer: self.observer.as_ref(),
                session: &mut *session,
            };
            match handle_start_ack(&ack, &mut ctx) {
                HandleResult::Resend => continue,
                HandleResult::Continue | HandleResult::Complete => break,
                HandleResult::Abort(e) => return Err(e),
            }
        }

        transport.subscribe(Attribute::Firmware, firmware)?;

        loop {
            session.record_sector_sent();
            let index = session.cursor();
            let attempt = session.attempts();
            let sector = session.current_sector();
            let tag = sector.wire_tag();
            let chunks = chunk(sector.bytes(), tag, max_payload);
            for c in &chunks {
                transport.write(Attribute::Firmware, &c.to_bytes(), false)?;
            }
            self.emit(OtaEvent::SectorSent {
                sector: index,
                tag,
                chunks: chunks.len(),
                attempt,
            });
            self.goto(session, TransferState::AwaitingSectorAck(index));

            let ack = dispatcher.next_sector_ack(timeout)?;
            let mut ctx = HandlerContext {
                observer: self.observer.as_ref(),
                session: &mut *session,
            };
            match handle_sector_ack(&ack, &mut ctx) {
                HandleResult::Resend | HandleResult::Continue => continue,
                HandleResult::Complete => return Ok(()),
                HandleResult::Abort(e) => return Err(e),
            }
        }
    }

    fn emit(&self, event: OtaEvent) {
        self.observer.on_event(&event);
    }

    fn goto(&self, session: &mut TransferSession, to: TransferState) {
        let from = session.state();
        session.goto_state(to);
        self.emit(OtaEvent::PhaseChanged { from, to });
    }

    fn close<T: GattTransport>(&self, transport: &T) {
        if let Err(e) = transport.disconnect() {
            warn!(error = %e, "Disconnect failed");
        }
    }
}

/// Transport wrapper that emits packet events.
struct ObservableTransport<'a, T: GattTransport, O: OtaObserver> {
    inner: &'a T,
    observer: &'a Arc<O>,
}

fn packet(direction: PacketDirection, attribute: Attribute, data: &[u8]) -> OtaEvent {
    OtaEvent::Packet {
        direction,
        attribute,
        length: data.len(),
        data: Some(data.iter().take(32).cloned().collect()),
    }
}

impl<T: GattTransport, O: OtaObserver + 'static> GattTransport for ObservableTransport<'_, T, O> {
    fn write(
        &self,
        attribute: Attribute,
        data: &[u8],
        with_response: bool,
    ) -> std::result::Result<(), TransportError> {
        let res = self.inner.write(attribute, data, with_response);
        if res.is_ok() {
            self.observer
                .on_event(&packet(PacketDirection::Tx, attribute, data));
        }
        res
    }

    fn subscribe(
        &self,
        attribute: Attribute,
        callback: NotifyCallback,
    ) -> std::result::Result<(), TransportError> {
        let observer = Arc::clone(self.observer);
        self.inner.subscribe(
            attribute,
            Box::new(move |data: &[u8]| {
                observer.on_event(&packet(PacketDirection::Rx, attribute, data));
                callback(data);
            }),
        )
    }

    fn unit_size(&self) -> usize {
        self.inner.unit_size()
    }

    fn disconnect(&self) -> std::result::Result<(), TransportError> {
        self.inner.disconnect()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}
