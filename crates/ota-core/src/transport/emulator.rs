//! In-process emulation of a NimBLE OTA receiver.
//!
//! Implements [`GattTransport`] by running the device side of the protocol
//! directly on each write, so full transfers can be exercised without
//! hardware. Acknowledgements are delivered synchronously from `write`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::traits::{Attribute, GattTransport, NotifyCallback, TransportError};
use crate::payload::ChunkHeader;
use crate::protocol::constants::*;
use crate::protocol::crc::crc16;
use crate::protocol::frame::{CommandAck, CommandFrame, SectorAck};

/// Faults the emulator injects into an otherwise clean transfer.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Answer every START with a rejection.
    pub reject_start: bool,
    /// Corrupt the checksum of this many command acknowledgements.
    pub corrupt_command_acks: u32,
    /// Corrupt the first acknowledgement sent for each listed sector.
    pub corrupt_sector_acks: Vec<u16>,
    /// When the listed sector completes, reply sector-error pointing at the
    /// target instead, and rewind the expected sector and the committed data
    /// to it. Fires once.
    pub redirect: Option<(u16, u16)>,
    /// Flip a payload byte of the first upload of each listed sector, so its
    /// trailer check fails.
    pub corrupt_sector_data: Vec<u16>,
}

#[derive(Debug, Default)]
struct ReceiverState {
    in_progress: bool,
    file_len: u32,
    recv_len: u32,
    sector: u16,
    packet: u8,
    buf: Vec<u8>,
    /// Set when a chunk arrived for the wrong sector; the sector-error reply
    /// goes out on that sector's last chunk.
    misdirected: bool,
    image: Vec<u8>,
    complete: bool,
    sector_receptions: usize,
    faults: FaultPlan,
    corrupted_acks: HashSet<u16>,
    corrupted_data: HashSet<u16>,
}

/// Device emulator.
pub struct DeviceEmulator {
    state: Mutex<ReceiverState>,
    callbacks: Mutex<HashMap<Attribute, Arc<NotifyCallback>>>,
    unit_size: usize,
    connected: Mutex<bool>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DeviceEmulator {
    pub fn new(unit_size: usize) -> Self {
        Self::with_faults(unit_size, FaultPlan::default())
    }

    pub fn with_faults(unit_size: usize, faults: FaultPlan) -> Self {
        Self {
            state: Mutex::new(ReceiverState {
                faults,
                ..Default::default()
            }),
            callbacks: Mutex::new(HashMap::new()),
            unit_size,
            connected: Mutex::new(true),
        }
    }

    /// Bytes committed so far, in order.
    pub fn received_image(&self) -> Vec<u8> {
        lock(&self.state).image.clone()
    }

    /// Whether the announced file length has been fully received.
    pub fn is_complete(&self) -> bool {
        lock(&self.state).complete
    }

    /// Whether a transfer is currently open.
    pub fn in_progress(&self) -> bool {
        lock(&self.state).in_progress
    }

    /// Number of sector uploads seen (including rejected ones).
    pub fn sector_receptions(&self) -> usize {
        lock(&self.state).sector_receptions
    }

    fn indicate(&self, attribute: Attribute, frame: &[u8]) {
        let callback = lock(&self.callbacks).get(&attribute).cloned();
        match callback {
            Some(cb) => cb(frame),
            None => debug!(%attribute, "No subscriber, indication dropped"),
        }
    }

    fn on_command(&self, data: &[u8]) -> Vec<u8> {
        let mut st = lock(&self.state);

        let Some(frame) = CommandFrame::from_bytes(data) else {
            warn!(len = data.len(), "Command length error");
            return Self::finish_command_ack(&mut st, CommandAck::new(0, ACK_REJECTED));
        };

        let mut ack = CommandAck::new(frame.code, ACK_REJECTED);
        if !frame.checksum_ok || (frame.code != CMD_START && frame.code != CMD_STOP) {
            warn!(code = frame.code, checksum_ok = frame.checksum_ok, "Command error");
        } else if frame.code == CMD_START {
            if st.in_progress {
                warn!("OTA already started");
            } else if st.faults.reject_start {
                info!("Rejecting start command");
            } else {
                info!(fw_length = frame.argument, "Start command accepted");
                st.file_len = frame.argument;
                st.recv_len = 0;
                st.sector = 0;
                st.packet = 0;
                st.buf.clear();
                st.image.clear();
                st.complete = false;
                st.in_progress = true;
                ack.response = ACK_ACCEPTED;
            }
        } else if st.in_progress {
            info!("Stop command received, aborting");
            Self::abort(&mut st);
            ack.response = ACK_ACCEPTED;
        } else {
            warn!("Stop received but OTA not started");
        }

        Self::finish_command_ack(&mut st, ack)
    }

    fn finish_command_ack(st: &mut ReceiverState, ack: CommandAck) -> Vec<u8> {
        let mut bytes = ack.to_bytes();
        if st.faults.corrupt_command_acks > 0 {
            st.faults.corrupt_command_acks -= 1;
            bytes[FRAME_LEN - 1] ^= 0xFF;
        }
        bytes.to_vec()
    }

    fn abort(st: &mut ReceiverState) {
        st.in_progress = false;
        st.file_len = 0;
        st.recv_len = 0;
        st.sector = 0;
        st.packet = 0;
        st.misdirected = false;
        st.buf.clear();
    }

    fn on_firmware(&self, data: &[u8]) -> Option<Vec<u8>> {
        let mut st = lock(&self.state);
        if !st.in_progress {
            warn!("OTA not started, chunk ignored");
            return None;
        }
        let (header, body) = ChunkHeader::parse(data)?;
        let last = header.sequence == SEQUENCE_LAST;

        if header.sector_tag != st.sector && header.sector_tag != SECTOR_TAG_LAST {
            if !st.misdirected {
                warn!(
                    expected = st.sector,
                    received = header.sector_tag,
                    "Sector index error"
                );
            }
            st.misdirected = !last;
            if !last {
                return None;
            }
            st.sector_receptions += 1;
            st.packet = 0;
            st.buf.clear();
            let ack = SectorAck::new(header.sector_tag, FW_ACK_SECTOR_ERROR, st.sector);
            return Some(ack.to_bytes().to_vec());
        }

        if header.sequence != st.packet && !last {
            warn!(expected = st.packet, received = header.sequence, "Packet sequence error");
        }
        st.buf.extend_from_slice(body);
        if !last {
            st.packet = st.packet.wrapping_add(1);
            return None;
        }

        st.packet = 0;
        st.sector_receptions += 1;
        let mut sector = std::mem::take(&mut st.buf);
        let index = st.sector;

        if st.faults.corrupt_sector_data.contains(&index) && st.corrupted_data.insert(index) {
            if let Some(b) = sector.first_mut() {
                *b ^= 0xFF;
            }
        }

        let redirect = st.faults.redirect;
        let status = if let Some((at, target)) = redirect
            && at == index
        {
            st.faults.redirect = None;
            info!(sector = index, target, "Forcing sector redirect");
            let keep = (target as usize * SECTOR_SIZE).min(st.image.len());
            st.image.truncate(keep);
            st.recv_len = keep as u32;
            st.sector = target;
            FW_ACK_SECTOR_ERROR
        } else if sector.len() < SECTOR_CRC_LEN + 1 || sector.len() > FULL_SECTOR_LEN {
            warn!(sector = index, len = sector.len(), "Sector length error");
            FW_ACK_LEN_ERROR
        } else {
            let split = sector.len() - SECTOR_CRC_LEN;
            let expected = u16::from_le_bytes([sector[split], sector[split + 1]]);
            if crc16(&sector[..split]) != expected {
                warn!(sector = index, "Sector CRC error");
                FW_ACK_CRC_ERROR
            } else {
                sector.truncate(split);
                st.recv_len = st.recv_len.saturating_add(split as u32);
                st.image.extend_from_slice(&sector);
                st.sector = st.sector.wrapping_add(1);
                debug!(sector = index, len = split, "Sector committed");
                if st.recv_len >= st.file_len {
                    info!(bytes = st.recv_len, "OTA update complete");
                    st.complete = true;
                    st.in_progress = false;
                }
                FW_ACK_SUCCESS
            }
        };

        let mut bytes = SectorAck::new(header.sector_tag, status, st.sector).to_bytes();
        if st.faults.corrupt_sector_acks.contains(&index) && st.corrupted_acks.insert(index) {
            bytes[FRAME_LEN - 1] ^= 0xFF;
        }
        Some(bytes.to_vec())
    }
}

impl GattTransport for DeviceEmulator {
    fn write(
        &self,
        attribute: Attribute,
        data: &[u8],
        _with_response: bool,
    ) -> Result<(), TransportError> {
        if !*lock(&self.connected) {
            return Err(TransportError::Disconnected);
        }
        let reply = match attribute {
            Attribute::Command => Some(self.on_command(data)),
            Attribute::Firmware => self.on_firmware(data),
        };
        if let Some(frame) = reply {
            self.indicate(attribute, &frame);
        }
        Ok(())
    }

    fn subscribe(
        &self,
        attribute: Attribute,
        callback: NotifyCallback,
    ) -> Result<(), TransportError> {
        if !*lock(&self.connected) {
            return Err(TransportError::Disconnected);
        }
        lock(&self.callbacks).insert(attribute, Arc::new(callback));
        Ok(())
    }

    fn unit_size(&self) -> usize {
        self.unit_size
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        *lock(&self.connected) = false;
        lock(&self.callbacks).clear();
        let mut st = lock(&self.state);
        if st.in_progress {
            info!("Client disconnected mid-transfer, aborting");
            Self::abort(&mut st);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *lock(&self.connected)
    }
}
