//! Fixed 20-byte command and acknowledgement frames.
//!
//! Layout shared by every frame on the command and firmware-ack channels:
//!
//! ```text
//! [0..2]   code / ack / sector tag
//! [2..4]   secondary field (low half of size, echoed command, status)
//! [4..6]   context data (high half of size, response, current sector)
//! [6..18]  reserved, zero
//! [18..20] CRC-16 over [0..18]
//! ```

use byteorder::{ByteOrder, LittleEndian};

use super::constants::*;
use super::crc::crc16;

/// A raw frame buffer.
pub type Frame = [u8; FRAME_LEN];

fn seal(frame: &mut Frame) {
    let crc = crc16(&frame[..FRAME_CRC_SPAN]);
    LittleEndian::write_u16(&mut frame[FRAME_CRC_SPAN..], crc);
}

fn trailer_matches(data: &[u8]) -> bool {
    crc16(&data[..FRAME_CRC_SPAN]) == LittleEndian::read_u16(&data[FRAME_CRC_SPAN..FRAME_LEN])
}

/// Host-issued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Begin a transfer of `image_size` bytes.
    Start { image_size: u32 },
    /// Abort the transfer in progress.
    Stop,
}

impl Command {
    pub fn code(&self) -> u16 {
        match self {
            Command::Start { .. } => CMD_START,
            Command::Stop => CMD_STOP,
        }
    }

    pub fn to_bytes(&self) -> Frame {
        let mut frame = [0u8; FRAME_LEN];
        LittleEndian::write_u16(&mut frame[0..2], self.code());
        if let Command::Start { image_size } = self {
            // Size spans the secondary and context fields.
            LittleEndian::write_u32(&mut frame[2..6], *image_size);
        }
        seal(&mut frame);
        frame
    }
}

/// Device-side view of a received command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    pub code: u16,
    /// Bytes 2..6 as a u32 (the image size for START).
    pub argument: u32,
    pub checksum_ok: bool,
}

impl CommandFrame {
    /// Parse a command write. Returns `None` unless exactly 20 bytes.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != FRAME_LEN {
            return None;
        }
        Some(Self {
            code: LittleEndian::read_u16(&data[0..2]),
            argument: LittleEndian::read_u32(&data[2..6]),
            checksum_ok: trailer_matches(data),
        })
    }
}

/// Command acknowledgement, indicated on the command characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandAck {
    pub ack: u16,
    /// Command being acknowledged.
    pub command: u16,
    /// Accept/reject, or [`RSP_CRC_ERROR`] if the frame failed its checksum.
    pub response: u16,
    pub checksum_ok: bool,
}

impl CommandAck {
    pub fn new(command: u16, response: u16) -> Self {
        Self {
            ack: CMD_ACK,
            command,
            response,
            checksum_ok: true,
        }
    }

    /// Decode a notification. Frames of any other length than 20 bytes are
    /// noise and yield `None`. A checksum mismatch overrides `response`
    /// with [`RSP_CRC_ERROR`].
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != FRAME_LEN {
            return None;
        }
        let checksum_ok = trailer_matches(data);
        let response = if checksum_ok {
            LittleEndian::read_u16(&data[4..6])
        } else {
            RSP_CRC_ERROR
        };
        Some(Self {
            ack: LittleEndian::read_u16(&data[0..2]),
            command: LittleEndian::read_u16(&data[2..4]),
            response,
            checksum_ok,
        })
    }

    pub fn to_bytes(&self) -> Frame {
        let mut frame = [0u8; FRAME_LEN];
        LittleEndian::write_u16(&mut frame[0..2], self.ack);
        LittleEndian::write_u16(&mut frame[2..4], self.command);
        LittleEndian::write_u16(&mut frame[4..6], self.response);
        seal(&mut frame);
        frame
    }
}

/// Sector acknowledgement, indicated on the firmware characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorAck {
    /// Sector tag the device received (true index or 0xFFFF).
    pub sector_sent: u16,
    /// Status, or [`RSP_CRC_ERROR`] if the frame failed its checksum.
    pub status: u16,
    /// Sector the device expects next.
    pub current_sector: u16,
    pub checksum_ok: bool,
}

impl SectorAck {
    pub fn new(sector_sent: u16, status: u16, current_sector: u16) -> Self {
        Self {
            sector_sent,
            status,
            current_sector,
            checksum_ok: true,
        }
    }

    /// Decode a notification; same length and checksum rules as
    /// [`CommandAck::from_bytes`].
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != FRAME_LEN {
            return None;
        }
        let checksum_ok = trailer_matches(data);
        let status = if checksum_ok {
            LittleEndian::read_u16(&data[2..4])
        } else {
            RSP_CRC_ERROR
        };
        Some(Self {
            sector_sent: LittleEndian::read_u16(&data[0..2]),
            status,
            current_sector: LittleEndian::read_u16(&data[4..6]),
            checksum_ok,
        })
    }

    pub fn to_bytes(&self) -> Frame {
        let mut frame = [0u8; FRAME_LEN];
        LittleEndian::write_u16(&mut frame[0..2], self.sector_sent);
        LittleEndian::write_u16(&mut frame[2..4], self.status);
        LittleEndian::write_u16(&mut frame[4..6], self.current_sector);
        seal(&mut frame);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_command_layout() {
        let frame = Command::Start {
            image_size: 0x0001_2345,
        }
        .to_bytes();

        assert_eq!(&frame[0..2], &[0x01, 0x00]);
        assert_eq!(&frame[2..6], &[0x45, 0x23, 0x01, 0x00]);
        assert!(frame[6..18].iter().all(|&b| b == 0));
        let crc = crc16(&frame[..18]);
        assert_eq!(&frame[18..20], &crc.to_le_bytes());
    }

    #[test]
    fn test_stop_command_layout() {
        let frame = Command::Stop.to_bytes();
        assert_eq!(&frame[0..2], &[0x02, 0x00]);
        assert!(frame[2..18].iter().all(|&b| b == 0));

        let parsed = CommandFrame::from_bytes(&frame).unwrap();
        assert_eq!(parsed.code, CMD_STOP);
        assert!(parsed.checksum_ok);
    }

    #[test]
    fn test_command_frame_reads_size() {
        let frame = Command::Start { image_size: 5000 }.to_bytes();
        let parsed = CommandFrame::from_bytes(&frame).unwrap();
        assert_eq!(parsed.code, CMD_START);
        assert_eq!(parsed.argument, 5000);
        assert!(parsed.checksum_ok);
    }

    #[test]
    fn test_command_ack_decode() {
        let bytes = CommandAck::new(CMD_START, ACK_ACCEPTED).to_bytes();
        let ack = CommandAck::from_bytes(&bytes).unwrap();
        assert_eq!(ack.ack, CMD_ACK);
        assert_eq!(ack.command, CMD_START);
        assert_eq!(ack.response, ACK_ACCEPTED);
        assert!(ack.checksum_ok);
    }

    #[test]
    fn test_corrupt_command_ack_gets_sentinel() {
        let mut bytes = CommandAck::new(CMD_START, ACK_ACCEPTED).to_bytes();
        bytes[19] ^= 0x01;
        let ack = CommandAck::from_bytes(&bytes).unwrap();
        assert_eq!(ack.response, RSP_CRC_ERROR);
        assert!(!ack.checksum_ok);
    }

    #[test]
    fn test_constructed_acks_equal_decoded() {
        let cmd = CommandAck::new(CMD_START, ACK_REJECTED);
        assert_eq!(CommandAck::from_bytes(&cmd.to_bytes()), Some(cmd));

        let sector = SectorAck::new(0xFFFF, FW_ACK_SUCCESS, 7);
        assert_eq!(SectorAck::from_bytes(&sector.to_bytes()), Some(sector));
    }

    #[test]
    fn test_sector_ack_decode() {
        let bytes = SectorAck::new(3, FW_ACK_SECTOR_ERROR, 1).to_bytes();
        let ack = SectorAck::from_bytes(&bytes).unwrap();
        assert_eq!(ack.sector_sent, 3);
        assert_eq!(ack.status, FW_ACK_SECTOR_ERROR);
        assert_eq!(ack.current_sector, 1);
    }

    #[test]
    fn test_corrupt_payload_overrides_status() {
        let mut bytes = SectorAck::new(1, FW_ACK_SUCCESS, 2).to_bytes();
        bytes[10] = 0xAA;
        let ack = SectorAck::from_bytes(&bytes).unwrap();
        assert_eq!(ack.status, RSP_CRC_ERROR);
        assert_eq!(ack.current_sector, 2);
    }

    #[test]
    fn test_wrong_length_is_noise() {
        assert!(CommandAck::from_bytes(&[0u8; 19]).is_none());
        assert!(SectorAck::from_bytes(&[0u8; 21]).is_none());
        assert!(CommandFrame::from_bytes(&[]).is_none());
    }
}
