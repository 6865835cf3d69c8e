//! Protocol constants for the NimBLE OTA service.
//!
//! All multi-byte fields on the wire are little-endian.

// ============================================================================
// GATT Identifiers
// ============================================================================

/// OTA service (16-bit UUID on the Bluetooth base UUID).
pub const OTA_SERVICE_UUID16: u16 = 0x8018;

/// Firmware characteristic: receives chunks, indicates sector acknowledgements.
/// The device also exposes a progress characteristic at 0x8021; the host
/// never touches it.
pub const FIRMWARE_CHAR_UUID16: u16 = 0x8020;

/// Command characteristic: receives start/stop, indicates command acknowledgements.
pub const COMMAND_CHAR_UUID16: u16 = 0x8022;

// ============================================================================
// Frame Geometry
// ============================================================================

/// Every command and acknowledgement frame is exactly this long.
pub const FRAME_LEN: usize = 20;

/// Number of leading bytes covered by the trailing checksum.
pub const FRAME_CRC_SPAN: usize = 18;

/// Payload bytes per sector.
pub const SECTOR_SIZE: usize = 4096;

/// Trailing checksum appended to each sector.
pub const SECTOR_CRC_LEN: usize = 2;

/// Encoded size of a full sector (payload plus checksum).
pub const FULL_SECTOR_LEN: usize = SECTOR_SIZE + SECTOR_CRC_LEN;

/// Per-chunk header: 2 bytes sector tag + 1 byte sequence.
pub const CHUNK_HEADER_LEN: usize = 3;

/// Bytes the transport itself reserves out of each unit (ATT opcode + handle).
pub const TRANSPORT_OVERHEAD: usize = 3;

/// Upper bound on a single attribute write.
pub const MAX_ATTRIBUTE_LEN: usize = 512;

/// Sector tag meaning "final/undersized sector".
pub const SECTOR_TAG_LAST: u16 = 0xFFFF;

/// Sequence number marking the last chunk of a sector.
pub const SEQUENCE_LAST: u8 = 0xFF;

/// Chunks one sector may be split into. Sequences 0..=254 plus the final
/// 0xFF marker; any more and a running sequence would collide with it.
pub const MAX_CHUNKS_PER_SECTOR: usize = 256;

// ============================================================================
// Command Codes (Host -> Device, echoed in acknowledgements)
// ============================================================================

pub const CMD_START: u16 = 0x0001;
pub const CMD_STOP: u16 = 0x0002;
pub const CMD_ACK: u16 = 0x0003;

// ============================================================================
// Command Acknowledgement Responses
// ============================================================================

pub const ACK_ACCEPTED: u16 = 0x0000;
pub const ACK_REJECTED: u16 = 0x0001;

// ============================================================================
// Sector Acknowledgement Statuses
// ============================================================================

pub const FW_ACK_SUCCESS: u16 = 0x0000;
pub const FW_ACK_CRC_ERROR: u16 = 0x0001;
pub const FW_ACK_SECTOR_ERROR: u16 = 0x0002;
pub const FW_ACK_LEN_ERROR: u16 = 0x0003;

/// Substituted for the response/status field when a notification fails its
/// own checksum. Shared by both channels.
pub const RSP_CRC_ERROR: u16 = 0xFFFF;
