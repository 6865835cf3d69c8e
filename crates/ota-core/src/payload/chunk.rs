//! Splitting sectors into transport-sized chunks.
//!
//! Chunk wire format:
//!
//! ```text
//! [0..2] sector tag (index or 0xFFFF), little-endian
//! [2]    sequence number, 0xFF on the last chunk of the sector
//! [3..]  payload
//! ```

use byteorder::{ByteOrder, LittleEndian};

use super::sector::PayloadError;
use crate::protocol::constants::{
    CHUNK_HEADER_LEN, FULL_SECTOR_LEN, MAX_ATTRIBUTE_LEN, MAX_CHUNKS_PER_SECTOR, SEQUENCE_LAST,
    TRANSPORT_OVERHEAD,
};

/// Largest chunk payload that fits a transport unit of `unit_size` bytes.
///
/// `min(512, unit_size - 3) - 3`. A full sector must also fit in
/// [`MAX_CHUNKS_PER_SECTOR`] chunks, which puts the floor at 17 bytes
/// (unit size 23).
pub fn max_chunk_payload(unit_size: usize) -> Result<usize, PayloadError> {
    unit_size
        .checked_sub(TRANSPORT_OVERHEAD)
        .map(|usable| usable.min(MAX_ATTRIBUTE_LEN))
        .and_then(|usable| usable.checked_sub(CHUNK_HEADER_LEN))
        .filter(|&payload| payload >= 1 && FULL_SECTOR_LEN.div_ceil(payload) <= MAX_CHUNKS_PER_SECTOR)
        .ok_or(PayloadError::UnitSizeTooSmall { unit_size })
}

/// One firmware write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub sector_tag: u16,
    pub sequence: u8,
    pub payload: &'a [u8],
}

impl Chunk<'_> {
    pub fn is_last(&self) -> bool {
        self.sequence == SEQUENCE_LAST
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; CHUNK_HEADER_LEN + self.payload.len()];
        LittleEndian::write_u16(&mut buf[0..2], self.sector_tag);
        buf[2] = self.sequence;
        buf[CHUNK_HEADER_LEN..].copy_from_slice(self.payload);
        buf
    }
}

/// Parsed view of a chunk write, as seen by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub sector_tag: u16,
    pub sequence: u8,
}

impl ChunkHeader {
    pub fn parse(data: &[u8]) -> Option<(Self, &[u8])> {
        if data.len() < CHUNK_HEADER_LEN {
            return None;
        }
        let header = Self {
            sector_tag: LittleEndian::read_u16(&data[0..2]),
            sequence: data[2],
        };
        Some((header, &data[CHUNK_HEADER_LEN..]))
    }
}

/// Split `sector` into chunks of at most `max_payload` bytes.
///
/// Sequence numbers count up from 0; the final chunk is always marked 0xFF,
/// even when it also is the first. `max_payload` comes from
/// [`max_chunk_payload`], so no earlier chunk reaches 0xFF.
pub fn chunk(sector: &[u8], sector_tag: u16, max_payload: usize) -> Vec<Chunk<'_>> {
    debug_assert!(max_payload >= 1);
    let mut chunks: Vec<Chunk<'_>> = sector
        .chunks(max_payload)
        .enumerate()
        .map(|(seq, payload)| Chunk {
            sector_tag,
            sequence: seq as u8,
            payload,
        })
        .collect();
    if let Some(last) = chunks.last_mut() {
        last.sequence = SEQUENCE_LAST;
    }
    chunks
}
