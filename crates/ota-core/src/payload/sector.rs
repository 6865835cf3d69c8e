//! Firmware image loading and sector segmentation.
//!
//! The image is cut into 4096-byte sectors; each sector carries a CRC-16 of
//! its payload as a 2-byte little-endian trailer. Segmentation is independent
//! of the transport's unit size.

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use tracing::debug;

use crate::protocol::constants::{FULL_SECTOR_LEN, SECTOR_CRC_LEN, SECTOR_SIZE, SECTOR_TAG_LAST};
use crate::protocol::crc::crc16;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Firmware image is empty")]
    EmptyImage,
    #[error("Firmware image too large: {size} bytes (limit {limit})")]
    ImageTooLarge { size: usize, limit: usize },
    #[error("Unit size {unit_size} is too small to carry a sector in 256 chunks")]
    UnitSizeTooSmall { unit_size: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Largest image the protocol can describe: the start command carries a u32
/// size and sector indices stop short of the 0xFFFF sentinel.
pub const MAX_IMAGE_SIZE: usize = {
    let by_index = SECTOR_TAG_LAST as usize * SECTOR_SIZE;
    if by_index < u32::MAX as usize {
        by_index
    } else {
        u32::MAX as usize
    }
};

/// Firmware image read once at session start.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, PayloadError> {
        if data.is_empty() {
            return Err(PayloadError::EmptyImage);
        }
        if data.len() > MAX_IMAGE_SIZE {
            return Err(PayloadError::ImageTooLarge {
                size: data.len(),
                limit: MAX_IMAGE_SIZE,
            });
        }
        Ok(Self { data })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PayloadError> {
        Self::from_bytes(std::fs::read(path)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size as announced in the start command.
    pub fn size_u32(&self) -> u32 {
        // Bounded by MAX_IMAGE_SIZE at construction.
        self.data.len() as u32
    }

    pub fn sectors(&self) -> Vec<Sector> {
        segment(&self.data)
    }
}

/// One sector: payload followed by its checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sector {
    index: u16,
    bytes: Vec<u8>,
}

impl Sector {
    fn new(index: u16, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(payload.len() + SECTOR_CRC_LEN);
        bytes.extend_from_slice(payload);
        let mut trailer = [0u8; SECTOR_CRC_LEN];
        LittleEndian::write_u16(&mut trailer, crc16(payload));
        bytes.extend_from_slice(&trailer);
        Self { index, bytes }
    }

    /// Position in the sector sequence.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Encoded bytes (payload + trailer) as sent on the wire.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - SECTOR_CRC_LEN]
    }

    pub fn checksum(&self) -> u16 {
        LittleEndian::read_u16(&self.bytes[self.bytes.len() - SECTOR_CRC_LEN..])
    }

    /// Tag written in front of every chunk of this sector.
    ///
    /// Any sector shorter than a full 4098-byte encoding is tagged 0xFFFF,
    /// whatever its position. The receiver treats that tag as "final sector".
    pub fn wire_tag(&self) -> u16 {
        if self.bytes.len() < FULL_SECTOR_LEN {
            SECTOR_TAG_LAST
        } else {
            self.index
        }
    }
}

/// Cut `image` into sectors of at most 4096 payload bytes.
///
/// Callers reject empty and oversized images first (see [`FirmwareImage`]).
pub fn segment(image: &[u8]) -> Vec<Sector> {
    let sectors: Vec<Sector> = image
        .chunks(SECTOR_SIZE)
        .enumerate()
        .map(|(i, window)| Sector::new(i as u16, window))
        .collect();
    debug!(
        image_len = image.len(),
        sectors = sectors.len(),
        "Segmented image"
    );
    sectors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_sector_count() {
        for (size, expected) in [(1, 1), (4096, 1), (4097, 2), (8192, 2), (12289, 4)] {
            assert_eq!(segment(&pattern(size)).len(), expected, "size {}", size);
        }
    }

    #[test]
    fn test_reassembly() {
        let image = pattern(3 * 4096 + 123);
        let sectors = segment(&image);

        let rebuilt: Vec<u8> = sectors
            .iter()
            .flat_map(|s| s.payload().iter().copied())
            .collect();
        assert_eq!(rebuilt, image);

        for s in &sectors[..sectors.len() - 1] {
            assert_eq!(s.payload().len(), SECTOR_SIZE);
            assert_eq!(s.bytes().len(), FULL_SECTOR_LEN);
        }
        assert_eq!(sectors.last().unwrap().payload().len(), 123);
    }

    #[test]
    fn test_trailer_checksum() {
        let image = pattern(5000);
        for s in segment(&image) {
            assert_eq!(s.checksum(), crc16(s.payload()));
        }
    }

    #[test]
    fn test_undersized_final_sector_uses_sentinel() {
        let sectors = segment(&pattern(5000));
        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors[0].payload().len(), 4096);
        assert_eq!(sectors[1].payload().len(), 904);
        assert_eq!(sectors[0].wire_tag(), 0);
        assert_eq!(sectors[1].wire_tag(), SECTOR_TAG_LAST);
    }

    #[test]
    fn test_full_final_sector_keeps_index() {
        let sectors = segment(&pattern(2 * 4096));
        assert_eq!(sectors[1].wire_tag(), 1);
    }

    #[test]
    fn test_empty_image_rejected() {
        assert!(matches!(
            FirmwareImage::from_bytes(Vec::new()),
            Err(PayloadError::EmptyImage)
        ));
    }

    #[test]
    fn test_image_size() {
        let image = FirmwareImage::from_bytes(pattern(5000)).unwrap();
        assert_eq!(image.size_u32(), 5000);
        assert_eq!(image.sectors().len(), 2);
    }
}
