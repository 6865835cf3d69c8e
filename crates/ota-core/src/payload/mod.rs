//! Payload handling module.
//!
//! Sector segmentation of the firmware image and chunking of sectors for
//! the transport.

pub mod chunk;
pub mod sector;

pub use chunk::{Chunk, ChunkHeader, chunk, max_chunk_payload};
pub use sector::{FirmwareImage, MAX_IMAGE_SIZE, PayloadError, Sector, segment};
