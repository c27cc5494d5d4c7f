//! Firmware image handling.

pub mod firmware;

pub use firmware::{CHUNK_SIZE, DEFAULT_LOAD_ADDRESS, FirmwareChunk, FirmwareImage};
