//! Chip-specific bring-up logic.

pub mod chip;
pub mod wilc3000;

pub use {
    chip::{
        BringupConfig, ChipFamily, DEFAULT_BOOTROM_BAUD, DEFAULT_CHIP_NAME,
        DEFAULT_DOWNLOAD_BAUD, DEFAULT_FIRMWARE_FILE, DEFAULT_OPERATIONAL_BAUD,
    },
    wilc3000::BringUp,
};
