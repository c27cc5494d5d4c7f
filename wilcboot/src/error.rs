//! Error types for wilcboot.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for wilcboot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for wilcboot operations.
///
/// Every variant raised inside a bring-up session is fatal to that session;
/// none of them are retried by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No command buffer could be obtained, the command could not be
    /// handed to the transport, or the serial line is not open.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The requested baud rate cannot be produced from the line's base clock.
    #[error("Baud rate {target} is not achievable with base clock {base_clock}")]
    RateUnachievable {
        /// Requested rate.
        target: u32,
        /// Base clock of the serial line.
        base_clock: u32,
    },

    /// The firmware image could not be opened or sized.
    #[error("Firmware image {} is unavailable: {source}", path.display())]
    FileUnavailable {
        /// Path of the image.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The firmware image has no content.
    #[error("Firmware image {} is empty", .0.display())]
    EmptyImage(PathBuf),

    /// The number of bytes sent differs from the declared image size.
    #[error("Transferred {transferred} bytes but the image declares {expected}")]
    TransferSizeMismatch {
        /// Bytes actually transferred.
        transferred: u64,
        /// Declared image size.
        expected: u64,
    },

    /// The controller completed a command with a nonzero status.
    #[error("Command {opcode:#06x} completed with status {status:#04x}")]
    CompletionStatus {
        /// Opcode of the failed command.
        opcode: u16,
        /// Status byte reported by the controller.
        status: u8,
    },

    /// Malformed or unexpected data from the controller.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The chip could not be woken for the download.
    #[error("Chip wake-up failed: {0}")]
    WakeFailed(String),

    /// A bring-up session is already running.
    #[error("A bring-up session is already in progress")]
    SessionActive,

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
