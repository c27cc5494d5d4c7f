//! Host-side collaborators of the bring-up engine.
//!
//! The engine owns one [`Platform`] value and reaches the outside world
//! only through it:
//!
//! - [`Transport`]: command buffers and dispatch; exactly one completion
//!   per transmitted command comes back through
//!   [`BringUp::on_command_complete`](crate::target::wilc3000::BringUp::on_command_complete)
//! - [`SerialControl`]: line rate, flow control and raw writes
//! - [`LifecycleNotifier`]: keeps the chip awake during the download
//! - [`ResultSink`]: the terminal outcome and download progress
//!
//! [`uart::UartHost`] implements all of them on top of a [`Port`](crate::port::Port).

pub mod uart;

use {
    crate::{error::Result, port::baud::BaudPlan, protocol::CommandBuffer},
    std::{fmt, time::Duration},
};

/// Command buffer allocation and dispatch.
pub trait Transport {
    /// Obtain a buffer able to hold `size` encoded bytes.
    fn allocate(&mut self, size: usize) -> Option<CommandBuffer>;

    /// Give back a buffer that was never transmitted.
    fn free(&mut self, buffer: CommandBuffer);

    /// Send a command. On success the transport owns the buffer and will
    /// deliver exactly one completion for `opcode`. On refusal the buffer
    /// comes back to the caller.
    fn transmit(&mut self, opcode: u16, buffer: CommandBuffer)
    -> std::result::Result<(), CommandBuffer>;
}

/// Control over the serial line the controller sits on.
pub trait SerialControl {
    /// Whether the line is open.
    fn is_line_open(&self) -> bool;

    /// Reprogram the host side of the line.
    fn set_baud(&mut self, plan: &BaudPlan, flow_control: bool) -> Result<()>;

    /// Write bytes straight to the line, bypassing the transport.
    fn write_raw(&mut self, bytes: &[u8]) -> Result<()>;

    /// Open the line.
    fn open_line(&mut self) -> Result<()>;

    /// Close the line.
    fn close_line(&mut self) -> Result<()>;
}

/// Power-management events around the download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The chip must stay awake while its firmware is downloaded.
    WakeForDownload,
    /// The chip may sleep again.
    AllowSleepAfterDownload,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WakeForDownload => write!(f, "wake for download"),
            Self::AllowSleepAfterDownload => write!(f, "allow sleep after download"),
        }
    }
}

/// Receiver of lifecycle events.
pub trait LifecycleNotifier {
    /// Deliver an event. Only the wake request is expected to fail.
    fn notify(&mut self, event: LifecycleEvent) -> Result<()>;
}

/// Terminal outcome of a bring-up session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Outcome {
    /// The controller runs its firmware at the configured rate.
    Success,
    /// The session was aborted.
    Fail,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Receiver of the session result.
pub trait ResultSink {
    /// Called exactly once per session.
    fn on_result(&mut self, outcome: Outcome);

    /// Called after each firmware chunk is handed to the transport.
    fn on_progress(&mut self, _transferred: u64, _total: u64) {}
}

/// Everything the engine needs from its host.
pub trait Platform: Transport + SerialControl + LifecycleNotifier + ResultSink {
    /// Block for a settle delay.
    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
