//! # wilcboot
//!
//! Firmware bring-up for WILC combo radio controllers attached over a serial
//! HCI link.
//!
//! After power-up the controller runs a boot ROM. This crate:
//!
//! - detects whether firmware is already resident
//! - negotiates a download rate from the controller's clock source
//! - streams the firmware image into controller memory in 4 KiB chunks
//! - restarts the controller CPU into the new firmware
//! - raises the line to its operational rate and optionally programs the
//!   device address
//!
//! ## Supported Chips
//!
//! - WILC3000 (primary support)
//! - BCM43241 and other controllers sharing the same boot ROM commands
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use wilcboot::{BringUp, BringupConfig, SerialConfig, UartHost};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let port = wilcboot::NativePort::open(&SerialConfig::new("/dev/ttyS1", 115200))?;
//!         let host = UartHost::new(port).with_progress(|done, total| {
//!             println!("Downloading: {done}/{total}");
//!         });
//!
//!         let config = BringupConfig::new("wilc3000_bt_firmware.bin")
//!             .with_operational_baud(921600)
//!             .with_flow_control(true);
//!
//!         BringUp::new(host).run(config)?;
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! Hosts with their own HCI transport implement [`host::Platform`] and feed
//! completion events into [`BringUp::on_command_complete`] themselves.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod host;
pub mod image;
pub mod port;
pub mod protocol;
pub mod target;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{Error, Result},
    host::{
        LifecycleEvent, LifecycleNotifier, Outcome, Platform, ResultSink, SerialControl,
        Transport, uart::UartHost,
    },
    image::{FirmwareChunk, FirmwareImage},
    port::{
        FlowControl, Port, PortEnumerator, PortInfo, SerialConfig,
        baud::{BaudPlan, BaudSetting, LineCaps, UartRate, match_rate},
    },
    protocol::{Command, CommandBuffer, CompletionEvent, DeviceAddress, EventKind},
    target::{
        BringUp, BringupConfig, ChipFamily,
        wilc3000::{Session, State},
    },
};
