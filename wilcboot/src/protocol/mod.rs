//! Protocol implementations.

pub mod hci;

// Re-export common types
pub use hci::{Command, CommandBuffer, CompletionEvent, DeviceAddress, EventKind};
