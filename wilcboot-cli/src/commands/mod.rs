//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod baud;
pub(crate) mod bringup;
pub(crate) mod completions;
pub(crate) mod ports;
