//! WILC3000 support.
//!
//! The controller starts in a boot ROM that accepts firmware over HCI
//! vendor commands. [`BringUp`] downloads the image, restarts the CPU into
//! it and moves the line to its operational rate.

pub mod bringup;
pub mod protocol;
pub mod session;

pub use {
    bringup::BringUp,
    session::{Session, State},
};
