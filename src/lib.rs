//! hidbridge - event-driven HID report bridge.
//!
//! Turns asynchronously produced input events into protocol-correct HID
//! reports, tracks per-connection protocol state (boot/report mode, LED and
//! feature reports) and coordinates delivery with the transport power state.
//!
//! Everything outside the `embedded` feature is pure logic that builds and
//! runs its unit tests on the host:
//!
//! ```text
//! cargo test --lib
//! ```
//!
//! The firmware binaries (`usb-hid`, `usb-shell`, `ble-keyboard`) need the `embedded`
//! feature and an nRF52840 target.

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible in every module.
#[macro_use]
mod fmt;

pub mod config;
pub mod control;
pub mod error;
pub mod hid;
pub mod input;
pub mod pairing;
pub mod power;
pub mod power_logic;
pub mod shell;
pub mod transport;

#[cfg(feature = "embedded")]
pub mod ble;
#[cfg(feature = "embedded")]
pub mod board;
#[cfg(feature = "embedded")]
pub mod usb;

#[cfg(test)]
mod testutil;

pub use control::{run_control_loop, ControlLoop};
pub use error::{Error, Result};
pub use hid::{HidApplication, ProtocolMode, ReportSelector, ReportType};
pub use input::{EventChannel, InputCode, InputEvent};
pub use transport::{PowerState, Transport};
