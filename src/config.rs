//! Application-wide constants and runtime tunables.
//!
//! Protocol constants and timing defaults live here so they can be tuned in
//! one place. Values that encode workarounds for specific host behaviour are
//! also exposed through [`BridgeConfig`] so they can be changed without a
//! rebuild of the core.

use core::fmt::Write;

use embassy_time::Duration;
use heapless::String;

// Input events

/// Depth of the input event queue.
///
/// Kept tiny on purpose: only the latest physical state matters, so rapid
/// duplicate edges are dropped rather than buffered.
pub const EVENT_QUEUE_DEPTH: usize = 2;

/// Control loop wait when nothing needs periodic resending (ms).
pub const IDLE_POLL_MS: u64 = 100;

/// Control loop wait while fine-grained motion is active (ms).
/// Used for high-resolution scrolling and horizontal emulation.
pub const FINE_POLL_MS: u64 = 10;

// Power / suspend

/// Default window for the spurious-reset heuristic (ms).
///
/// Some hosts reset and re-enumerate the device right after resume,
/// forgetting feature reports such as the scroll resolution multiplier.
/// A deconfigure/reconfigure pair closer together than this is treated as
/// such a reset. Empirical; not a protocol guarantee.
pub const SPURIOUS_RESET_WINDOW_MS: u64 = 20;

// Reports

/// Largest input report any application produces (bytes).
pub const MAX_INPUT_REPORT: usize = 32;

/// Largest output/feature report any application accepts (bytes).
pub const MAX_OUTPUT_REPORT: usize = 8;

/// Depth of the queue between the control loop and the USB writer task.
pub const REPORT_QUEUE_DEPTH: usize = 4;

/// Report ID of the mouse input and feature reports.
/// Linux only honours the resolution multiplier when a report ID is used.
pub const MOUSE_REPORT_ID: u8 = 1;

/// Largest X/Y displacement per mouse report.
pub const MOUSE_AXIS_LIMIT: i16 = 127;

/// Largest wheel displacement per mouse report.
pub const MOUSE_WHEEL_LIMIT: i16 = 32767;

/// Wheel resolution multiplier advertised for high-resolution scrolling.
pub const MAX_SCROLL_RESOLUTION: u8 = 120;

// Pairing

/// Maximum simultaneous passkey requests (one per connection).
pub const MAX_PAIRING_REQUESTS: usize = 2;

/// Largest passkey accepted from the operator (six decimal digits).
pub const MAX_PASSKEY: u32 = 999_999;

// USB

/// USB VID/PID - use the "pid.codes" open-source test VID.
/// Replace with your own allocated VID/PID for production.
pub const USB_VID: u16 = 0x1209;
pub const USB_PID: u16 = 0x0002;

/// USB device strings.
pub const USB_MANUFACTURER: &str = "hidbridge";
pub const USB_PRODUCT: &str = "hidbridge HID demo";
pub const USB_SERIAL_NUMBER: &str = "000001";

/// Requested bus current (mA).
pub const USB_MAX_POWER_MA: u16 = 500;

/// USB HID polling interval (ms).
pub const USB_HID_POLL_MS: u8 = 1;

/// Interrupt endpoint packet size for the HID interface.
pub const USB_HID_PACKET_SIZE: u16 = 64;

/// Product string of the serial console demo.
pub const USB_SHELL_PRODUCT: &str = "hidbridge shell";

/// CDC-ACM bulk packet size.
pub const USB_CDC_PACKET_SIZE: u16 = 64;

/// USB serial number derived from the factory device ID, high word first.
pub fn serial_from_device_id(id: [u32; 2]) -> String<16> {
    let mut serial = String::new();
    // 16 hex digits always fit.
    let _ = write!(serial, "{:08X}{:08X}", id[1], id[0]);
    serial
}

// BLE

/// Advertised device name.
pub const BLE_DEVICE_NAME: &str = "hidbridge kbd";

/// GAP appearance: keyboard.
pub const BLE_APPEARANCE_KEYBOARD: u16 = 0x03C1;

/// Bonds kept in RAM; the oldest is evicted first.
pub const MAX_BONDS: usize = 4;

/// ATT MTU, large enough for the NKRO keyboard report in one notification.
pub const BLE_ATT_MTU: u16 = 64;

/// Fast advertising interval (in 0.625 ms units). 160 = 100 ms.
pub const BLE_ADV_INTERVAL: u32 = 160;

// GPIO (nRF52840-DK defaults)
//
//   Button 1 → P0.11 → key 0
//   Button 2 → P0.12 → key 1
//   Button 3 → P0.24 → key 2
//   Button 4 → P0.25 → key 3
//   LED 1    → P0.13 → indicator 0
//   LED 2    → P0.14 → indicator 1

/// Button debounce time (ms).
pub const BUTTON_DEBOUNCE_MS: u64 = 20;

/// Runtime tunables for the control loop and power coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Deconfigure/reconfigure pairs within this window replay the last
    /// feature state. Heuristic for specific hosts, see
    /// [`SPURIOUS_RESET_WINDOW_MS`].
    pub recovery_window: Duration,
    /// Wait between periodic resends when motion is coarse.
    pub idle_poll: Duration,
    /// Wait between periodic resends when motion is fine-grained.
    pub fine_poll: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            recovery_window: Duration::from_millis(SPURIOUS_RESET_WINDOW_MS),
            idle_poll: Duration::from_millis(IDLE_POLL_MS),
            fine_poll: Duration::from_millis(FINE_POLL_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_is_sixteen_hex_digits() {
        let serial = serial_from_device_id([0x89AB_CDEF, 0x0123_4567]);
        assert_eq!(serial.as_str(), "0123456789ABCDEF");
        assert_eq!(serial_from_device_id([1, 0]).as_str(), "0000000000000001");
    }
}
