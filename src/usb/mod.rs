//! USB Device subsystem - presents one HID application to the host.
//!
//! The nRF52840's built-in USB 2.0 Full-Speed controller is driven by
//! `embassy-usb`. The HID demo exposes a single boot-subclass HID
//! interface whose report descriptor comes from the selected application
//! (keyboard or mouse); the shell demo exposes a CDC-ACM console instead.
//!
//! Bus events (reset, configure, suspend) are turned into [`PowerState`]
//! transitions and connection start/stop calls on the shared
//! [`ControlLoop`]; HID class requests (SET_PROTOCOL, SET_REPORT,
//! GET_REPORT, ...) are routed into it as well. Reports leave through a
//! small queue drained by the writer task.
//!
//! [`PowerState`]: crate::transport::PowerState
//! [`ControlLoop`]: crate::control::ControlLoop

pub mod console;
pub mod hid_device;

use embassy_nrf::usb::vbus_detect::HardwareVbusDetect;
use embassy_nrf::usb::Driver;
use embassy_nrf::{bind_interrupts, peripherals};
use embassy_usb::{Builder, Config};
use static_cell::StaticCell;

use crate::config;
use crate::transport::PowerCell;

pub use console::{init_shell, run_shell, ShellPowerHandler, UsbShell};
pub use hid_device::{
    hid_reader_task, hid_writer_task, init, run_usb_device, BootInterface, Bridge, HidIn, HidOut,
    UsbHidDevice, UsbHidInterface, UsbLink,
};

bind_interrupts!(struct Irqs {
    USBD => embassy_nrf::usb::InterruptHandler<peripherals::USBD>;
    CLOCK_POWER => embassy_nrf::usb::vbus_detect::InterruptHandler;
});

pub type UsbDriver = Driver<'static, peripherals::USBD, HardwareVbusDetect>;

/// Bus power state, written by the active bus handler.
pub(crate) static POWER: PowerCell = PowerCell::new();

static USB_CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_MSOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_CTRL_BUF: StaticCell<[u8; 128]> = StaticCell::new();

/// Device descriptor settings shared by the USB demos.
pub(crate) fn device_config(product: &'static str, serial: &'static str) -> Config<'static> {
    let mut usb_config = Config::new(config::USB_VID, config::USB_PID);
    usb_config.manufacturer = Some(config::USB_MANUFACTURER);
    usb_config.product = Some(product);
    usb_config.serial_number = Some(serial);
    usb_config.max_power = config::USB_MAX_POWER_MA;
    usb_config.max_packet_size_0 = 64;
    usb_config.supports_remote_wakeup = true;
    usb_config
}

/// Create the driver and a builder over the static descriptor buffers.
///
/// Must be called exactly once.
pub(crate) fn builder(
    usbd: peripherals::USBD,
    usb_config: Config<'static>,
) -> Builder<'static, UsbDriver> {
    let driver = Driver::new(usbd, Irqs, HardwareVbusDetect::new(Irqs));

    Builder::new(
        driver,
        usb_config,
        USB_CONFIG_DESC.init([0u8; 256]),
        USB_BOS_DESC.init([0u8; 256]),
        USB_MSOS_DESC.init([0u8; 256]),
        USB_CTRL_BUF.init([0u8; 128]),
    )
}
