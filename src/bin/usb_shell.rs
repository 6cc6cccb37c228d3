//! USB serial console demo for the nRF52840-DK.
//!
//! Enumerates as a CDC-ACM port whose serial number is the chip's factory
//! device ID. Bus power changes are logged with the granted current; the
//! console answers `help`, `status` and the operator commands.

#![no_std]
#![no_main]

use defmt::info;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf::pac::FICR;
use embassy_usb::class::cdc_acm::CdcAcmClass;
use embassy_usb::UsbDevice;
use heapless::String;
use panic_probe as _;
use static_cell::StaticCell;

use hidbridge::config::serial_from_device_id;
use hidbridge::usb::{self, ShellPowerHandler, UsbDriver};

static SERIAL: StaticCell<String<16>> = StaticCell::new();
static POWER_HANDLER: StaticCell<ShellPowerHandler> = StaticCell::new();

#[embassy_executor::task]
async fn usb_device_task(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    device.run().await
}

#[embassy_executor::task]
async fn shell_task(class: CdcAcmClass<'static, UsbDriver>) -> ! {
    usb::run_shell(class).await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_nrf::init(Default::default());

    info!("hidbridge usb-shell starting");

    let device_id = [FICR.deviceid(0).read(), FICR.deviceid(1).read()];
    let serial: &'static String<16> = SERIAL.init(serial_from_device_id(device_id));

    let power = POWER_HANDLER.init(ShellPowerHandler::new());
    let shell = usb::init_shell(p.USBD, serial.as_str(), power);

    spawner.must_spawn(usb_device_task(shell.device));
    spawner.must_spawn(shell_task(shell.class));

    info!("all tasks spawned");
}
