//! Wired HID demo for the nRF52840-DK.
//!
//! Builds a USB keyboard by default, or the high-resolution mouse with the
//! `demo-mouse` feature. Board buttons 1-4 post key 0-3 events; LED 1
//! mirrors Caps Lock (keyboard) or high-resolution scrolling (mouse).

#![no_std]
#![no_main]

use core::cell::RefCell;

use defmt::info;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf::gpio::{Input, Level, Output, OutputDrive, Pull};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_usb::UsbDevice;
use panic_probe as _;
use static_cell::StaticCell;

use hidbridge::board::{button_task, BoardLeds};
use hidbridge::config::{BridgeConfig, EVENT_QUEUE_DEPTH};
use hidbridge::input::codes;
use hidbridge::usb::{
    self, BootInterface, Bridge, HidIn, HidOut, UsbDriver, UsbHidInterface, UsbLink,
};
use hidbridge::{run_control_loop, ControlLoop, EventChannel, InputCode};

type Leds = BoardLeds<Output<'static>, 2>;

#[cfg(not(feature = "demo-mouse"))]
type App = hidbridge::hid::keyboard::KeyboardApp<Leds>;
#[cfg(feature = "demo-mouse")]
type App = hidbridge::hid::mouse::MouseApp<Leds>;

#[cfg(not(feature = "demo-mouse"))]
const REPORT_DESCRIPTOR: &[u8] = hidbridge::hid::keyboard::KEYBOARD_REPORT_DESCRIPTOR;
#[cfg(feature = "demo-mouse")]
const REPORT_DESCRIPTOR: &[u8] = hidbridge::hid::mouse::MOUSE_REPORT_DESCRIPTOR;

#[cfg(not(feature = "demo-mouse"))]
const BOOT_INTERFACE: BootInterface = BootInterface::Keyboard;
#[cfg(feature = "demo-mouse")]
const BOOT_INTERFACE: BootInterface = BootInterface::Mouse;

#[cfg(not(feature = "demo-mouse"))]
fn make_app(leds: Leds) -> App {
    App::new(hidbridge::hid::keyboard::DEFAULT_KEYMAP, leds)
}

#[cfg(feature = "demo-mouse")]
fn make_app(leds: Leds) -> App {
    App::new(leds)
}

static EVENTS: EventChannel<CriticalSectionRawMutex, EVENT_QUEUE_DEPTH> = EventChannel::new();
static BRIDGE: StaticCell<Bridge<App>> = StaticCell::new();
static INTERFACE: StaticCell<UsbHidInterface<App>> = StaticCell::new();

#[embassy_executor::task]
async fn usb_device_task(device: UsbDevice<'static, UsbDriver>) -> ! {
    usb::run_usb_device(device).await
}

#[embassy_executor::task]
async fn hid_writer_task(ep_in: HidIn) -> ! {
    usb::hid_writer_task(ep_in).await
}

#[embassy_executor::task]
async fn hid_reader_task(ep_out: HidOut, bridge: &'static Bridge<App>) -> ! {
    usb::hid_reader_task(ep_out, bridge).await
}

#[embassy_executor::task(pool_size = 4)]
async fn button(pin: Input<'static>, code: InputCode) -> ! {
    button_task(pin, code, &EVENTS).await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_nrf::init(Default::default());

    info!("hidbridge usb-hid starting");

    let leds = BoardLeds::new(
        [
            Output::new(p.P0_13, Level::High, OutputDrive::Standard),
            Output::new(p.P0_14, Level::High, OutputDrive::Standard),
        ],
        true,
    );

    let bridge: &'static Bridge<App> = BRIDGE.init(Mutex::new(RefCell::new(ControlLoop::new(
        make_app(leds),
        UsbLink::new(),
        BridgeConfig::default(),
    ))));
    let interface = INTERFACE.init(UsbHidInterface::new(bridge, REPORT_DESCRIPTOR));

    let hid = usb::init(p.USBD, BOOT_INTERFACE, interface);

    spawner.must_spawn(usb_device_task(hid.device));
    spawner.must_spawn(hid_writer_task(hid.ep_in));
    spawner.must_spawn(hid_reader_task(hid.ep_out, bridge));

    spawner.must_spawn(button(Input::new(p.P0_11, Pull::Up), codes::KEY_0));
    spawner.must_spawn(button(Input::new(p.P0_12, Pull::Up), codes::KEY_1));
    spawner.must_spawn(button(Input::new(p.P0_24, Pull::Up), codes::KEY_2));
    spawner.must_spawn(button(Input::new(p.P0_25, Pull::Up), codes::KEY_3));

    info!("all tasks spawned");

    run_control_loop(bridge, &EVENTS).await
}
