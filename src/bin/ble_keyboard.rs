//! BLE keyboard demo for the nRF52840-DK (SoftDevice S140).
//!
//! Advertises a HID-over-GATT keyboard. Pairing uses passkey entry: the
//! passkey shown by the host is typed on the VCOM console as
//! `passkey 123456`. `battery 80` updates the Battery service. LED 2 is
//! lit while advertising.

#![no_std]
#![no_main]

use core::cell::RefCell;
use core::mem;

use defmt::info;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf::gpio::{Input, Level, Output, OutputDrive, Pull};
use embassy_nrf::interrupt::{self, InterruptExt, Priority};
use embassy_nrf::peripherals::UARTE0;
use embassy_nrf::uarte::{self, Uarte, UarteRx};
use embassy_nrf::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use nrf_softdevice::{raw, Softdevice};
use panic_probe as _;
use static_cell::StaticCell;

use hidbridge::ble::{self, BleBridge, BleLink, KeyboardServer, PasskeySecurity};
use hidbridge::board::{button_task, BoardLeds};
use hidbridge::config::{BridgeConfig, BLE_ATT_MTU, BLE_DEVICE_NAME, EVENT_QUEUE_DEPTH};
use hidbridge::hid::keyboard::{KeyboardApp, DEFAULT_KEYMAP};
use hidbridge::input::codes;
use hidbridge::{run_control_loop, ControlLoop, EventChannel, InputCode};

bind_interrupts!(struct Irqs {
    UARTE0_UART0 => uarte::InterruptHandler<peripherals::UARTE0>;
});

type Led = BoardLeds<Output<'static>, 1>;
type App = KeyboardApp<Led>;

static EVENTS: EventChannel<CriticalSectionRawMutex, EVENT_QUEUE_DEPTH> = EventChannel::new();
static BRIDGE: StaticCell<BleBridge<App>> = StaticCell::new();
static SERVER: StaticCell<KeyboardServer> = StaticCell::new();
static SECURITY: StaticCell<PasskeySecurity> = StaticCell::new();

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn peripheral_task(
    sd: &'static Softdevice,
    server: &'static KeyboardServer,
    security: &'static PasskeySecurity,
    bridge: &'static BleBridge<App>,
    adv_led: Led,
) -> ! {
    ble::run_peripheral(sd, server, security, bridge, adv_led).await
}

#[embassy_executor::task]
async fn console_task(
    rx: UarteRx<'static, UARTE0>,
    sd: &'static Softdevice,
    server: &'static KeyboardServer,
    security: &'static PasskeySecurity,
    bridge: &'static BleBridge<App>,
) -> ! {
    ble::console::operator_console(rx, sd, server, security, bridge).await
}

#[embassy_executor::task(pool_size = 4)]
async fn button(pin: Input<'static>, code: InputCode) -> ! {
    button_task(pin, code, &EVENTS).await
}

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t {
            att_mtu: BLE_ATT_MTU,
        }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 0,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: BLE_DEVICE_NAME.as_ptr() as _,
            current_len: BLE_DEVICE_NAME.len() as u16,
            max_len: BLE_DEVICE_NAME.len() as u16,
            write_perm: unsafe { mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // The SoftDevice reserves priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);
    interrupt::UARTE0_UART0.set_priority(Priority::P2);

    info!("hidbridge ble-keyboard starting");

    let sd = Softdevice::enable(&softdevice_config());
    let server: &'static KeyboardServer = match KeyboardServer::new(sd) {
        Ok(server) => SERVER.init(server),
        Err(e) => defmt::panic!("GATT registration failed: {}", e),
    };
    let sd: &'static Softdevice = sd;
    spawner.must_spawn(softdevice_task(sd));

    // LED 1 mirrors Caps Lock, LED 2 is lit while advertising.
    let leds = BoardLeds::new(
        [Output::new(p.P0_13, Level::High, OutputDrive::Standard)],
        true,
    );
    let adv_led = BoardLeds::new(
        [Output::new(p.P0_14, Level::High, OutputDrive::Standard)],
        true,
    );
    let bridge: &'static BleBridge<App> = BRIDGE.init(Mutex::new(RefCell::new(ControlLoop::new(
        KeyboardApp::new(DEFAULT_KEYMAP, leds),
        BleLink::new(server.input_handles()),
        BridgeConfig::default(),
    ))));
    let security: &'static PasskeySecurity = SECURITY.init(PasskeySecurity::new());

    let mut uart_config = uarte::Config::default();
    uart_config.baudrate = uarte::Baudrate::BAUD115200;
    let uart = Uarte::new(p.UARTE0, Irqs, p.P0_08, p.P0_06, uart_config);
    let (_tx, rx) = uart.split();

    spawner.must_spawn(peripheral_task(sd, server, security, bridge, adv_led));
    spawner.must_spawn(console_task(rx, sd, server, security, bridge));

    spawner.must_spawn(button(Input::new(p.P0_11, Pull::Up), codes::KEY_0));
    spawner.must_spawn(button(Input::new(p.P0_12, Pull::Up), codes::KEY_1));
    spawner.must_spawn(button(Input::new(p.P0_24, Pull::Up), codes::KEY_2));
    spawner.must_spawn(button(Input::new(p.P0_25, Pull::Up), codes::KEY_3));

    info!("all tasks spawned");

    run_control_loop(bridge, &EVENTS).await
}
