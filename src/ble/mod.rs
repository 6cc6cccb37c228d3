//! Bluetooth Low Energy subsystem.
//!
//! Drives the Nordic SoftDevice S140 in **Peripheral** role:
//!
//! 1. **Advertising** - connectable advertising for a HID keyboard.
//! 2. **HID service** - HID-over-GATT keyboard plus Battery service
//!    ([`hid_service`]).
//! 3. **Security** - passkey-entry pairing handed to the operator through
//!    the pairing queue ([`security`]).
//! 4. **Console** - operator commands over UART ([`console`]).
//!
//! Link events are mapped onto the shared [`ControlLoop`]: connecting
//! starts the application in report mode, the HID Control Point suspends
//! and resumes it, disconnecting stops it.
//!
//! [`ControlLoop`]: crate::control::ControlLoop

pub mod console;
pub mod hid_service;
pub mod link;
pub mod security;

use embassy_time::{Duration, Instant, Timer};
use nrf_softdevice::ble::advertisement_builder::{
    AdvertisementDataType, Flag, LegacyAdvertisementBuilder, LegacyAdvertisementPayload,
    ServiceList, ServiceUuid16,
};
use nrf_softdevice::ble::{gatt_server, peripheral};
use nrf_softdevice::Softdevice;

use crate::config::{BLE_ADV_INTERVAL, BLE_APPEARANCE_KEYBOARD, BLE_DEVICE_NAME};
use crate::hid::{HidApplication, Indicators, LitIndicator, ProtocolMode};
use crate::transport::PowerState;

pub use hid_service::{KeyboardServer, ServerEvent};
pub use link::{BleBridge, BleLink, InputHandles};
pub use security::PasskeySecurity;

use link::BLE_POWER;

static ADV_DATA: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new()
    .flags(&[Flag::GeneralDiscovery, Flag::LE_Only])
    .services_16(
        ServiceList::Complete,
        &[ServiceUuid16::HUMAN_INTERFACE_DEVICE, ServiceUuid16::BATTERY],
    )
    .raw(
        AdvertisementDataType::APPEARANCE,
        &BLE_APPEARANCE_KEYBOARD.to_le_bytes(),
    )
    .build();

static SCAN_DATA: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new()
    .full_name(BLE_DEVICE_NAME)
    .build();

fn set_power<A: HidApplication>(bridge: &BleBridge<A>, state: PowerState) {
    BLE_POWER.store(state);
    let now = Instant::now();
    bridge.lock(|c| c.borrow_mut().on_power(state, now));
}

fn on_server_event<A: HidApplication>(bridge: &BleBridge<A>, event: ServerEvent) {
    match event {
        ServerEvent::ProtocolMode(mode) => {
            info!("BLE protocol mode: {}", mode);
            bridge.lock(|c| {
                let mut c = c.borrow_mut();
                c.transport_mut().set_protocol(mode);
                c.start(mode);
            });
        }
        ServerEvent::Suspend(true) => set_power(bridge, PowerState::Suspended),
        ServerEvent::Suspend(false) => set_power(bridge, PowerState::ConfiguredActive),
        ServerEvent::Output(ty, data) => {
            let result = bridge.lock(|c| c.borrow_mut().on_output_report(ty, &data));
            if let Err(e) = result {
                warn!("output report rejected: {}", e);
            }
        }
        ServerEvent::InputNotifications(enabled) => {
            info!("input notifications enabled: {}", enabled);
        }
    }
}

/// Index of the advertising LED within the `adv_led` indicators.
pub const ADV_INDICATOR: u8 = 0;

/// Advertise, serve one connection until it drops, repeat.
///
/// `adv_led` is lit while advertising.
pub async fn run_peripheral<A: HidApplication, L: Indicators>(
    sd: &'static Softdevice,
    server: &'static KeyboardServer,
    security: &'static PasskeySecurity,
    bridge: &'static BleBridge<A>,
    mut adv_led: L,
) -> ! {
    let config = peripheral::Config {
        interval: BLE_ADV_INTERVAL,
        ..Default::default()
    };

    loop {
        let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
            adv_data: &ADV_DATA,
            scan_data: &SCAN_DATA,
        };
        info!("BLE advertising as {}", BLE_DEVICE_NAME);
        let advertised = {
            let _lit = LitIndicator::new(&mut adv_led, ADV_INDICATOR);
            peripheral::advertise_pairable(sd, adv, &config, security).await
        };
        let conn = match advertised {
            Ok(conn) => conn,
            Err(e) => {
                warn!("advertising failed: {}", e);
                Timer::after(Duration::from_secs(1)).await;
                continue;
            }
        };
        let Some(handle) = conn.handle() else {
            continue;
        };
        info!("BLE connected, conn {}", handle);

        BLE_POWER.store(PowerState::ConfiguredActive);
        let now = Instant::now();
        bridge.lock(|c| {
            let mut c = c.borrow_mut();
            c.transport_mut().attach(conn.clone());
            c.on_power(PowerState::ConfiguredActive, now);
            c.start(ProtocolMode::Report);
        });

        let _ = gatt_server::run(&conn, server, |event| on_server_event(bridge, event)).await;
        info!("BLE disconnected, conn {}", handle);

        BLE_POWER.store(PowerState::Unconfigured);
        let now = Instant::now();
        bridge.lock(|c| {
            let mut c = c.borrow_mut();
            c.on_power(PowerState::Unconfigured, now);
            c.stop();
            c.transport_mut().detach();
        });
        security.on_disconnected(handle);
    }
}
