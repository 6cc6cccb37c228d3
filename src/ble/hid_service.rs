//! HID-over-GATT keyboard service and Battery service.
//!
//! Characteristics follow the HOGP layout: HID Information, Report Map,
//! HID Control Point, Protocol Mode, one input and one output Report (each
//! with a Report Reference descriptor) and the boot keyboard pair.

use heapless::Vec;
use nrf_softdevice::ble::gatt_server::builder::ServiceBuilder;
use nrf_softdevice::ble::gatt_server::characteristic::{Attribute, Metadata, Properties};
use nrf_softdevice::ble::gatt_server::{self, RegisterError, Server, WriteOp};
use nrf_softdevice::ble::{Connection, SecurityMode, Uuid};
use nrf_softdevice::Softdevice;

use crate::config::MAX_OUTPUT_REPORT;
use crate::hid::keyboard::{
    KEYBOARD_BOOT_REPORT_SIZE, KEYBOARD_REPORT_DESCRIPTOR, KEYBOARD_REPORT_SIZE, LED_REPORT_SIZE,
};
use crate::hid::{ProtocolMode, ReportType};

use super::link::InputHandles;

const HID_SERVICE: Uuid = Uuid::new_16(0x1812);
const BATTERY_SERVICE: Uuid = Uuid::new_16(0x180F);

const HID_INFORMATION: Uuid = Uuid::new_16(0x2A4A);
const REPORT_MAP: Uuid = Uuid::new_16(0x2A4B);
const HID_CONTROL_POINT: Uuid = Uuid::new_16(0x2A4C);
const REPORT: Uuid = Uuid::new_16(0x2A4D);
const PROTOCOL_MODE: Uuid = Uuid::new_16(0x2A4E);
const BOOT_KEYBOARD_INPUT: Uuid = Uuid::new_16(0x2A22);
const BOOT_KEYBOARD_OUTPUT: Uuid = Uuid::new_16(0x2A32);
const BATTERY_LEVEL: Uuid = Uuid::new_16(0x2A19);
const REPORT_REFERENCE: Uuid = Uuid::new_16(0x2908);

// bcdHID 1.11, country 0, normally connectable.
const HID_INFO: [u8; 4] = [0x11, 0x01, 0x00, 0x02];

// Report Reference types.
const REFERENCE_INPUT: u8 = 1;
const REFERENCE_OUTPUT: u8 = 2;

/// Host-side writes the control task must act on.
pub enum ServerEvent {
    ProtocolMode(ProtocolMode),
    /// HID Control Point: `true` for suspend, `false` for exit suspend.
    Suspend(bool),
    Output(ReportType, Vec<u8, MAX_OUTPUT_REPORT>),
    InputNotifications(bool),
}

pub struct KeyboardServer {
    protocol_mode: u16,
    control_point: u16,
    input: u16,
    input_cccd: u16,
    output: u16,
    boot_input: u16,
    boot_output: u16,
    battery_level: u16,
}

impl KeyboardServer {
    /// Register both services. Must run before the SoftDevice is shared.
    pub fn new(sd: &mut Softdevice) -> Result<Self, RegisterError> {
        let secure = SecurityMode::Mitm;
        let mut hid = ServiceBuilder::new(sd, HID_SERVICE)?;

        hid.add_characteristic(
            HID_INFORMATION,
            Attribute::new(HID_INFO).security(secure),
            Metadata::new(Properties::new().read()),
        )?
        .build();

        hid.add_characteristic(
            REPORT_MAP,
            Attribute::new(KEYBOARD_REPORT_DESCRIPTOR).security(secure),
            Metadata::new(Properties::new().read()),
        )?
        .build();

        let control_point = hid
            .add_characteristic(
                HID_CONTROL_POINT,
                Attribute::new([0u8]).security(secure),
                Metadata::new(Properties::new().write_without_response()),
            )?
            .build();

        let protocol_mode = hid
            .add_characteristic(
                PROTOCOL_MODE,
                Attribute::new([1u8]).security(secure),
                Metadata::new(Properties::new().read().write_without_response()),
            )?
            .build();

        let mut input = hid.add_characteristic(
            REPORT,
            Attribute::new([0u8; KEYBOARD_REPORT_SIZE]).security(secure),
            Metadata::new(Properties::new().read().notify()),
        )?;
        input.add_descriptor(
            REPORT_REFERENCE,
            Attribute::new([0u8, REFERENCE_INPUT]).security(secure),
        )?;
        let input = input.build();

        let mut output = hid.add_characteristic(
            REPORT,
            Attribute::new([0u8; LED_REPORT_SIZE]).security(secure),
            Metadata::new(
                Properties::new()
                    .read()
                    .write()
                    .write_without_response(),
            ),
        )?;
        output.add_descriptor(
            REPORT_REFERENCE,
            Attribute::new([0u8, REFERENCE_OUTPUT]).security(secure),
        )?;
        let output = output.build();

        let boot_input = hid
            .add_characteristic(
                BOOT_KEYBOARD_INPUT,
                Attribute::new([0u8; KEYBOARD_BOOT_REPORT_SIZE]).security(secure),
                Metadata::new(Properties::new().read().notify()),
            )?
            .build();

        let boot_output = hid
            .add_characteristic(
                BOOT_KEYBOARD_OUTPUT,
                Attribute::new([0u8; LED_REPORT_SIZE]).security(secure),
                Metadata::new(
                    Properties::new()
                        .read()
                        .write()
                        .write_without_response(),
                ),
            )?
            .build();
        hid.build();

        let mut battery = ServiceBuilder::new(sd, BATTERY_SERVICE)?;
        let battery_level = battery
            .add_characteristic(
                BATTERY_LEVEL,
                Attribute::new([100u8]),
                Metadata::new(Properties::new().read().notify()),
            )?
            .build();
        battery.build();

        Ok(Self {
            protocol_mode: protocol_mode.value_handle,
            control_point: control_point.value_handle,
            input: input.value_handle,
            input_cccd: input.cccd_handle,
            output: output.value_handle,
            boot_input: boot_input.value_handle,
            boot_output: boot_output.value_handle,
            battery_level: battery_level.value_handle,
        })
    }

    pub fn input_handles(&self) -> InputHandles {
        InputHandles {
            report: self.input,
            boot: self.boot_input,
        }
    }

    /// Store a new battery level and notify it on `conn` if there is one.
    pub fn set_battery(&self, sd: &Softdevice, conn: Option<&Connection>, level: u8) {
        if gatt_server::set_value(sd, self.battery_level, &[level]).is_err() {
            warn!("battery level update failed");
            return;
        }
        if let Some(conn) = conn {
            // Fails harmlessly when the host has not subscribed.
            let _ = gatt_server::notify_value(conn, self.battery_level, &[level]);
        }
    }
}

impl Server for KeyboardServer {
    type Event = ServerEvent;

    fn on_write(
        &self,
        _conn: &Connection,
        handle: u16,
        _op: WriteOp,
        _offset: usize,
        data: &[u8],
    ) -> Option<ServerEvent> {
        if handle == self.protocol_mode {
            return match data.first() {
                Some(0) => Some(ServerEvent::ProtocolMode(ProtocolMode::Boot)),
                Some(1) => Some(ServerEvent::ProtocolMode(ProtocolMode::Report)),
                _ => None,
            };
        }
        if handle == self.control_point {
            return match data.first() {
                Some(0) => Some(ServerEvent::Suspend(true)),
                Some(1) => Some(ServerEvent::Suspend(false)),
                _ => None,
            };
        }
        if handle == self.output || handle == self.boot_output {
            let mut report = Vec::new();
            // Oversized writes are cut down; the application rejects the length.
            let len = data.len().min(MAX_OUTPUT_REPORT);
            let _ = report.extend_from_slice(&data[..len]);
            return Some(ServerEvent::Output(ReportType::Output, report));
        }
        if handle == self.input_cccd {
            let enabled = data.first().is_some_and(|b| b & 0x01 != 0);
            return Some(ServerEvent::InputNotifications(enabled));
        }
        None
    }
}
