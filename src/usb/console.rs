//! CDC-ACM serial console.
//!
//! A bare USB device with one virtual COM port. Bus power transitions are
//! logged together with the current the host granted, and the same
//! operator commands as the radio console are accepted. There is no radio
//! on this build, so pairing replies only report that nothing is pending.

use core::fmt::Write;

use embassy_nrf::peripherals;
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::{Handler, UsbDevice};
use heapless::String;
use static_cell::StaticCell;

use super::{UsbDriver, POWER};
use crate::config;
use crate::pairing::OperatorCommand;
use crate::power_logic::{usb_bus_state, usb_granted_current_ua};
use crate::shell::{self, Edit, LineEditor, ShellCommand, USAGE};

static CDC_STATE: StaticCell<State<'static>> = StaticCell::new();

/// Logs bus power transitions and publishes them for `status`.
#[derive(Default)]
pub struct ShellPowerHandler {
    configured: bool,
    suspended: bool,
}

impl ShellPowerHandler {
    pub const fn new() -> Self {
        Self {
            configured: false,
            suspended: false,
        }
    }

    fn granted_ua(&self) -> u32 {
        usb_granted_current_ua(
            usb_bus_state(self.configured, self.suspended),
            config::USB_MAX_POWER_MA,
        )
    }

    fn power_changed(&mut self) {
        let state = usb_bus_state(self.configured, self.suspended);
        if POWER.store(state) != state {
            info!(
                "USB power state: {}, granted current: {}uA",
                state,
                self.granted_ua()
            );
        }
    }
}

impl Handler for ShellPowerHandler {
    fn enabled(&mut self, enabled: bool) {
        if !enabled {
            self.configured = false;
            self.suspended = false;
            self.power_changed();
        }
    }

    fn reset(&mut self) {
        self.configured = false;
        self.suspended = false;
        self.power_changed();
    }

    fn configured(&mut self, configured: bool) {
        self.configured = configured;
        POWER.store(usb_bus_state(self.configured, self.suspended));
        info!(
            "USB configured: {}, granted current: {}uA",
            configured,
            self.granted_ua()
        );
    }

    fn suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
        self.power_changed();
    }
}

pub struct UsbShell {
    pub device: UsbDevice<'static, UsbDriver>,
    pub class: CdcAcmClass<'static, UsbDriver>,
}

/// Initialise the USB stack with a single CDC-ACM port.
///
/// Must be called exactly once.
pub fn init_shell(
    usbd: peripherals::USBD,
    serial: &'static str,
    power: &'static mut ShellPowerHandler,
) -> UsbShell {
    let mut usb_config = super::device_config(config::USB_SHELL_PRODUCT, serial);
    // Interface association descriptor for the two CDC interfaces.
    usb_config.device_class = 0xEF;
    usb_config.device_sub_class = 0x02;
    usb_config.device_protocol = 0x01;
    usb_config.composite_with_iads = true;

    let mut builder = super::builder(usbd, usb_config);
    builder.handler(power);

    let class = CdcAcmClass::new(
        &mut builder,
        CDC_STATE.init(State::new()),
        config::USB_CDC_PACKET_SIZE,
    );
    let device = builder.build();

    info!("USB shell initialised, serial {=str}", serial);

    UsbShell { device, class }
}

/// Serve the console forever, one terminal session at a time.
pub async fn run_shell(mut class: CdcAcmClass<'static, UsbDriver>) -> ! {
    let mut battery: Option<u8> = None;
    loop {
        class.wait_connection().await;
        info!("shell connected");
        // Only ends when the terminal goes away.
        let _ = session(&mut class, &mut battery).await;
        info!("shell disconnected");
    }
}

async fn session(
    class: &mut CdcAcmClass<'static, UsbDriver>,
    battery: &mut Option<u8>,
) -> Result<(), EndpointError> {
    let mut editor = LineEditor::new();
    let mut packet = [0u8; config::USB_CDC_PACKET_SIZE as usize];
    class.write_packet(b"\r\nhidbridge> ").await?;

    loop {
        let n = class.read_packet(&mut packet).await?;
        for &byte in &packet[..n] {
            match editor.feed(byte) {
                Edit::Echo(c) => class.write_packet(&[c]).await?,
                Edit::Erase => class.write_packet(b"\x08 \x08").await?,
                Edit::Overflow => class.write_packet(b"\r\nline too long\r\nhidbridge> ").await?,
                Edit::Submit(line) => {
                    let reply = respond(&line, battery);
                    class.write_packet(b"\r\n").await?;
                    // Replies can exceed one packet.
                    for chunk in reply.as_bytes().chunks(usize::from(config::USB_CDC_PACKET_SIZE)) {
                        class.write_packet(chunk).await?;
                    }
                    class.write_packet(b"\r\nhidbridge> ").await?;
                }
                Edit::Ignored => {}
            }
        }
    }
}

fn respond(line: &str, battery: &mut Option<u8>) -> String<96> {
    let mut out = String::new();
    // Replies are sized to fit; a truncated line is still useful.
    let _ = match ShellCommand::parse(line) {
        Ok(ShellCommand::Status) => {
            let state = POWER.load();
            let granted = usb_granted_current_ua(state, config::USB_MAX_POWER_MA);
            shell::write_status(&mut out, state, granted).and_then(|()| match *battery {
                Some(level) => write!(out, ", battery {}%", level),
                None => Ok(()),
            })
        }
        Ok(ShellCommand::Operator(OperatorCommand::Battery(level))) => {
            *battery = Some(level);
            info!("battery level {}%", level);
            write!(out, "battery level {}%", level)
        }
        Ok(ShellCommand::Operator(OperatorCommand::Passkey(_))) => {
            out.push_str("no pairing in progress").map_err(|_| core::fmt::Error)
        }
        Ok(ShellCommand::Help) | Err(_) => out.push_str(USAGE).map_err(|_| core::fmt::Error),
    };
    out
}
