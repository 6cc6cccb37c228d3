//! USB HID device - embassy-usb glue around a [`ControlLoop`].
//!
//! The interface is declared with the boot subclass so BIOS-style hosts
//! can select the boot protocol. SET_PROTOCOL restarts the connection in
//! the requested mode.

use core::cell::RefCell;

use embassy_futures::select::{select, Either};
use embassy_nrf::peripherals;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::Instant;
use embassy_usb::control::{InResponse, OutResponse, Recipient, Request, RequestType};
use embassy_usb::driver::{Endpoint, EndpointError, EndpointIn, EndpointOut};
use embassy_usb::{Handler, UsbDevice};

use super::{UsbDriver, POWER};
use crate::config::{self, REPORT_QUEUE_DEPTH};
use crate::control::ControlLoop;
use crate::error::{Error, Result};
use crate::hid::{HidApplication, ProtocolMode, ReportSelector, ReportType};
use crate::power_logic::{usb_bus_state, usb_granted_current_ua};
use crate::transport::{PowerState, ReportQueue, Transport};

const USB_CLASS_HID: u8 = 0x03;
const USB_SUBCLASS_BOOT: u8 = 0x01;

const HID_DESC_TYPE_HID: u8 = 0x21;
const HID_DESC_TYPE_REPORT: u8 = 0x22;

const HID_REQ_GET_REPORT: u8 = 0x01;
const HID_REQ_GET_IDLE: u8 = 0x02;
const HID_REQ_GET_PROTOCOL: u8 = 0x03;
const HID_REQ_SET_REPORT: u8 = 0x09;
const HID_REQ_SET_IDLE: u8 = 0x0a;
const HID_REQ_SET_PROTOCOL: u8 = 0x0b;

pub type HidIn = <UsbDriver as embassy_usb::driver::Driver<'static>>::EndpointIn;
pub type HidOut = <UsbDriver as embassy_usb::driver::Driver<'static>>::EndpointOut;

/// Control loop shared between the USB callbacks and the control task.
pub type Bridge<A> = Mutex<CriticalSectionRawMutex, RefCell<ControlLoop<A, UsbLink>>>;

static REMOTE_WAKEUP: Signal<CriticalSectionRawMutex, ()> = Signal::new();
static REPORTS: ReportQueue<CriticalSectionRawMutex, REPORT_QUEUE_DEPTH> = ReportQueue::new();

/// Transport handle used by the control loop.
///
/// Reports are copied into a queue and written to the IN endpoint by
/// [`hid_writer_task`]; wakeup requests are forwarded to
/// [`run_usb_device`].
pub struct UsbLink {
    _private: (),
}

impl UsbLink {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for UsbLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UsbLink {
    fn send_report(&mut self, report: &[u8]) -> Result<()> {
        match POWER.load() {
            PowerState::ConfiguredActive => {}
            PowerState::Suspended => return Err(Error::Suspended),
            PowerState::Unconfigured => return Err(Error::NotReady),
        }
        REPORTS.push(report).inspect_err(|e| {
            if *e == Error::QueueFull {
                warn!("USB report queue full");
            }
        })
    }

    fn power_state(&self) -> PowerState {
        POWER.load()
    }

    fn remote_wakeup(&mut self) -> Result<()> {
        if POWER.load() != PowerState::Suspended {
            return Err(Error::NotReady);
        }
        REMOTE_WAKEUP.signal(());
        Ok(())
    }

    fn granted_current_ua(&self) -> Option<u32> {
        Some(usb_granted_current_ua(POWER.load(), config::USB_MAX_POWER_MA))
    }
}

/// Boot interface protocol code announced in the interface descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootInterface {
    Keyboard,
    Mouse,
}

impl BootInterface {
    const fn protocol(self) -> u8 {
        match self {
            BootInterface::Keyboard => 0x01,
            BootInterface::Mouse => 0x02,
        }
    }
}

/// Bus events and HID class requests for the one HID interface.
pub struct UsbHidInterface<A: HidApplication + 'static> {
    bridge: &'static Bridge<A>,
    report_descriptor: &'static [u8],
    if_num: u8,
    configured: bool,
    protocol: ProtocolMode,
    // SET_IDLE duration in 4 ms units; stored for GET_IDLE only.
    idle: u8,
}

impl<A: HidApplication + 'static> UsbHidInterface<A> {
    pub fn new(bridge: &'static Bridge<A>, report_descriptor: &'static [u8]) -> Self {
        Self {
            bridge,
            report_descriptor,
            if_num: 0,
            configured: false,
            protocol: ProtocolMode::Report,
            idle: 0,
        }
    }

    fn apply(&mut self, state: PowerState) {
        POWER.store(state);
        if state == PowerState::Unconfigured {
            let dropped = REPORTS.discard();
            if dropped > 0 {
                debug!("dropped {} queued reports", dropped);
            }
        }
        let now = Instant::now();
        let protocol = self.protocol;
        self.bridge.lock(|c| {
            let mut c = c.borrow_mut();
            c.on_power(state, now);
            match state {
                PowerState::ConfiguredActive => c.start(protocol),
                PowerState::Unconfigured => c.stop(),
                PowerState::Suspended => {}
            }
        });
    }

    fn hid_descriptor(&self) -> [u8; 7] {
        let [len_lo, len_hi] = (self.report_descriptor.len() as u16).to_le_bytes();
        [
            0x11, 0x01, // bcdHID 1.11
            0x00, // country code
            0x01, // one class descriptor
            HID_DESC_TYPE_REPORT,
            len_lo,
            len_hi,
        ]
    }

    fn set_protocol(&mut self, mode: ProtocolMode) {
        info!("SET_PROTOCOL {}", mode);
        self.protocol = mode;
        if self.configured {
            self.bridge.lock(|c| c.borrow_mut().start(mode));
        }
    }

    fn set_report(&mut self, value: u16, data: &[u8]) -> OutResponse {
        let Some(selector) = ReportSelector::from_wire(value) else {
            return OutResponse::Rejected;
        };
        if selector.ty == ReportType::Input {
            return OutResponse::Rejected;
        }
        match self
            .bridge
            .lock(|c| c.borrow_mut().on_output_report(selector.ty, data))
        {
            // A bad length was replaced by the report's default value.
            Ok(()) | Err(Error::InvalidReportLength { .. }) => OutResponse::Accepted,
            Err(_) => OutResponse::Rejected,
        }
    }

    fn addressed_to_us(&self, req: &Request) -> bool {
        req.recipient == Recipient::Interface && req.index == u16::from(self.if_num)
    }
}

impl<A: HidApplication + 'static> Handler for UsbHidInterface<A> {
    fn enabled(&mut self, enabled: bool) {
        info!("USB enabled: {}", enabled);
        if !enabled {
            self.configured = false;
            self.apply(PowerState::Unconfigured);
        }
    }

    fn reset(&mut self) {
        info!("USB reset");
        self.configured = false;
        // Every reset returns the interface to the report protocol.
        self.protocol = ProtocolMode::Report;
        self.apply(PowerState::Unconfigured);
    }

    fn configured(&mut self, configured: bool) {
        self.configured = configured;
        self.apply(usb_bus_state(configured, false));
    }

    fn suspended(&mut self, suspended: bool) {
        let state = usb_bus_state(self.configured, suspended);
        POWER.store(state);
        let now = Instant::now();
        self.bridge.lock(|c| c.borrow_mut().on_power(state, now));
    }

    fn remote_wakeup_enabled(&mut self, enabled: bool) {
        info!("USB remote wakeup enabled: {}", enabled);
    }

    fn control_out(&mut self, req: Request, data: &[u8]) -> Option<OutResponse> {
        if req.request_type != RequestType::Class || !self.addressed_to_us(&req) {
            return None;
        }
        Some(match req.request {
            HID_REQ_SET_REPORT => self.set_report(req.value, data),
            HID_REQ_SET_IDLE => {
                self.idle = (req.value >> 8) as u8;
                OutResponse::Accepted
            }
            HID_REQ_SET_PROTOCOL => {
                self.set_protocol(ProtocolMode::from_wire(req.value));
                OutResponse::Accepted
            }
            _ => OutResponse::Rejected,
        })
    }

    fn control_in<'a>(&'a mut self, req: Request, buf: &'a mut [u8]) -> Option<InResponse<'a>> {
        if !self.addressed_to_us(&req) {
            return None;
        }
        match req.request_type {
            RequestType::Standard if req.request == Request::GET_DESCRIPTOR => {
                Some(match (req.value >> 8) as u8 {
                    HID_DESC_TYPE_REPORT => InResponse::Accepted(self.report_descriptor),
                    HID_DESC_TYPE_HID if buf.len() >= 7 => {
                        buf[..7].copy_from_slice(&self.hid_descriptor());
                        InResponse::Accepted(&buf[..7])
                    }
                    _ => InResponse::Rejected,
                })
            }
            RequestType::Class => Some(match req.request {
                HID_REQ_GET_REPORT => {
                    let len = ReportSelector::from_wire(req.value).and_then(|selector| {
                        self.bridge
                            .lock(|c| c.borrow().on_report_request(selector, buf))
                    });
                    match len {
                        Some(len) => InResponse::Accepted(&buf[..len]),
                        None => InResponse::Rejected,
                    }
                }
                HID_REQ_GET_IDLE if !buf.is_empty() => {
                    buf[0] = self.idle;
                    InResponse::Accepted(&buf[..1])
                }
                HID_REQ_GET_PROTOCOL if !buf.is_empty() => {
                    buf[0] = self.protocol.to_wire();
                    InResponse::Accepted(&buf[..1])
                }
                _ => InResponse::Rejected,
            }),
            _ => None,
        }
    }
}

/// Build result containing the USB device runner and the HID endpoints.
pub struct UsbHidDevice {
    pub device: UsbDevice<'static, UsbDriver>,
    pub ep_in: HidIn,
    pub ep_out: HidOut,
}

/// Initialise the USB stack and create the HID device.
///
/// Must be called exactly once. All static buffers are consumed here.
pub fn init<A: HidApplication + 'static>(
    usbd: peripherals::USBD,
    boot: BootInterface,
    interface: &'static mut UsbHidInterface<A>,
) -> UsbHidDevice {
    let usb_config = super::device_config(config::USB_PRODUCT, config::USB_SERIAL_NUMBER);
    let mut builder = super::builder(usbd, usb_config);

    let hid_descriptor = interface.hid_descriptor();
    let mut func = builder.function(USB_CLASS_HID, USB_SUBCLASS_BOOT, boot.protocol());
    let mut iface = func.interface();
    interface.if_num = u8::from(iface.interface_number());
    let mut alt = iface.alt_setting(USB_CLASS_HID, USB_SUBCLASS_BOOT, boot.protocol(), None);
    alt.descriptor(HID_DESC_TYPE_HID, &hid_descriptor);
    let ep_out = alt.endpoint_interrupt_out(config::USB_HID_PACKET_SIZE, config::USB_HID_POLL_MS);
    let ep_in = alt.endpoint_interrupt_in(config::USB_HID_PACKET_SIZE, config::USB_HID_POLL_MS);
    drop(func);

    builder.handler(interface);
    let device = builder.build();

    info!("USB HID device initialised ({})", boot);

    UsbHidDevice {
        device,
        ep_in,
        ep_out,
    }
}

/// Run the USB device stack - must be spawned as a dedicated Embassy task.
///
/// While the bus is suspended, waits for either a host resume or a remote
/// wakeup request from the control loop.
pub async fn run_usb_device(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    info!("USB device task started");
    loop {
        device.run_until_suspend().await;
        REMOTE_WAKEUP.reset();
        match select(device.wait_resume(), REMOTE_WAKEUP.wait()).await {
            Either::First(()) => {}
            Either::Second(()) => {
                info!("USB remote wakeup");
                if let Err(_e) = device.remote_wakeup().await {
                    warn!("USB remote wakeup failed");
                }
            }
        }
    }
}

/// Write queued reports to the IN endpoint.
pub async fn hid_writer_task(mut ep_in: HidIn) -> ! {
    info!("HID writer task started - waiting for reports");
    loop {
        let report = REPORTS.next().await;
        match ep_in.write(&report).await {
            Ok(()) => {}
            Err(EndpointError::Disabled) => ep_in.wait_enabled().await,
            Err(EndpointError::BufferOverflow) => warn!("USB HID report too long"),
        }
    }
}

/// Deliver OUT endpoint reports (keyboard LEDs) to the bridge.
pub async fn hid_reader_task<A: HidApplication + 'static>(
    mut ep_out: HidOut,
    bridge: &'static Bridge<A>,
) -> ! {
    let mut buf = [0u8; config::USB_HID_PACKET_SIZE as usize];
    loop {
        ep_out.wait_enabled().await;
        loop {
            match ep_out.read(&mut buf).await {
                Ok(n) => {
                    let data = &buf[..n];
                    if let Err(e) = bridge.lock(|c| {
                        c.borrow_mut().on_output_report(ReportType::Output, data)
                    }) {
                        debug!("output report not applied: {}", e);
                    }
                }
                Err(EndpointError::Disabled) => break,
                Err(EndpointError::BufferOverflow) => warn!("USB HID output report too long"),
            }
        }
    }
}
