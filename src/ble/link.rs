//! HID-over-GATT transport.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use nrf_softdevice::ble::gatt_server::{self, NotifyValueError};
use nrf_softdevice::ble::Connection;

use crate::control::ControlLoop;
use crate::error::{Error, Result};
use crate::hid::ProtocolMode;
use crate::transport::{PowerCell, PowerState, Transport};

/// Control loop shared between the GATT server and the control task.
pub type BleBridge<A> = Mutex<CriticalSectionRawMutex, RefCell<ControlLoop<A, BleLink>>>;

/// Link power as seen by the GATT callbacks.
pub(crate) static BLE_POWER: PowerCell = PowerCell::new();

/// Notification handles for the two input report shapes.
#[derive(Clone, Copy)]
pub struct InputHandles {
    pub report: u16,
    pub boot: u16,
}

/// Sends input reports as notifications on the current connection.
pub struct BleLink {
    handles: InputHandles,
    conn: Option<Connection>,
    mode: ProtocolMode,
}

impl BleLink {
    pub fn new(handles: InputHandles) -> Self {
        Self {
            handles,
            conn: None,
            mode: ProtocolMode::Report,
        }
    }

    pub fn attach(&mut self, conn: Connection) {
        self.conn = Some(conn);
        self.mode = ProtocolMode::Report;
    }

    pub fn detach(&mut self) {
        self.conn = None;
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    /// Host wrote the Protocol Mode characteristic.
    pub fn set_protocol(&mut self, mode: ProtocolMode) {
        self.mode = mode;
    }
}

impl Transport for BleLink {
    fn send_report(&mut self, report: &[u8]) -> Result<()> {
        match BLE_POWER.load() {
            PowerState::ConfiguredActive => {}
            PowerState::Suspended => return Err(Error::Suspended),
            PowerState::Unconfigured => return Err(Error::NotReady),
        }
        let conn = self.conn.as_ref().ok_or(Error::NotReady)?;
        let handle = match self.mode {
            ProtocolMode::Report => self.handles.report,
            ProtocolMode::Boot => self.handles.boot,
        };
        gatt_server::notify_value(conn, handle, report).map_err(|e| match e {
            NotifyValueError::Disconnected => Error::NotReady,
            NotifyValueError::Raw(raw) => {
                warn!("notify failed: {}", raw);
                Error::Transport(raw as i32)
            }
        })
    }

    fn power_state(&self) -> PowerState {
        BLE_POWER.load()
    }

    fn remote_wakeup(&mut self) -> Result<()> {
        // The next notification wakes the host.
        if self.conn.is_none() {
            return Err(Error::NotReady);
        }
        BLE_POWER.store(PowerState::ConfiguredActive);
        Ok(())
    }
}
