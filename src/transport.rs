//! Narrow interface to the wired or wireless transport.
//!
//! The bridge never talks to a USB or BLE stack directly. It submits whole
//! report buffers, arms reception of host writes, observes power state and
//! asks for remote wakeup through [`Transport`].

use core::sync::atomic::{AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;

use crate::config::MAX_INPUT_REPORT;
use crate::error::{Error, Result};
use crate::hid::ReportSelector;

/// Link power state as seen by the device.
///
/// Only transport events move this; application logic reads it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    /// Detached, resetting, or not yet configured by the host.
    #[default]
    Unconfigured,
    /// Configured and running.
    ConfiguredActive,
    /// Configured, but the host suspended the bus / link.
    Suspended,
}

impl PowerState {
    const fn to_raw(self) -> u8 {
        match self {
            PowerState::Unconfigured => 0,
            PowerState::ConfiguredActive => 1,
            PowerState::Suspended => 2,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => PowerState::ConfiguredActive,
            2 => PowerState::Suspended,
            _ => PowerState::Unconfigured,
        }
    }

    pub const fn is_configured(self) -> bool {
        !matches!(self, PowerState::Unconfigured)
    }
}

/// Power state shared between a transport callback context and the
/// control loop. Single writer (the transport), any number of readers.
pub struct PowerCell(AtomicU8);

impl PowerCell {
    pub const fn new() -> Self {
        Self(AtomicU8::new(PowerState::Unconfigured.to_raw()))
    }

    pub fn load(&self) -> PowerState {
        PowerState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Store `state`, returning the previous value.
    pub fn store(&self, state: PowerState) -> PowerState {
        PowerState::from_raw(self.0.swap(state.to_raw(), Ordering::AcqRel))
    }
}

impl Default for PowerCell {
    fn default() -> Self {
        Self::new()
    }
}

/// One queued input report.
pub type ReportBuf = Vec<u8, MAX_INPUT_REPORT>;

/// Reports accepted by a transport but not yet written to the host.
///
/// Filled from the control loop without blocking, drained by an endpoint
/// writer task. Emptied when the connection ends so a new connection
/// never sees the old one's state.
pub struct ReportQueue<M: RawMutex, const N: usize> {
    queue: Channel<M, ReportBuf, N>,
}

impl<M: RawMutex, const N: usize> ReportQueue<M, N> {
    pub const fn new() -> Self {
        Self {
            queue: Channel::new(),
        }
    }

    /// Copy `report` into the queue.
    pub fn push(&self, report: &[u8]) -> Result<()> {
        let buf = Vec::from_slice(report).map_err(|_| Error::BufferOverflow)?;
        self.queue.try_send(buf).map_err(|_| Error::QueueFull)
    }

    /// Wait for the next report to write.
    pub async fn next(&self) -> ReportBuf {
        self.queue.receive().await
    }

    /// Drop everything still queued. Returns how many reports were dropped.
    pub fn discard(&self) -> usize {
        let mut dropped = 0;
        while self.queue.try_receive().is_ok() {
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<M: RawMutex, const N: usize> Default for ReportQueue<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Operations the bridge needs from a transport connection.
pub trait Transport {
    /// Submit one complete input (or requested) report. Must not block.
    fn send_report(&mut self, report: &[u8]) -> Result<()>;

    /// The buffer for `selector` is ready for the next host write.
    /// Transports that deliver host writes by callback can ignore this.
    fn receive_report(&mut self, _selector: ReportSelector) {}

    /// Current link power state.
    fn power_state(&self) -> PowerState;

    /// Ask the host to resume the link.
    fn remote_wakeup(&mut self) -> Result<()>;

    /// Whether the host has selected a configuration.
    fn configured(&self) -> bool {
        self.power_state().is_configured()
    }

    /// Bus current granted by the host, where the transport knows it.
    fn granted_current_ua(&self) -> Option<u32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_cell_starts_unconfigured() {
        let cell = PowerCell::new();
        assert_eq!(cell.load(), PowerState::Unconfigured);
    }

    #[test]
    fn power_cell_store_returns_previous() {
        let cell = PowerCell::new();
        assert_eq!(cell.store(PowerState::ConfiguredActive), PowerState::Unconfigured);
        assert_eq!(cell.store(PowerState::Suspended), PowerState::ConfiguredActive);
        assert_eq!(cell.load(), PowerState::Suspended);
    }

    type Queue = ReportQueue<embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex, 2>;

    #[test]
    fn report_queue_is_bounded() {
        let q = Queue::new();
        q.push(&[1, 2]).unwrap();
        q.push(&[3]).unwrap();
        assert_eq!(q.push(&[4]), Err(Error::QueueFull));
        assert_eq!(q.push(&[0; MAX_INPUT_REPORT + 1]), Err(Error::BufferOverflow));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn discarded_reports_never_reach_the_writer() {
        let q = Queue::new();
        q.push(&[1, 0, 127, 0]).unwrap();
        q.push(&[1, 0, 127, 0]).unwrap();
        assert_eq!(q.discard(), 2);
        assert!(q.is_empty());

        q.push(&[1, 0, 0, 0]).unwrap();
        let next = embassy_futures::block_on(q.next());
        assert_eq!(next.as_slice(), &[1, 0, 0, 0]);
    }

    #[test]
    fn suspended_still_counts_as_configured() {
        assert!(PowerState::Suspended.is_configured());
        assert!(PowerState::ConfiguredActive.is_configured());
        assert!(!PowerState::Unconfigured.is_configured());
    }
}
