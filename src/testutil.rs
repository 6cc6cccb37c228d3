//! Recording doubles for unit tests.

use std::vec::Vec;

use crate::error::{Error, Result};
use crate::hid::{Indicators, ReportSelector};
use crate::transport::{PowerState, Transport};

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Vec<Vec<u8>>,
    pub armed: Vec<ReportSelector>,
    pub power: PowerState,
    pub wakeups: u32,
    pub fail_sends: bool,
    pub fail_wakeup: bool,
}

impl RecordingTransport {
    pub fn active() -> Self {
        Self {
            power: PowerState::ConfiguredActive,
            ..Self::default()
        }
    }

    pub fn last_sent(&self) -> Option<&[u8]> {
        self.sent.last().map(Vec::as_slice)
    }
}

impl Transport for RecordingTransport {
    fn send_report(&mut self, report: &[u8]) -> Result<()> {
        if self.fail_sends {
            return Err(Error::Transport(-5));
        }
        self.sent.push(report.to_vec());
        Ok(())
    }

    fn receive_report(&mut self, selector: ReportSelector) {
        self.armed.push(selector);
    }

    fn power_state(&self) -> PowerState {
        self.power
    }

    fn remote_wakeup(&mut self) -> Result<()> {
        self.wakeups += 1;
        if self.fail_wakeup {
            return Err(Error::Transport(-1));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingIndicators {
    pub state: [bool; 4],
    pub writes: u32,
}

impl Indicators for RecordingIndicators {
    fn set_indicator(&mut self, index: u8, on: bool) {
        if let Some(slot) = self.state.get_mut(usize::from(index)) {
            *slot = on;
        }
        self.writes += 1;
    }
}
