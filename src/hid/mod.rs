//! HID application state - report buffers, protocol mode, host writes.
//!
//! Each logical device (keyboard, mouse) owns one buffer per report kind for
//! its whole lifetime and exposes the same lifecycle to the transport:
//! `start` / `stop` per connection, `on_output_report` for host writes and
//! `on_report_request` for host polls. The control loop drives input through
//! [`HidApplication::apply_input`] and [`HidApplication::send_input`].

pub mod keyboard;
pub mod mouse;


use crate::config::MAX_OUTPUT_REPORT;
use crate::error::Result;
use crate::input::InputEvent;
use crate::transport::Transport;

/// Report shape negotiated for the current connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolMode {
    /// Fixed BIOS-compatible layout, no report IDs.
    Boot,
    /// Layout described by the report descriptor.
    Report,
}

impl ProtocolMode {
    /// Decode a SET_PROTOCOL value: 0 is boot, anything else report.
    pub const fn from_wire(value: u16) -> Self {
        if value == 0 {
            ProtocolMode::Boot
        } else {
            ProtocolMode::Report
        }
    }

    /// GET_PROTOCOL answer byte.
    pub const fn to_wire(self) -> u8 {
        match self {
            ProtocolMode::Boot => 0,
            ProtocolMode::Report => 1,
        }
    }
}

/// Direction / class of a HID report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportType {
    Input,
    Output,
    Feature,
}

/// Identity of one report: its type plus report ID (0 when IDs are unused).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReportSelector {
    pub ty: ReportType,
    pub id: u8,
}

impl ReportSelector {
    /// Decode the `wValue` of GET_REPORT / SET_REPORT: report type in the
    /// high byte (1 input, 2 output, 3 feature), report ID in the low byte.
    pub const fn from_wire(value: u16) -> Option<Self> {
        let ty = match (value >> 8) as u8 {
            1 => ReportType::Input,
            2 => ReportType::Output,
            3 => ReportType::Feature,
            _ => return None,
        };
        Some(Self::new(ty, value as u8))
    }

    pub const fn new(ty: ReportType, id: u8) -> Self {
        Self { ty, id }
    }

    pub const fn input(id: u8) -> Self {
        Self::new(ReportType::Input, id)
    }

    pub const fn output(id: u8) -> Self {
        Self::new(ReportType::Output, id)
    }

    pub const fn feature(id: u8) -> Self {
        Self::new(ReportType::Feature, id)
    }
}

/// Last value of a host-set report, kept so it can be replayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FeatureSnapshot {
    selector: ReportSelector,
    len: u8,
    data: [u8; MAX_OUTPUT_REPORT],
}

impl FeatureSnapshot {
    /// Capture `bytes` (wire form, including any report ID).
    /// Returns `None` if they do not fit.
    pub fn new(selector: ReportSelector, bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MAX_OUTPUT_REPORT {
            return None;
        }
        let mut data = [0u8; MAX_OUTPUT_REPORT];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            selector,
            len: bytes.len() as u8,
            data,
        })
    }

    pub fn selector(&self) -> ReportSelector {
        self.selector
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// Board feedback outputs (LEDs) driven by host-written reports.
pub trait Indicators {
    fn set_indicator(&mut self, index: u8, on: bool);
}

/// For applications without any feedback outputs.
impl Indicators for () {
    fn set_indicator(&mut self, _index: u8, _on: bool) {}
}

/// Keeps one indicator lit while it lives, e.g. for the duration of an
/// advertising window. Dropping the guard (also by cancellation) turns it
/// off.
pub struct LitIndicator<'a, I: Indicators> {
    indicators: &'a mut I,
    index: u8,
}

impl<'a, I: Indicators> LitIndicator<'a, I> {
    pub fn new(indicators: &'a mut I, index: u8) -> Self {
        indicators.set_indicator(index, true);
        Self { indicators, index }
    }
}

impl<I: Indicators> Drop for LitIndicator<'_, I> {
    fn drop(&mut self) {
        self.indicators.set_indicator(self.index, false);
    }
}

/// How often the control loop must wake up to resend relative motion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollRate {
    Idle,
    Fine,
}

/// One logical HID device as seen by the transport and the control loop.
///
/// The concrete device is chosen at construction time; the control loop is
/// generic over it.
pub trait HidApplication {
    /// A connection started with `mode`. Arms host-writable buffers.
    /// Calling it again without `stop` only re-arms.
    fn start(&mut self, mode: ProtocolMode, link: &mut dyn Transport);

    /// The connection ended. Drops connection-scoped state; buffers stay.
    fn stop(&mut self);

    /// Negotiated protocol, `None` while stopped.
    fn protocol(&self) -> Option<ProtocolMode>;

    fn is_started(&self) -> bool {
        self.protocol().is_some()
    }

    /// The host wrote an output or feature report.
    ///
    /// A wrong-length write substitutes the report's default value and
    /// still re-arms reception; the error only reports what happened.
    fn on_output_report(
        &mut self,
        ty: ReportType,
        data: &[u8],
        link: &mut dyn Transport,
    ) -> Result<()>;

    /// The host polled a report. Copies the buffered value into `buf`;
    /// `None` for selectors this application does not own.
    fn on_report_request(&self, selector: ReportSelector, buf: &mut [u8]) -> Option<usize>;

    /// Apply one input event to the buffered input report.
    /// Returns `true` if the report changed and should be sent.
    fn apply_input(&mut self, event: InputEvent) -> bool;

    /// Serialise the buffered input report for the current protocol.
    /// Returns the number of bytes written, 0 if `buf` is too small.
    fn input_report(&self, buf: &mut [u8]) -> usize;

    /// The buffered input report reached the transport.
    /// Momentary deltas are cleared here.
    fn report_sent(&mut self) {}

    /// `true` when resending the current report would carry no motion.
    fn steady(&self) -> bool {
        true
    }

    /// Periodic resend cadence, `None` if the application is purely
    /// edge-driven.
    fn poll_rate(&self) -> Option<PollRate> {
        None
    }

    /// Current value of the host-set feature report worth preserving.
    fn feature_snapshot(&self) -> Option<FeatureSnapshot> {
        None
    }

    /// Submit the buffered input report. At most one submission is in
    /// flight per buffer: the copy happens before `send_report` returns.
    fn send_input(&mut self, link: &mut dyn Transport) -> Result<()> {
        let mut buf = [0u8; crate::config::MAX_INPUT_REPORT];
        let len = self.input_report(&mut buf);
        if len == 0 {
            return Err(crate::error::Error::BufferOverflow);
        }
        link.send_report(&buf[..len])?;
        self.report_sent();
        Ok(())
    }
}
