//! High-resolution HID mouse application.
//!
//! Input report, report protocol (8 bytes):
//! ```text
//! Byte 0:   Report ID (1)
//! Byte 1:   Button bitfield
//!           Bit 0 = Left, Bit 1 = Right, Bit 2 = Middle
//! Byte 2:   X displacement (signed, -127..127)
//! Byte 3:   Y displacement (signed, -127..127)
//! Byte 4-5: Vertical wheel   (signed LE, -32767..32767)
//! Byte 6-7: Horizontal wheel (signed LE, -32767..32767)
//! ```
//!
//! Boot protocol (4 bytes): buttons, X, Y, wheel clamped to 8 bits.
//!
//! Feature report (2 bytes): report ID, resolution multiplier bits
//! (bits 0-1 vertical, bits 2-3 horizontal).

use crate::config::{MAX_SCROLL_RESOLUTION, MOUSE_AXIS_LIMIT, MOUSE_REPORT_ID, MOUSE_WHEEL_LIMIT};
use crate::error::{Error, Result};
use crate::hid::{
    FeatureSnapshot, HidApplication, Indicators, PollRate, ProtocolMode, ReportSelector,
    ReportType,
};
use crate::input::{codes, Axis, InputCode, InputEvent};
use crate::transport::Transport;

/// Report protocol mouse report size in bytes, report ID included.
pub const MOUSE_REPORT_SIZE: usize = 8;

/// Boot protocol mouse report size in bytes.
pub const MOUSE_BOOT_REPORT_SIZE: usize = 4;

/// Resolution multiplier feature report size in bytes, report ID included.
pub const MULTIPLIER_REPORT_SIZE: usize = 2;

/// Indicator showing that high-resolution scrolling is active.
pub const HIGH_RES_INDICATOR: u8 = 0;

/// Buffered mouse input state.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MouseReport {
    /// Button bitfield (bit 0 = button 1).
    pub buttons: u8,
    pub x: i8,
    pub y: i8,
    pub wheel_y: i16,
    pub wheel_x: i16,
}

impl MouseReport {
    /// No buttons, no motion.
    pub const fn empty() -> Self {
        Self {
            buttons: 0,
            x: 0,
            y: 0,
            wheel_y: 0,
            wheel_x: 0,
        }
    }

    /// Returns `true` when resending would carry no motion.
    pub fn steady(&self) -> bool {
        self.x == 0 && self.y == 0 && self.wheel_y == 0 && self.wheel_x == 0
    }

    /// Set or clear a 1-based button. Buttons beyond 3 are ignored.
    pub fn set_button(&mut self, button: u8, pressed: bool) {
        if !(1..=3).contains(&button) {
            return;
        }
        let mask = 1u8 << (button - 1);
        if pressed {
            self.buttons |= mask;
        } else {
            self.buttons &= !mask;
        }
    }

    /// Serialise for `mode` into `buf`.
    /// Returns the number of bytes written, 0 if `buf` is too small.
    pub fn serialize(&self, mode: ProtocolMode, buf: &mut [u8]) -> usize {
        match mode {
            ProtocolMode::Report => {
                if buf.len() < MOUSE_REPORT_SIZE {
                    return 0;
                }
                buf[0] = MOUSE_REPORT_ID;
                buf[1] = self.buttons;
                buf[2] = self.x as u8;
                buf[3] = self.y as u8;
                buf[4..6].copy_from_slice(&self.wheel_y.to_le_bytes());
                buf[6..8].copy_from_slice(&self.wheel_x.to_le_bytes());
                MOUSE_REPORT_SIZE
            }
            ProtocolMode::Boot => {
                if buf.len() < MOUSE_BOOT_REPORT_SIZE {
                    return 0;
                }
                buf[0] = self.buttons;
                buf[1] = self.x as u8;
                buf[2] = self.y as u8;
                buf[3] = self.wheel_y.clamp(-127, 127) as i8 as u8;
                MOUSE_BOOT_REPORT_SIZE
            }
        }
    }
}

/// Resolution multiplier feature report, as last written by the host.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResolutionMultiplier {
    /// Raw multiplier bits. 0 means "no multiplier".
    pub resolutions: u8,
}

impl ResolutionMultiplier {
    pub const SELECTOR: ReportSelector = ReportSelector::feature(MOUSE_REPORT_ID);

    /// Parse a host write (report ID included).
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        match data {
            [MOUSE_REPORT_ID, resolutions] => Some(Self {
                resolutions: *resolutions,
            }),
            _ => None,
        }
    }

    pub fn high_resolution(&self) -> bool {
        self.resolutions != 0
    }

    /// Wheel counts per detent on the vertical axis.
    pub fn vertical(&self) -> u8 {
        if self.resolutions & 0x03 != 0 {
            MAX_SCROLL_RESOLUTION
        } else {
            1
        }
    }

    /// Wheel counts per detent on the horizontal axis.
    pub fn horizontal(&self) -> u8 {
        if self.resolutions & 0x0C != 0 {
            MAX_SCROLL_RESOLUTION
        } else {
            1
        }
    }

    pub fn serialize(&self, buf: &mut [u8]) -> usize {
        if buf.len() < MULTIPLIER_REPORT_SIZE {
            return 0;
        }
        buf[0] = MOUSE_REPORT_ID;
        buf[1] = self.resolutions;
        MULTIPLIER_REPORT_SIZE
    }

    fn to_bytes(self) -> [u8; MULTIPLIER_REPORT_SIZE] {
        [MOUSE_REPORT_ID, self.resolutions]
    }
}

/// Relative deltas not yet carried by a sent report.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
struct Motion {
    x: i32,
    y: i32,
    wheel_y: i32,
    wheel_x: i32,
}

/// Mouse application.
///
/// Keys 0 and 1 scroll down/up while held, or move left/right while key 3
/// (horizontal mode) is held. Key 2 is the left button. Held motion is
/// resent on every poll until released. Relative axis events accumulate and
/// are drained by what each sent report carries, so deltas beyond one
/// report's range spill into the following polls.
pub struct MouseApp<I: Indicators> {
    buttons: u8,
    held_x: i8,
    held_wheel: i16,
    momentary: Motion,
    horizontal: bool,
    multiplier: ResolutionMultiplier,
    indicators: I,
    protocol: Option<ProtocolMode>,
}

impl<I: Indicators> MouseApp<I> {
    pub const INPUT_SELECTOR: ReportSelector = ReportSelector::input(MOUSE_REPORT_ID);

    pub fn new(indicators: I) -> Self {
        Self {
            buttons: 0,
            held_x: 0,
            held_wheel: 0,
            momentary: Motion::default(),
            horizontal: false,
            multiplier: ResolutionMultiplier::default(),
            indicators,
            protocol: None,
        }
    }

    /// The report as it would be sent now.
    pub fn report(&self) -> MouseReport {
        let axis = i32::from(MOUSE_AXIS_LIMIT);
        let wheel = i32::from(MOUSE_WHEEL_LIMIT);
        MouseReport {
            buttons: self.buttons,
            x: (i32::from(self.held_x) + self.momentary.x).clamp(-axis, axis) as i8,
            y: self.momentary.y.clamp(-axis, axis) as i8,
            wheel_y: (i32::from(self.held_wheel) + self.momentary.wheel_y).clamp(-wheel, wheel)
                as i16,
            wheel_x: self.momentary.wheel_x.clamp(-wheel, wheel) as i16,
        }
    }

    pub fn multiplier(&self) -> ResolutionMultiplier {
        self.multiplier
    }

    /// Horizontal emulation mode is active.
    pub fn horizontal(&self) -> bool {
        self.horizontal
    }

    pub fn indicators(&self) -> &I {
        &self.indicators
    }

    /// Replace the buffered state with `report` and submit it.
    pub fn send(&mut self, report: MouseReport, link: &mut dyn Transport) -> Result<()> {
        self.buttons = report.buttons;
        self.held_x = report.x;
        self.held_wheel = report.wheel_y;
        self.momentary = Motion {
            y: i32::from(report.y),
            wheel_x: i32::from(report.wheel_x),
            ..Motion::default()
        };
        self.send_input(link)
    }

    fn apply_emulated_scroll(&mut self, code: InputCode, pressed: bool) {
        if !pressed {
            self.held_x = 0;
            self.held_wheel = 0;
            return;
        }
        let direction = if code == codes::KEY_0 { -1 } else { 1 };
        if self.horizontal {
            self.held_x = direction;
        } else {
            self.held_wheel = i16::from(direction);
        }
    }

    fn accumulate(&mut self, axis: Axis, delta: i32) {
        let slot = match axis {
            Axis::X => &mut self.momentary.x,
            Axis::Y => &mut self.momentary.y,
            Axis::Wheel => &mut self.momentary.wheel_y,
            Axis::HWheel => &mut self.momentary.wheel_x,
        };
        *slot = slot.saturating_add(delta);
    }
}

impl<I: Indicators> HidApplication for MouseApp<I> {
    fn start(&mut self, mode: ProtocolMode, link: &mut dyn Transport) {
        if self.protocol.is_none() {
            self.multiplier = ResolutionMultiplier::default();
            info!("HID mouse start with protocol {}", mode);
        }
        self.protocol = Some(mode);
        link.receive_report(ResolutionMultiplier::SELECTOR);
    }

    fn stop(&mut self) {
        self.held_x = 0;
        self.held_wheel = 0;
        self.momentary = Motion::default();
        self.indicators.set_indicator(HIGH_RES_INDICATOR, false);
        if self.protocol.take().is_some() {
            info!("HID mouse stop");
        }
    }

    fn protocol(&self) -> Option<ProtocolMode> {
        self.protocol
    }

    fn on_output_report(
        &mut self,
        ty: ReportType,
        data: &[u8],
        link: &mut dyn Transport,
    ) -> Result<()> {
        if ty != ReportType::Feature {
            return Err(Error::UnknownReport);
        }

        let result = if data.len() != MULTIPLIER_REPORT_SIZE {
            warn!("multiplier report with bad length {}", data.len());
            self.multiplier = ResolutionMultiplier::default();
            Err(Error::InvalidReportLength {
                expected: MULTIPLIER_REPORT_SIZE as u8,
                actual: data.len().min(u8::MAX as usize) as u8,
            })
        } else {
            match ResolutionMultiplier::from_bytes(data) {
                Some(report) => {
                    self.multiplier = report;
                    Ok(())
                }
                None => return Err(Error::UnknownReport),
            }
        };

        self.indicators
            .set_indicator(HIGH_RES_INDICATOR, self.multiplier.high_resolution());
        info!(
            "multiplier report: {=u8:x} ({})",
            self.multiplier.resolutions,
            data.len()
        );
        link.receive_report(ResolutionMultiplier::SELECTOR);
        result
    }

    fn on_report_request(&self, selector: ReportSelector, buf: &mut [u8]) -> Option<usize> {
        let mode = self.protocol.unwrap_or(ProtocolMode::Report);
        let boot_input = mode == ProtocolMode::Boot && selector == ReportSelector::input(0);
        if selector == Self::INPUT_SELECTOR || boot_input {
            let len = self.report().serialize(mode, buf);
            return (len > 0).then_some(len);
        }
        if selector == ResolutionMultiplier::SELECTOR {
            let len = self.multiplier.serialize(buf);
            return (len > 0).then_some(len);
        }
        None
    }

    fn apply_input(&mut self, event: InputEvent) -> bool {
        let before = self.report();
        let pressed = event.value != 0;
        match event.code {
            codes::KEY_0 | codes::KEY_1 => self.apply_emulated_scroll(event.code, pressed),
            codes::KEY_2 => self.buttons_set(1, pressed),
            codes::KEY_3 => {
                self.horizontal = pressed;
                return false;
            }
            InputCode::Button(button) => self.buttons_set(button, pressed),
            InputCode::Rel(axis) => self.accumulate(axis, event.value),
            InputCode::Key(_) => return false,
        }
        self.report() != before
    }

    fn input_report(&self, buf: &mut [u8]) -> usize {
        self.report()
            .serialize(self.protocol.unwrap_or(ProtocolMode::Report), buf)
    }

    fn report_sent(&mut self) {
        // Drain only what the report carried; clamped excess goes out next poll.
        let sent = self.report();
        let boot = self.protocol == Some(ProtocolMode::Boot);
        let wheel_y = if boot {
            sent.wheel_y.clamp(-127, 127)
        } else {
            sent.wheel_y
        };
        self.momentary.x -= i32::from(sent.x) - i32::from(self.held_x);
        self.momentary.y -= i32::from(sent.y);
        self.momentary.wheel_y -= i32::from(wheel_y) - i32::from(self.held_wheel);
        if boot {
            // The boot layout has no horizontal wheel.
            self.momentary.wheel_x = 0;
        } else {
            self.momentary.wheel_x -= i32::from(sent.wheel_x);
        }
    }

    fn steady(&self) -> bool {
        self.report().steady()
    }

    fn poll_rate(&self) -> Option<PollRate> {
        if self.horizontal || self.multiplier.high_resolution() {
            Some(PollRate::Fine)
        } else {
            Some(PollRate::Idle)
        }
    }

    fn feature_snapshot(&self) -> Option<FeatureSnapshot> {
        FeatureSnapshot::new(ResolutionMultiplier::SELECTOR, &self.multiplier.to_bytes())
    }
}

impl<I: Indicators> MouseApp<I> {
    fn buttons_set(&mut self, button: u8, pressed: bool) {
        let mut report = MouseReport {
            buttons: self.buttons,
            ..MouseReport::empty()
        };
        report.set_button(button, pressed);
        self.buttons = report.buttons;
    }
}

// USB HID report descriptor for a high-resolution scrolling mouse

/// USB HID Report Descriptor for a 3-button mouse with high-resolution
/// vertical and horizontal wheels.
///
/// Each wheel sits in its own logical collection with a 2-bit resolution
/// multiplier feature (physical 1..120), followed by 4 bits of feature
/// padding. Report ID 1 is used for both the input and the feature report.
pub const MOUSE_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xA1, 0x01, // Collection (Application)
    0x85, MOUSE_REPORT_ID, //   Report ID (1)
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    //
    //   - Buttons (3 bits + 5 padding) -
    0x05, 0x09, //     Usage Page (Buttons)
    0x19, 0x01, //     Usage Minimum (Button 1)
    0x29, 0x03, //     Usage Maximum (Button 3)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x95, 0x03, //     Report Count (3)
    0x75, 0x01, //     Report Size (1)
    0x81, 0x02, //     Input (Data, Variable, Absolute)
    0x95, 0x01, //     Report Count (1)
    0x75, 0x05, //     Report Size (5)
    0x81, 0x01, //     Input (Constant) - padding
    //
    //   - X, Y displacement -
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x02, //     Report Count (2)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    //
    //   - Vertical wheel with resolution multiplier -
    0xA1, 0x02, //     Collection (Logical)
    0x09, 0x48, //       Usage (Resolution Multiplier)
    0x15, 0x00, //       Logical Minimum (0)
    0x25, 0x01, //       Logical Maximum (1)
    0x35, 0x01, //       Physical Minimum (1)
    0x45, MAX_SCROLL_RESOLUTION, //       Physical Maximum (120)
    0x75, 0x02, //       Report Size (2)
    0x95, 0x01, //       Report Count (1)
    0xB1, 0x02, //       Feature (Data, Variable, Absolute)
    0x35, 0x00, //       Physical Minimum (0)
    0x45, 0x00, //       Physical Maximum (0)
    0x09, 0x38, //       Usage (Wheel)
    0x16, 0x01, 0x80, //       Logical Minimum (-32767)
    0x26, 0xFF, 0x7F, //       Logical Maximum (32767)
    0x75, 0x10, //       Report Size (16)
    0x95, 0x01, //       Report Count (1)
    0x81, 0x06, //       Input (Data, Variable, Relative)
    0xC0, //     End Collection (Logical)
    //
    //   - Horizontal wheel with resolution multiplier -
    0xA1, 0x02, //     Collection (Logical)
    0x09, 0x48, //       Usage (Resolution Multiplier)
    0x15, 0x00, //       Logical Minimum (0)
    0x25, 0x01, //       Logical Maximum (1)
    0x35, 0x01, //       Physical Minimum (1)
    0x45, MAX_SCROLL_RESOLUTION, //       Physical Maximum (120)
    0x75, 0x02, //       Report Size (2)
    0x95, 0x01, //       Report Count (1)
    0xB1, 0x02, //       Feature (Data, Variable, Absolute)
    0x35, 0x00, //       Physical Minimum (0)
    0x45, 0x00, //       Physical Maximum (0)
    0x05, 0x0C, //       Usage Page (Consumer)
    0x0A, 0x38, 0x02, //       Usage (AC Pan)
    0x16, 0x01, 0x80, //       Logical Minimum (-32767)
    0x26, 0xFF, 0x7F, //       Logical Maximum (32767)
    0x75, 0x10, //       Report Size (16)
    0x95, 0x01, //       Report Count (1)
    0x81, 0x06, //       Input (Data, Variable, Relative)
    0xC0, //     End Collection (Logical)
    //
    //   - Feature padding (4 bits) -
    0x75, 0x04, //     Report Size (4)
    0x95, 0x01, //     Report Count (1)
    0xB1, 0x01, //     Feature (Constant)
    //
    0xC0, //   End Collection (Physical)
    0xC0, // End Collection (Application)
];
