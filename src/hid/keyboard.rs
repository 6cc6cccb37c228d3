//! HID keyboard application - key bit-set input, LED output.
//!
//! Report protocol layout (30 bytes, no report ID):
//! ```text
//! Byte 0:     Modifier keys (bitfield, usages 0xE0..=0xE7)
//!             Bit 0 = Left Ctrl,  Bit 1 = Left Shift,
//!             Bit 2 = Left Alt,   Bit 3 = Left GUI,
//!             Bit 4 = Right Ctrl, Bit 5 = Right Shift,
//!             Bit 6 = Right Alt,  Bit 7 = Right GUI
//! Byte 1:     Reserved (0x00)
//! Byte 2-29:  One bit per key usage 0x00..=0xDF (N-key rollover)
//! ```
//!
//! Boot protocol layout (8 bytes):
//! ```text
//! Byte 0:   Modifier keys
//! Byte 1:   Reserved (0x00)
//! Byte 2-7: Up to 6 pressed key usages, 0x01 in every slot on overflow
//! ```
//!
//! Output report (1 byte): LED bitfield, Num/Caps/Scroll/Compose/Kana.

use crate::error::{Error, Result};
use crate::hid::{HidApplication, Indicators, ProtocolMode, ReportSelector, ReportType};
use crate::input::{codes, InputCode, InputEvent};
use crate::transport::Transport;

/// Bytes in the key bit-set (usages 0x00..=0xDF).
const KEY_BITMAP_BYTES: usize = 28;

/// First modifier usage; 0xE0..=0xE7 live in the modifier byte.
const FIRST_MODIFIER: u8 = 0xE0;

/// Report protocol keyboard report size in bytes.
pub const KEYBOARD_REPORT_SIZE: usize = 2 + KEY_BITMAP_BYTES;

/// Boot protocol keyboard report size in bytes.
pub const KEYBOARD_BOOT_REPORT_SIZE: usize = 8;

/// LED output report size in bytes.
pub const LED_REPORT_SIZE: usize = 1;

/// Indicator driven by the Caps Lock LED bit.
pub const CAPS_LOCK_INDICATOR: u8 = 0;

/// Keyboard/Keypad page usages used by the demos.
pub mod usage {
    pub const ERROR_ROLLOVER: u8 = 0x01;
    pub const A: u8 = 0x04;
    pub const ENTER: u8 = 0x28;
    pub const CAPS_LOCK: u8 = 0x39;
    pub const F1: u8 = 0x3A;
    pub const LEFT_CTRL: u8 = 0xE0;
    pub const LEFT_SHIFT: u8 = 0xE1;
    pub const RIGHT_GUI: u8 = 0xE7;
}

/// Input code → key usage table.
pub type Keymap = &'static [(InputCode, u8)];

/// Demo board mapping.
pub const DEFAULT_KEYMAP: Keymap = &[
    (codes::KEY_0, usage::CAPS_LOCK),
    (codes::KEY_A, usage::A),
    (codes::KEY_1, usage::ENTER),
    (codes::KEY_2, usage::F1),
];

/// Pressed-key state: one bit per usage.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeysReport {
    /// Modifier key bitfield.
    pub modifiers: u8,
    keys: [u8; KEY_BITMAP_BYTES],
}

impl KeysReport {
    /// All keys released.
    pub const fn empty() -> Self {
        Self {
            modifiers: 0,
            keys: [0; KEY_BITMAP_BYTES],
        }
    }

    /// Set or clear the bit for `usage`. Returns `true` if it changed.
    /// Usages above Right GUI have no bit and are ignored.
    pub fn set(&mut self, usage: u8, pressed: bool) -> bool {
        let (byte, mask) = match Self::locate(usage) {
            Some(slot) => slot,
            None => return false,
        };
        let before = *byte_ref(self, byte);
        let slot = byte_ref(self, byte);
        if pressed {
            *slot |= mask;
        } else {
            *slot &= !mask;
        }
        *slot != before
    }

    pub fn is_pressed(&self, usage: u8) -> bool {
        match Self::locate(usage) {
            Some((None, mask)) => self.modifiers & mask != 0,
            Some((Some(index), mask)) => self.keys[index] & mask != 0,
            None => false,
        }
    }

    /// Returns `true` if no keys (modifiers included) are pressed.
    pub fn is_empty(&self) -> bool {
        self.modifiers == 0 && self.keys.iter().all(|&k| k == 0)
    }

    /// Pressed non-modifier usages, ascending.
    pub fn pressed(&self) -> impl Iterator<Item = u8> + '_ {
        (0..FIRST_MODIFIER).filter(move |&u| self.is_pressed(u))
    }

    /// Serialise for `mode` into `buf`.
    /// Returns the number of bytes written, 0 if `buf` is too small.
    pub fn serialize(&self, mode: ProtocolMode, buf: &mut [u8]) -> usize {
        match mode {
            ProtocolMode::Report => {
                if buf.len() < KEYBOARD_REPORT_SIZE {
                    return 0;
                }
                buf[0] = self.modifiers;
                buf[1] = 0;
                buf[2..KEYBOARD_REPORT_SIZE].copy_from_slice(&self.keys);
                KEYBOARD_REPORT_SIZE
            }
            ProtocolMode::Boot => {
                if buf.len() < KEYBOARD_BOOT_REPORT_SIZE {
                    return 0;
                }
                buf[0] = self.modifiers;
                buf[1] = 0;
                buf[2..KEYBOARD_BOOT_REPORT_SIZE].fill(0);
                if self.pressed().count() > KEYBOARD_BOOT_REPORT_SIZE - 2 {
                    buf[2..KEYBOARD_BOOT_REPORT_SIZE].fill(usage::ERROR_ROLLOVER);
                } else {
                    for (slot, key) in buf[2..KEYBOARD_BOOT_REPORT_SIZE]
                        .iter_mut()
                        .zip(self.pressed())
                    {
                        *slot = key;
                    }
                }
                KEYBOARD_BOOT_REPORT_SIZE
            }
        }
    }

    /// `(None, mask)` for modifiers, `(Some(index), mask)` for keys.
    fn locate(usage: u8) -> Option<(Option<usize>, u8)> {
        if usage >= FIRST_MODIFIER {
            let bit = usage - FIRST_MODIFIER;
            return (bit < 8).then(|| (None, 1u8 << bit));
        }
        Some((Some(usize::from(usage / 8)), 1u8 << (usage % 8)))
    }
}

fn byte_ref(report: &mut KeysReport, index: Option<usize>) -> &mut u8 {
    match index {
        None => &mut report.modifiers,
        Some(i) => &mut report.keys[i],
    }
}

/// Keyboard LED output report.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LedReport {
    pub leds: u8,
}

impl LedReport {
    pub const NUM_LOCK: u8 = 0x01;
    pub const CAPS_LOCK: u8 = 0x02;
    pub const SCROLL_LOCK: u8 = 0x04;
    pub const COMPOSE: u8 = 0x08;
    pub const KANA: u8 = 0x10;

    /// Parse a host write. Padding bits are discarded.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        match data {
            [leds] => Some(Self { leds: leds & 0x1F }),
            _ => None,
        }
    }

    pub fn caps_lock(&self) -> bool {
        self.leds & Self::CAPS_LOCK != 0
    }
}

/// Keyboard application: owns the key and LED buffers.
pub struct KeyboardApp<I: Indicators> {
    keys: KeysReport,
    leds: LedReport,
    keymap: Keymap,
    indicators: I,
    protocol: Option<ProtocolMode>,
}

impl<I: Indicators> KeyboardApp<I> {
    pub const LED_SELECTOR: ReportSelector = ReportSelector::output(0);
    pub const KEYS_SELECTOR: ReportSelector = ReportSelector::input(0);

    pub fn new(keymap: Keymap, indicators: I) -> Self {
        Self {
            keys: KeysReport::empty(),
            leds: LedReport::default(),
            keymap,
            indicators,
            protocol: None,
        }
    }

    /// Press or release `usage` and submit the whole key set.
    pub fn send_key(&mut self, usage: u8, pressed: bool, link: &mut dyn Transport) -> Result<()> {
        self.keys.set(usage, pressed);
        self.send_input(link)
    }

    pub fn keys(&self) -> &KeysReport {
        &self.keys
    }

    pub fn leds(&self) -> LedReport {
        self.leds
    }

    pub fn indicators(&self) -> &I {
        &self.indicators
    }

    fn usage_for(&self, code: InputCode) -> Option<u8> {
        self.keymap
            .iter()
            .find_map(|&(c, usage)| (c == code).then_some(usage))
    }
}

impl<I: Indicators> HidApplication for KeyboardApp<I> {
    fn start(&mut self, mode: ProtocolMode, link: &mut dyn Transport) {
        if self.protocol != Some(mode) {
            info!("HID keyboard start with protocol {}", mode);
        }
        self.protocol = Some(mode);
        link.receive_report(Self::LED_SELECTOR);
    }

    fn stop(&mut self) {
        if self.protocol.take().is_some() {
            info!("HID keyboard stop");
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
        if ty != ReportType::Output {
            return Err(Error::UnknownReport);
        }

        let result = match LedReport::from_bytes(data) {
            Some(report) => {
                self.leds = report;
                Ok(())
            }
            None => {
                warn!("LED report with bad length {}", data.len());
                self.leds = LedReport::default();
                Err(Error::InvalidReportLength {
                    expected: LED_REPORT_SIZE as u8,
                    actual: data.len().min(u8::MAX as usize) as u8,
                })
            }
        };

        self.indicators
            .set_indicator(CAPS_LOCK_INDICATOR, self.leds.caps_lock());
        debug!("LEDs report: {=u8:x}", self.leds.leds);
        link.receive_report(Self::LED_SELECTOR);
        result
    }

    fn on_report_request(&self, selector: ReportSelector, buf: &mut [u8]) -> Option<usize> {
        if selector == Self::KEYS_SELECTOR {
            let len = self
                .keys
                .serialize(self.protocol.unwrap_or(ProtocolMode::Report), buf);
            return (len > 0).then_some(len);
        }
        if selector == Self::LED_SELECTOR {
            let slot = buf.first_mut()?;
            *slot = self.leds.leds;
            return Some(LED_REPORT_SIZE);
        }
        None
    }

    fn apply_input(&mut self, event: InputEvent) -> bool {
        match self.usage_for(event.code) {
            Some(usage) => self.keys.set(usage, event.value != 0),
            None => false,
        }
    }

    fn input_report(&self, buf: &mut [u8]) -> usize {
        self.keys
            .serialize(self.protocol.unwrap_or(ProtocolMode::Report), buf)
    }
}

// USB HID report descriptor for an N-key-rollover keyboard

/// USB HID Report Descriptor for the keyboard.
///
/// This descriptor tells the host that we are a keyboard with:
///   - 8 modifier key bits (input)
///   - 1 reserved byte
///   - 5 LED indicators (output)
///   - 224 key bits, one per usage 0x00..=0xDF (input)
pub const KEYBOARD_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    //
    //   - Modifier keys (8 bits) -
    0x05, 0x07, //   Usage Page (Keyboard/Keypad)
    0x19, 0xE0, //   Usage Minimum (Left Control)
    0x29, 0xE7, //   Usage Maximum (Right GUI)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    //
    //   - Reserved byte -
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Constant) - padding
    //
    //   - LED output (5 bits + 3 padding) -
    0x05, 0x08, //   Usage Page (LEDs)
    0x19, 0x01, //   Usage Minimum (Num Lock)
    0x29, 0x05, //   Usage Maximum (Kana)
    0x95, 0x05, //   Report Count (5)
    0x75, 0x01, //   Report Size (1)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x03, //   Report Size (3)
    0x91, 0x01, //   Output (Constant) - padding
    //
    //   - Key bitmap (224 bits) -
    0x05, 0x07, //   Usage Page (Keyboard/Keypad)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0xDF, //   Usage Maximum (0xDF)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0xE0, //   Report Count (224)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    //
    0xC0, // End Collection
];
