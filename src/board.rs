//! Board I/O: push buttons as an input event source, LEDs as indicators.
//!
//! Buttons are active-low with pull-up. Each button is handled by an async
//! task that waits for a GPIO edge, debounces it and posts a press or
//! release [`InputEvent`] without blocking.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Timer};
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::digital::Wait;

use crate::config::BUTTON_DEBOUNCE_MS;
use crate::hid::Indicators;
use crate::input::{EventChannel, InputCode, InputEvent};

/// Run a single button loop forever, posting edges for `code`.
pub async fn button_task<P, M, const N: usize>(
    mut pin: P,
    code: InputCode,
    events: &EventChannel<M, N>,
) -> !
where
    P: InputPin + Wait,
    M: RawMutex,
{
    let debounce = Duration::from_millis(BUTTON_DEBOUNCE_MS);

    loop {
        // Wait for falling edge (button press, active-low).
        if pin.wait_for_falling_edge().await.is_err() {
            warn!("button {}: edge wait failed", code);
            Timer::after(debounce).await;
            continue;
        }

        Timer::after(debounce).await;
        if !pin.is_low().unwrap_or(false) {
            continue;
        }

        debug!("button {} pressed", code);
        // Drops are counted by the channel.
        let _ = events.post(InputEvent::edge(code, true));

        let _ = pin.wait_for_rising_edge().await;
        Timer::after(debounce).await;
        let _ = events.post(InputEvent::edge(code, false));
    }
}

/// LEDs driven by host-written reports.
pub struct BoardLeds<P: OutputPin, const N: usize> {
    pins: [P; N],
    active_low: bool,
}

impl<P: OutputPin, const N: usize> BoardLeds<P, N> {
    /// Take `pins`; all LEDs start off.
    pub fn new(pins: [P; N], active_low: bool) -> Self {
        let mut leds = Self { pins, active_low };
        for index in 0..N {
            leds.drive(index, false);
        }
        leds
    }

    fn drive(&mut self, index: usize, on: bool) {
        let Some(pin) = self.pins.get_mut(index) else {
            return;
        };
        let high = on != self.active_low;
        let result = if high { pin.set_high() } else { pin.set_low() };
        if result.is_err() {
            warn!("LED {} write failed", index);
        }
    }
}

impl<P: OutputPin, const N: usize> Indicators for BoardLeds<P, N> {
    fn set_indicator(&mut self, index: u8, on: bool) {
        self.drive(usize::from(index), on);
    }
}
