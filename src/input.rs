//! Input events and the bounded event channel.
//!
//! Input sources (GPIO edges, pointer sensors) run in interrupt-like
//! contexts and must never block. They [`post`](EventChannel::post) events
//! into a small fixed-capacity queue; the single control loop drains it.
//! When the queue is full the event is dropped and counted.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{with_timeout, Duration};

use crate::error::{Error, Result};

/// Relative axes a pointer source can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Axis {
    X,
    Y,
    Wheel,
    HWheel,
}

/// Identifier of the physical source of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputCode {
    /// A key or push button, numbered like the platform input subsystem.
    Key(u16),
    /// A pointer button, 1-based.
    Button(u8),
    /// A relative axis; the event value is a signed delta.
    Rel(Axis),
}

/// Well-known input codes used by the demos.
pub mod codes {
    use super::{Axis, InputCode};

    pub const KEY_0: InputCode = InputCode::Key(11);
    pub const KEY_1: InputCode = InputCode::Key(2);
    pub const KEY_2: InputCode = InputCode::Key(3);
    pub const KEY_3: InputCode = InputCode::Key(4);
    pub const KEY_A: InputCode = InputCode::Key(30);
    pub const KEY_ENTER: InputCode = InputCode::Key(28);

    pub const BTN_LEFT: InputCode = InputCode::Button(1);
    pub const BTN_RIGHT: InputCode = InputCode::Button(2);
    pub const BTN_MIDDLE: InputCode = InputCode::Button(3);

    pub const REL_X: InputCode = InputCode::Rel(Axis::X);
    pub const REL_Y: InputCode = InputCode::Rel(Axis::Y);
    pub const REL_WHEEL: InputCode = InputCode::Rel(Axis::Wheel);
    pub const REL_HWHEEL: InputCode = InputCode::Rel(Axis::HWheel);
}

/// One physical action: a key/button edge (value 0 or 1) or a signed delta.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InputEvent {
    pub code: InputCode,
    pub value: i32,
}

impl InputEvent {
    pub const fn new(code: InputCode, value: i32) -> Self {
        Self { code, value }
    }

    /// Key or button edge helper.
    pub const fn edge(code: InputCode, pressed: bool) -> Self {
        Self {
            code,
            value: pressed as i32,
        }
    }

    /// A press or a non-zero delta. Releases are not user actions worth
    /// waking the host for.
    pub const fn is_meaningful(&self) -> bool {
        self.value != 0
    }
}

/// Bounded FIFO between input producers and the control loop.
///
/// `M` selects the mutex flavour; use `CriticalSectionRawMutex` when
/// producers run in interrupt context.
pub struct EventChannel<M: RawMutex, const N: usize> {
    queue: Channel<M, InputEvent, N>,
    dropped: AtomicU32,
}

impl<M: RawMutex, const N: usize> EventChannel<M, N> {
    pub const fn new() -> Self {
        Self {
            queue: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Enqueue without blocking. A full queue drops the event.
    pub fn post(&self, event: InputEvent) -> Result<()> {
        self.queue.try_send(event).map_err(|_| {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("input queue full - dropped {} event(s)", dropped);
            Error::QueueFull
        })
    }

    /// Wait until an event is available.
    pub async fn get(&self) -> InputEvent {
        self.queue.receive().await
    }

    /// Wait at most `timeout`. `None` means the wait timed out.
    pub async fn try_get_for(&self, timeout: Duration) -> Option<InputEvent> {
        with_timeout(timeout, self.queue.receive()).await.ok()
    }

    /// Take an event if one is already queued.
    pub fn try_get(&self) -> Option<InputEvent> {
        self.queue.try_receive().ok()
    }

    /// Events dropped because the queue was full, since construction.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<M: RawMutex, const N: usize> Default for EventChannel<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::codes::*;
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    type TestChannel = EventChannel<CriticalSectionRawMutex, 2>;

    #[test]
    fn delivers_in_post_order() {
        let ch = TestChannel::new();
        ch.post(InputEvent::edge(KEY_A, true)).unwrap();
        ch.post(InputEvent::edge(KEY_A, false)).unwrap();

        assert_eq!(ch.try_get(), Some(InputEvent::new(KEY_A, 1)));
        assert_eq!(ch.try_get(), Some(InputEvent::new(KEY_A, 0)));
        assert_eq!(ch.try_get(), None);
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let ch = TestChannel::new();
        ch.post(InputEvent::edge(KEY_0, true)).unwrap();
        ch.post(InputEvent::edge(KEY_0, false)).unwrap();

        assert_eq!(ch.post(InputEvent::edge(KEY_1, true)), Err(Error::QueueFull));
        assert_eq!(ch.post(InputEvent::edge(KEY_1, false)), Err(Error::QueueFull));
        assert_eq!(ch.dropped(), 2);

        // The queued events are untouched by the drops.
        assert_eq!(ch.try_get(), Some(InputEvent::new(KEY_0, 1)));
        assert_eq!(ch.try_get(), Some(InputEvent::new(KEY_0, 0)));
    }

    #[test]
    fn room_frees_up_after_consume() {
        let ch = TestChannel::new();
        ch.post(InputEvent::edge(KEY_0, true)).unwrap();
        ch.post(InputEvent::edge(KEY_0, false)).unwrap();
        assert_eq!(ch.len(), 2);

        let _ = ch.try_get();
        assert!(ch.post(InputEvent::edge(KEY_1, true)).is_ok());
        assert_eq!(ch.dropped(), 0);
    }

    #[test]
    fn blocking_get_returns_queued_event() {
        let ch = TestChannel::new();
        ch.post(InputEvent::new(REL_X, -3)).unwrap();
        let ev = embassy_futures::block_on(ch.get());
        assert_eq!(ev, InputEvent::new(REL_X, -3));
        assert!(ch.is_empty());
    }

    #[test]
    fn zero_value_is_not_meaningful() {
        assert!(InputEvent::edge(KEY_A, true).is_meaningful());
        assert!(!InputEvent::edge(KEY_A, false).is_meaningful());
        assert!(InputEvent::new(REL_WHEEL, -1).is_meaningful());
    }
}
