//! Power / suspend coordination.
//!
//! Tracks the transport power state and decides two things on behalf of
//! the control loop:
//! - whether local input should trigger a remote wakeup instead of a send
//! - whether feature state lost to a spurious host reset must be replayed
//!
//! Spurious reset heuristic: some hosts, right after resuming, reset and
//! reconfigure the device, which forgets host-set feature reports (the
//! scroll resolution multiplier) although the user never changed them.
//! A `ConfiguredActive → Unconfigured → ConfiguredActive` sequence within
//! the recovery window, without a host feature write in between, replays
//! the last accepted feature report. This is a best-effort workaround for
//! observed host behaviour, not a protocol guarantee; the window is a
//! runtime parameter.
//!
//! Only a drop out of `ConfiguredActive` opens the window. A reset that
//! arrives while suspended (`Suspended → Unconfigured → ConfiguredActive`)
//! is a plain re-enumeration and replays nothing; the host is expected to
//! renegotiate feature state itself.

use embassy_time::{Duration, Instant};

use crate::hid::FeatureSnapshot;
use crate::input::InputEvent;
use crate::power_logic;
use crate::transport::PowerState;

/// Power coordinator. Fed transport transitions with explicit timestamps.
pub struct PowerCoordinator {
    state: PowerState,
    recovery_window: Duration,
    /// A wakeup was already requested during the current suspend.
    wake_requested: bool,
    /// When the link last dropped from active to unconfigured.
    left_active_at: Option<Instant>,
    /// The host wrote feature state since `left_active_at`.
    renegotiated: bool,
    snapshot: Option<FeatureSnapshot>,
    pending_replay: bool,
}

impl PowerCoordinator {
    pub fn new(recovery_window: Duration) -> Self {
        Self {
            state: PowerState::Unconfigured,
            recovery_window,
            wake_requested: false,
            left_active_at: None,
            renegotiated: false,
            snapshot: None,
            pending_replay: false,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn recovery_window(&self) -> Duration {
        self.recovery_window
    }

    pub fn may_send(&self) -> bool {
        power_logic::may_send(self.state)
    }

    /// Apply a transport power transition observed at `now`.
    /// Returns `true` if the state changed.
    pub fn transition(&mut self, next: PowerState, now: Instant) -> bool {
        let prev = self.state;
        if prev == next {
            return false;
        }
        info!("Power: {} -> {}", prev, next);
        self.state = next;

        if prev == PowerState::Suspended {
            self.wake_requested = false;
        }

        match (prev, next) {
            (PowerState::ConfiguredActive, PowerState::Unconfigured) => {
                self.left_active_at = Some(now);
                self.renegotiated = false;
                self.pending_replay = false;
            }
            (PowerState::Unconfigured, PowerState::ConfiguredActive) => {
                if let Some(left) = self.left_active_at.take() {
                    self.arm_replay(left, now);
                }
            }
            (_, PowerState::Suspended) => {
                self.left_active_at = None;
            }
            _ => {}
        }
        true
    }

    fn arm_replay(&mut self, left: Instant, now: Instant) {
        if self.renegotiated || self.snapshot.is_none() {
            return;
        }
        if power_logic::within_recovery_window(left, now, self.recovery_window) {
            warn!(
                "spurious reset after {} ms, replaying feature state",
                now.saturating_duration_since(left).as_millis()
            );
            self.pending_replay = true;
        }
    }

    /// Input arrived. Returns `true` if the caller must issue a remote
    /// wakeup; at most once per suspend episode.
    pub fn on_input(&mut self, event: &InputEvent) -> bool {
        let wake = power_logic::should_request_wake(
            self.state,
            event.is_meaningful(),
            self.wake_requested,
        );
        if wake {
            self.wake_requested = true;
        }
        wake
    }

    /// The wakeup request issued for the current episode did not go out;
    /// the next meaningful input asks again.
    pub fn wake_failed(&mut self) {
        self.wake_requested = false;
    }

    /// The host wrote a feature report; `snapshot` is the value the
    /// application now holds.
    pub fn record_feature(&mut self, snapshot: Option<FeatureSnapshot>) {
        if self.left_active_at.is_some() || self.pending_replay {
            self.renegotiated = true;
            self.pending_replay = false;
        }
        if snapshot.is_some() {
            self.snapshot = snapshot;
        }
    }

    /// Last feature value accepted from the host.
    pub fn snapshot(&self) -> Option<&FeatureSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn replay_pending(&self) -> bool {
        self.pending_replay
    }

    /// Take the snapshot to replay, if a spurious reset was detected.
    pub fn take_replay(&mut self) -> Option<FeatureSnapshot> {
        if !core::mem::take(&mut self.pending_replay) {
            return None;
        }
        self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::ReportSelector;
    use crate::input::codes::KEY_0;

    const WINDOW: Duration = Duration::from_millis(20);

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn multiplier(value: u8) -> Option<FeatureSnapshot> {
        FeatureSnapshot::new(ReportSelector::feature(1), &[1, value])
    }

    fn active_with_snapshot() -> PowerCoordinator {
        let mut pc = PowerCoordinator::new(WINDOW);
        pc.transition(PowerState::ConfiguredActive, at(0));
        pc.record_feature(multiplier(0x05));
        pc
    }

    #[test]
    fn starts_unconfigured_and_gates_sends() {
        let mut pc = PowerCoordinator::new(WINDOW);
        assert_eq!(pc.state(), PowerState::Unconfigured);
        assert!(!pc.may_send());
        assert!(pc.transition(PowerState::ConfiguredActive, at(1)));
        assert!(pc.may_send());
        assert!(!pc.transition(PowerState::ConfiguredActive, at(2)));
    }

    #[test]
    fn wake_once_per_suspend_episode() {
        let mut pc = active_with_snapshot();
        let press = InputEvent::edge(KEY_0, true);
        let release = InputEvent::edge(KEY_0, false);

        assert!(!pc.on_input(&press));

        pc.transition(PowerState::Suspended, at(10));
        assert!(!pc.on_input(&release));
        assert!(pc.on_input(&press));
        assert!(!pc.on_input(&press));

        // A failed request re-arms within the same episode.
        pc.wake_failed();
        assert!(pc.on_input(&press));
        assert!(!pc.on_input(&press));

        // Resume, suspend again: a new episode.
        pc.transition(PowerState::ConfiguredActive, at(20));
        pc.transition(PowerState::Suspended, at(30));
        assert!(pc.on_input(&press));
    }

    #[test]
    fn spurious_reset_inside_window_replays() {
        let mut pc = active_with_snapshot();
        pc.transition(PowerState::Unconfigured, at(100));
        pc.transition(PowerState::ConfiguredActive, at(115));

        assert!(pc.replay_pending());
        assert_eq!(pc.take_replay(), multiplier(0x05));
        assert_eq!(pc.take_replay(), None);
    }

    #[test]
    fn reset_outside_window_does_not_replay() {
        let mut pc = active_with_snapshot();
        pc.transition(PowerState::Unconfigured, at(100));
        pc.transition(PowerState::ConfiguredActive, at(121));

        assert!(!pc.replay_pending());
        assert_eq!(pc.take_replay(), None);
        // The snapshot itself survives.
        assert_eq!(pc.snapshot().copied(), multiplier(0x05));
    }

    #[test]
    fn host_write_during_reset_cancels_replay() {
        let mut pc = active_with_snapshot();
        pc.transition(PowerState::Unconfigured, at(100));
        pc.record_feature(multiplier(0x00));
        pc.transition(PowerState::ConfiguredActive, at(105));

        assert!(!pc.replay_pending());
        assert_eq!(pc.snapshot().copied(), multiplier(0x00));
    }

    #[test]
    fn host_write_after_reconfigure_supersedes_pending_replay() {
        let mut pc = active_with_snapshot();
        pc.transition(PowerState::Unconfigured, at(100));
        pc.transition(PowerState::ConfiguredActive, at(105));
        pc.record_feature(multiplier(0x01));

        assert_eq!(pc.take_replay(), None);
    }

    #[test]
    fn suspend_between_drop_and_reconfigure_is_not_spurious() {
        let mut pc = active_with_snapshot();
        pc.transition(PowerState::Unconfigured, at(100));
        pc.transition(PowerState::Suspended, at(102));
        pc.transition(PowerState::Unconfigured, at(104));
        pc.transition(PowerState::ConfiguredActive, at(106));

        assert!(!pc.replay_pending());
    }

    #[test]
    fn reset_straight_out_of_suspend_is_not_spurious() {
        let mut pc = active_with_snapshot();
        pc.transition(PowerState::Suspended, at(50));
        pc.transition(PowerState::Unconfigured, at(100));
        pc.transition(PowerState::ConfiguredActive, at(105));

        assert!(!pc.replay_pending());
        assert_eq!(pc.take_replay(), None);
        assert_eq!(pc.snapshot().copied(), multiplier(0x05));
    }

    #[test]
    fn nothing_to_replay_without_snapshot() {
        let mut pc = PowerCoordinator::new(WINDOW);
        pc.transition(PowerState::ConfiguredActive, at(0));
        pc.transition(PowerState::Unconfigured, at(10));
        pc.transition(PowerState::ConfiguredActive, at(12));
        assert!(!pc.replay_pending());
    }

    // The window is a host-behaviour heuristic; widening it must widen
    // what counts as spurious.
    #[test]
    fn recovery_window_is_tunable() {
        let mut pc = PowerCoordinator::new(Duration::from_millis(200));
        pc.transition(PowerState::ConfiguredActive, at(0));
        pc.record_feature(multiplier(0x05));
        pc.transition(PowerState::Unconfigured, at(100));
        pc.transition(PowerState::ConfiguredActive, at(250));

        assert_eq!(pc.recovery_window(), Duration::from_millis(200));
        assert!(pc.replay_pending());
    }
}
