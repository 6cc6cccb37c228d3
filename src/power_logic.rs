use embassy_time::{Duration, Instant};

use crate::transport::PowerState;

/// Reports may only reach the transport while the link is configured and running.
pub fn may_send(state: PowerState) -> bool {
    state == PowerState::ConfiguredActive
}

/// Decide whether local input should ask the host to resume the link.
///
/// Only meaningful actions (presses, non-zero deltas) wake the host, and
/// only once per suspend episode.
pub fn should_request_wake(state: PowerState, meaningful: bool, already_requested: bool) -> bool {
    state == PowerState::Suspended && meaningful && !already_requested
}

/// Whether a reconfiguration at `now` follows the deconfiguration at
/// `left_active_at` closely enough to count as a spurious host reset.
pub fn within_recovery_window(left_active_at: Instant, now: Instant, window: Duration) -> bool {
    now.saturating_duration_since(left_active_at) <= window
}

/// Power state implied by the USB bus flags.
pub fn usb_bus_state(configured: bool, suspended: bool) -> PowerState {
    match (suspended, configured) {
        (true, _) => PowerState::Suspended,
        (false, true) => PowerState::ConfiguredActive,
        (false, false) => PowerState::Unconfigured,
    }
}

/// Bus current available in `state`, in microamps.
///
/// USB 2.0: 100 mA until configured, the configuration's `max_power_ma`
/// once configured, 2.5 mA while suspended.
pub fn usb_granted_current_ua(state: PowerState, max_power_ma: u16) -> u32 {
    match state {
        PowerState::Unconfigured => 100_000,
        PowerState::ConfiguredActive => u32::from(max_power_ma) * 1_000,
        PowerState::Suspended => 2_500,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_link_sends() {
        assert!(may_send(PowerState::ConfiguredActive));
        assert!(!may_send(PowerState::Suspended));
        assert!(!may_send(PowerState::Unconfigured));
    }

    #[test]
    fn wake_needs_suspend_and_a_meaningful_event() {
        assert!(should_request_wake(PowerState::Suspended, true, false));
        assert!(!should_request_wake(PowerState::Suspended, false, false));
        assert!(!should_request_wake(PowerState::ConfiguredActive, true, false));
        assert!(!should_request_wake(PowerState::Unconfigured, true, false));
    }

    #[test]
    fn wake_requested_once_per_episode() {
        assert!(!should_request_wake(PowerState::Suspended, true, true));
    }

    #[test]
    fn recovery_window_is_inclusive() {
        let window = Duration::from_millis(20);
        let left = Instant::from_millis(1_000);
        assert!(within_recovery_window(left, Instant::from_millis(1_000), window));
        assert!(within_recovery_window(left, Instant::from_millis(1_020), window));
        assert!(!within_recovery_window(left, Instant::from_millis(1_021), window));
    }

    #[test]
    fn recovery_window_tolerates_clock_going_backwards() {
        let window = Duration::from_millis(20);
        assert!(within_recovery_window(
            Instant::from_millis(500),
            Instant::from_millis(400),
            window
        ));
    }

    #[test]
    fn suspend_overrides_configuration() {
        assert_eq!(usb_bus_state(true, true), PowerState::Suspended);
        assert_eq!(usb_bus_state(false, true), PowerState::Suspended);
        assert_eq!(usb_bus_state(true, false), PowerState::ConfiguredActive);
        assert_eq!(usb_bus_state(false, false), PowerState::Unconfigured);
    }

    #[test]
    fn granted_current_follows_bus_state() {
        assert_eq!(usb_granted_current_ua(PowerState::Unconfigured, 500), 100_000);
        assert_eq!(usb_granted_current_ua(PowerState::ConfiguredActive, 500), 500_000);
        assert_eq!(usb_granted_current_ua(PowerState::ConfiguredActive, 100), 100_000);
        assert_eq!(usb_granted_current_ua(PowerState::Suspended, 500), 2_500);
    }
}
