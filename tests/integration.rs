//! Integration tests for hidbridge host-testable logic.
//!
//! Drive whole bridges (event channel → control loop → HID application →
//! transport) through the public API only.

use core::cell::RefCell;

use embassy_futures::block_on;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant, Timer};

use hidbridge::config::BridgeConfig;
use hidbridge::hid::keyboard::{usage, KeyboardApp, DEFAULT_KEYMAP};
use hidbridge::hid::mouse::{MouseApp, ResolutionMultiplier};
use hidbridge::hid::Indicators;
use hidbridge::input::codes::*;
use hidbridge::pairing::{OperatorCommand, PairingQueue, PairingReply};
use hidbridge::{
    run_control_loop, ControlLoop, Error, EventChannel, InputEvent, PowerState, ProtocolMode,
    ReportSelector, ReportType, Result, Transport,
};

// ═══════════════════════════════════════════════════════════════════════════
// Test doubles
// ═══════════════════════════════════════════════════════════════════════════

/// Transport that records everything the bridge asks of it.
#[derive(Default)]
struct FakeLink {
    sent: Vec<Vec<u8>>,
    armed: Vec<ReportSelector>,
    power: PowerState,
    wakeups: u32,
}

impl Transport for FakeLink {
    fn send_report(&mut self, report: &[u8]) -> Result<()> {
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
        Ok(())
    }

    fn granted_current_ua(&self) -> Option<u32> {
        Some(500_000)
    }
}

#[derive(Default)]
struct Leds([bool; 2]);

impl Indicators for Leds {
    fn set_indicator(&mut self, index: u8, on: bool) {
        self.0[usize::from(index)] = on;
    }
}

type KeyboardBridge = ControlLoop<KeyboardApp<Leds>, FakeLink>;
type MouseBridge = ControlLoop<MouseApp<Leds>, FakeLink>;

fn at(ms: u64) -> Instant {
    Instant::from_millis(ms)
}

fn connected<A: hidbridge::HidApplication>(app: A) -> ControlLoop<A, FakeLink> {
    let link = FakeLink {
        power: PowerState::ConfiguredActive,
        ..FakeLink::default()
    };
    let mut bridge = ControlLoop::new(app, link, BridgeConfig::default());
    bridge.on_power(PowerState::ConfiguredActive, at(0));
    bridge.start(ProtocolMode::Report);
    bridge
}

fn keyboard_bridge() -> KeyboardBridge {
    connected(KeyboardApp::new(DEFAULT_KEYMAP, Leds::default()))
}

fn mouse_bridge() -> MouseBridge {
    connected(MouseApp::new(Leds::default()))
}

/// Feed `events` through a real event channel into `bridge`.
fn drain<A: hidbridge::HidApplication>(bridge: &mut ControlLoop<A, FakeLink>, events: &[InputEvent]) {
    let channel: EventChannel<CriticalSectionRawMutex, 2> = EventChannel::new();
    for &event in events {
        channel.post(event).unwrap();
        while let Some(event) = channel.try_get() {
            let _ = bridge.on_input(event);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Keyboard
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn key_press_and_release_send_exactly_two_reports() {
    let mut bridge = keyboard_bridge();
    drain(
        &mut bridge,
        &[InputEvent::new(KEY_A, 1), InputEvent::new(KEY_A, 0)],
    );

    let sent = &bridge.transport().sent;
    assert_eq!(sent.len(), 2);
    // Usage 0x04 → bitmap byte 0, bit 4.
    assert_eq!(sent[0][2], 0x10);
    assert!(sent[1].iter().all(|&b| b == 0));
}

#[test]
fn events_apply_in_order() {
    let mut bridge = keyboard_bridge();
    drain(
        &mut bridge,
        &[
            InputEvent::edge(KEY_A, true),
            InputEvent::edge(KEY_1, true),
            InputEvent::edge(KEY_A, false),
        ],
    );

    let sent = &bridge.transport().sent;
    assert_eq!(sent.len(), 3);
    let enter_byte = 2 + usize::from(usage::ENTER / 8);
    let enter_bit = 1u8 << (usage::ENTER % 8);
    assert_eq!(sent[1][2], 0x10);
    assert_eq!(sent[1][enter_byte] & enter_bit, enter_bit);
    assert_eq!(sent[2][2], 0x00);
    assert_eq!(sent[2][enter_byte] & enter_bit, enter_bit);
}

#[test]
fn double_start_keeps_state_and_accepts_writes() {
    let mut bridge = keyboard_bridge();
    drain(&mut bridge, &[InputEvent::edge(KEY_A, true)]);

    bridge.start(ProtocolMode::Report);
    bridge
        .on_output_report(ReportType::Output, &[0x02])
        .unwrap();

    assert!(bridge.app().keys().is_pressed(usage::A));
    assert!(bridge.app().indicators().0[0]);
    assert_eq!(bridge.transport().sent.len(), 1);
}

#[test]
fn led_report_round_trips_through_get_report() {
    let mut bridge = keyboard_bridge();
    bridge
        .on_output_report(ReportType::Output, &[0x03])
        .unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(bridge.on_report_request(ReportSelector::output(0), &mut buf), Some(1));
    assert_eq!(buf[0], 0x03);
}

#[test]
fn unknown_get_report_gets_no_answer() {
    let bridge = keyboard_bridge();
    let mut buf = [0xAAu8; 8];
    assert_eq!(bridge.on_report_request(ReportSelector::feature(9), &mut buf), None);
    assert_eq!(buf, [0xAA; 8]);
}

#[test]
fn boot_protocol_uses_six_key_layout() {
    let mut bridge = connected(KeyboardApp::new(DEFAULT_KEYMAP, Leds::default()));
    bridge.stop();
    bridge.start(ProtocolMode::Boot);
    drain(&mut bridge, &[InputEvent::edge(KEY_A, true)]);

    assert_eq!(
        bridge.transport().sent.last().unwrap(),
        &vec![0, 0, usage::A, 0, 0, 0, 0, 0]
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Mouse
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn relative_motion_is_not_retransmitted() {
    let mut bridge = mouse_bridge();
    drain(&mut bridge, &[InputEvent::new(REL_X, 1)]);
    bridge.on_idle().unwrap();
    bridge.on_idle().unwrap();

    let sent = &bridge.transport().sent;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][2], 1);
}

#[test]
fn emulated_motion_stops_with_release() {
    let mut bridge = mouse_bridge();
    drain(
        &mut bridge,
        &[InputEvent::edge(KEY_3, true), InputEvent::edge(KEY_1, true)],
    );
    bridge.on_idle().unwrap();
    drain(&mut bridge, &[InputEvent::edge(KEY_1, false)]);
    bridge.on_idle().unwrap();
    bridge.on_idle().unwrap();

    let sent = &bridge.transport().sent;
    // press, one resend, release; no zero report beyond the release.
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[1][2], 1);
    assert_eq!(sent[2][2], 0);
}

#[test]
fn multiplier_round_trips_through_get_report() {
    let mut bridge = mouse_bridge();
    bridge
        .on_output_report(ReportType::Feature, &[1, 0x05])
        .unwrap();

    let mut buf = [0u8; 8];
    let len = bridge
        .on_report_request(ResolutionMultiplier::SELECTOR, &mut buf)
        .unwrap();
    assert_eq!(&buf[..len], &[1, 0x05]);
    assert_eq!(bridge.poll_interval(), Some(Duration::from_millis(10)));
}

#[test]
fn short_multiplier_write_falls_back_to_no_multiplier() {
    let mut bridge = mouse_bridge();
    bridge
        .on_output_report(ReportType::Feature, &[1, 0x05])
        .unwrap();

    assert!(matches!(
        bridge.on_output_report(ReportType::Feature, &[1]),
        Err(Error::InvalidReportLength { .. })
    ));
    assert!(!bridge.app().multiplier().high_resolution());
    assert_eq!(bridge.power().snapshot().unwrap().as_bytes(), &[1, 0]);
    assert!(!bridge.app().indicators().0[0]);
}

// ═══════════════════════════════════════════════════════════════════════════
// Power / suspend
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn suspended_bridge_sends_nothing_and_wakes_once() {
    let mut bridge = keyboard_bridge();
    bridge.on_power(PowerState::Suspended, at(100));

    drain(
        &mut bridge,
        &[
            InputEvent::edge(KEY_A, true),
            InputEvent::edge(KEY_A, false),
            InputEvent::edge(KEY_1, true),
        ],
    );

    assert!(bridge.transport().sent.is_empty());
    assert_eq!(bridge.transport().wakeups, 1);

    // Resume delivers the net state once.
    bridge.on_power(PowerState::ConfiguredActive, at(200));
    assert_eq!(bridge.transport().sent.len(), 1);

    // Next episode wakes again.
    bridge.on_power(PowerState::Suspended, at(300));
    drain(&mut bridge, &[InputEvent::edge(KEY_2, true)]);
    assert_eq!(bridge.transport().wakeups, 2);
}

/// The recovery window is a host-behaviour heuristic (20 ms by default),
/// not a protocol guarantee.
#[test]
fn spurious_reset_within_window_replays_multiplier() {
    let mut bridge = mouse_bridge();
    bridge
        .on_output_report(ReportType::Feature, &[1, 0x05])
        .unwrap();

    bridge.on_power(PowerState::Unconfigured, at(5_000));
    bridge.stop();
    bridge.on_power(PowerState::ConfiguredActive, at(5_015));
    bridge.start(ProtocolMode::Report);

    assert_eq!(bridge.app().multiplier().resolutions, 0x05);
    assert!(bridge.app().indicators().0[0]);
}

#[test]
fn reset_outside_window_keeps_host_default() {
    let mut bridge = mouse_bridge();
    bridge
        .on_output_report(ReportType::Feature, &[1, 0x05])
        .unwrap();

    bridge.on_power(PowerState::Unconfigured, at(5_000));
    bridge.stop();
    bridge.on_power(PowerState::ConfiguredActive, at(5_500));
    bridge.start(ProtocolMode::Report);

    assert!(!bridge.app().multiplier().high_resolution());
    assert!(!bridge.app().indicators().0[0]);
}

#[test]
fn wider_window_catches_slower_hosts() {
    let config = BridgeConfig {
        recovery_window: Duration::from_millis(1_000),
        ..BridgeConfig::default()
    };
    let link = FakeLink {
        power: PowerState::ConfiguredActive,
        ..FakeLink::default()
    };
    let mut bridge = ControlLoop::new(MouseApp::new(Leds::default()), link, config);
    bridge.on_power(PowerState::ConfiguredActive, at(0));
    bridge.start(ProtocolMode::Report);
    bridge
        .on_output_report(ReportType::Feature, &[1, 0x01])
        .unwrap();

    bridge.on_power(PowerState::Unconfigured, at(5_000));
    bridge.stop();
    bridge.on_power(PowerState::ConfiguredActive, at(5_500));
    bridge.start(ProtocolMode::Report);

    assert_eq!(bridge.app().multiplier().resolutions, 0x01);
}

// ═══════════════════════════════════════════════════════════════════════════
// Pairing
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn operator_passkey_completes_pending_pairing() {
    let mut queue: PairingQueue<u16, 2> = PairingQueue::new();
    queue.request(4, 0xBEEF, at(0)).unwrap();

    let reply = match OperatorCommand::parse("passkey 000123").unwrap() {
        OperatorCommand::Passkey(value) => queue.reply(value),
        other => panic!("unexpected command {other:?}"),
    };
    assert_eq!(
        reply,
        Some(PairingReply::Passkey {
            connection: 4,
            passkey: 123,
            token: 0xBEEF
        })
    );
}

#[test]
fn second_request_rejected_and_cancel_reply_cancels() {
    let mut queue: PairingQueue<u16, 2> = PairingQueue::new();
    queue.request(4, 1, at(0)).unwrap();
    assert_eq!(queue.request(4, 2, at(1)), Err(Error::PairingSlotOccupied));

    assert_eq!(
        queue.reply(-1),
        Some(PairingReply::Cancel {
            connection: 4,
            token: 1
        })
    );
    assert_eq!(queue.reply(-1), None);
}

#[test]
fn failed_pairing_releases_stale_head() {
    let mut queue: PairingQueue<u16, 2> = PairingQueue::new();
    queue.request(4, 1, at(0)).unwrap();
    assert_eq!(queue.on_failed(4, 0x85), Some(1));
    assert_eq!(queue.reply(123_456), None);
}

// ═══════════════════════════════════════════════════════════════════════════
// Async control loop
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn control_loop_task_drains_channel() {
    static EVENTS: EventChannel<CriticalSectionRawMutex, 2> = EventChannel::new();
    let ctx: Mutex<CriticalSectionRawMutex, _> = Mutex::new(RefCell::new(keyboard_bridge()));

    EVENTS.post(InputEvent::edge(KEY_A, true)).unwrap();
    EVENTS.post(InputEvent::edge(KEY_A, false)).unwrap();

    let outcome = block_on(select(
        run_control_loop(&ctx, &EVENTS),
        Timer::after(Duration::from_millis(50)),
    ));
    assert!(matches!(outcome, Either::Second(())));

    ctx.lock(|bridge| {
        let bridge = bridge.borrow();
        assert_eq!(bridge.transport().sent.len(), 2);
        assert!(EVENTS.is_empty());
    });
}
