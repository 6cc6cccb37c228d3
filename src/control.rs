//! The control loop: sole consumer of the event channel.
//!
//! [`ControlLoop`] owns one HID application, its transport and the power
//! coordinator. Every mutation of report state goes through it, either
//! from [`run_control_loop`] or from transport callbacks that lock the same
//! [`Mutex`]. The lock is never held across an await point.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant};

use crate::config::{BridgeConfig, MAX_INPUT_REPORT};
use crate::error::{Error, Result};
use crate::hid::{HidApplication, PollRate, ProtocolMode, ReportSelector, ReportType};
use crate::input::{EventChannel, InputEvent};
use crate::power::PowerCoordinator;
use crate::transport::{PowerState, Transport};

/// Bridge context for one HID application on one transport.
pub struct ControlLoop<A: HidApplication, T: Transport> {
    app: A,
    transport: T,
    power: PowerCoordinator,
    config: BridgeConfig,
    /// Bytes of the last report that reached the transport.
    last_sent: heapless::Vec<u8, MAX_INPUT_REPORT>,
    /// A send was deferred while the link could not take it.
    pending_flush: bool,
}

impl<A: HidApplication, T: Transport> ControlLoop<A, T> {
    pub fn new(app: A, transport: T, config: BridgeConfig) -> Self {
        Self {
            app,
            transport,
            power: PowerCoordinator::new(config.recovery_window),
            config,
            last_sent: heapless::Vec::new(),
            pending_flush: false,
        }
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn power(&self) -> &PowerCoordinator {
        &self.power
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// A connection started with `mode`.
    pub fn start(&mut self, mode: ProtocolMode) {
        if !self.app.is_started() {
            self.last_sent.clear();
        }
        self.app.start(mode, &mut self.transport);
        self.apply_replay();
        self.flush();
    }

    /// The connection ended.
    pub fn stop(&mut self) {
        self.app.stop();
        self.pending_flush = false;
        self.last_sent.clear();
    }

    /// The transport reported `state` at `now`.
    pub fn on_power(&mut self, state: PowerState, now: Instant) {
        if !self.power.transition(state, now) {
            return;
        }
        match self.transport.granted_current_ua() {
            Some(ua) => info!(
                "configured: {}, granted current: {}uA",
                self.transport.configured(),
                ua
            ),
            None => info!("configured: {}", self.transport.configured()),
        }
        if state == PowerState::ConfiguredActive {
            self.apply_replay();
            self.flush();
        }
    }

    /// Pull the power state from the transport.
    pub fn sync_power(&mut self, now: Instant) {
        let state = self.transport.power_state();
        self.on_power(state, now);
    }

    /// The host wrote an output or feature report.
    pub fn on_output_report(&mut self, ty: ReportType, data: &[u8]) -> Result<()> {
        let result = self.app.on_output_report(ty, data, &mut self.transport);
        let applied = !matches!(result, Err(Error::UnknownReport));
        if ty == ReportType::Feature && applied {
            self.power.record_feature(self.app.feature_snapshot());
        }
        result
    }

    /// The host polled a report.
    pub fn on_report_request(&self, selector: ReportSelector, buf: &mut [u8]) -> Option<usize> {
        let len = self.app.on_report_request(selector, buf);
        if len.is_none() {
            debug!("GET_REPORT for unknown selector {}", selector);
        }
        len
    }

    /// Handle one input event.
    pub fn on_input(&mut self, event: InputEvent) -> Result<()> {
        if self.power.on_input(&event) {
            info!("input while suspended, requesting remote wakeup");
            if let Err(e) = self.transport.remote_wakeup() {
                warn!("remote wakeup failed: {}", e);
                self.power.wake_failed();
            }
        }
        if self.app.apply_input(event) {
            self.submit()
        } else {
            Ok(())
        }
    }

    /// The timed wait expired without an event.
    pub fn on_idle(&mut self) -> Result<()> {
        if self.pending_flush {
            self.flush();
        }
        if self.app.steady() {
            return Ok(());
        }
        self.submit()
    }

    /// Next timed wait, `None` to block until an event arrives.
    pub fn poll_interval(&self) -> Option<Duration> {
        match self.app.poll_rate()? {
            PollRate::Fine => Some(self.config.fine_poll),
            PollRate::Idle => Some(self.config.idle_poll),
        }
    }

    /// Send the buffered input report, or defer it if the link cannot
    /// take it right now.
    fn submit(&mut self) -> Result<()> {
        if !self.power.may_send() || !self.app.is_started() {
            self.pending_flush = true;
            return Err(match self.power.state() {
                PowerState::Suspended => Error::Suspended,
                _ => Error::NotReady,
            });
        }

        let mut buf = [0u8; MAX_INPUT_REPORT];
        let len = self.app.input_report(&mut buf);
        if len == 0 {
            return Err(Error::BufferOverflow);
        }
        self.transport.send_report(&buf[..len])?;
        self.app.report_sent();
        self.pending_flush = false;
        if let Ok(copy) = heapless::Vec::from_slice(&buf[..len]) {
            self.last_sent = copy;
        }
        Ok(())
    }

    /// Deliver a deferred report if the host has not seen this state yet.
    fn flush(&mut self) {
        if !self.pending_flush || !self.power.may_send() || !self.app.is_started() {
            return;
        }
        let mut buf = [0u8; MAX_INPUT_REPORT];
        let len = self.app.input_report(&mut buf);
        if self.last_sent.as_slice() == &buf[..len] {
            self.pending_flush = false;
            return;
        }
        if let Err(e) = self.submit() {
            warn!("deferred report not delivered: {}", e);
        }
    }

    /// Restore feature state lost to a spurious host reset.
    fn apply_replay(&mut self) {
        if !self.power.replay_pending() || !self.app.is_started() || !self.power.may_send() {
            return;
        }
        let Some(snapshot) = self.power.take_replay() else {
            return;
        };
        if self.app.feature_snapshot() == Some(snapshot) {
            return;
        }
        let selector = snapshot.selector();
        if let Err(e) = self
            .app
            .on_output_report(selector.ty, snapshot.as_bytes(), &mut self.transport)
        {
            warn!("feature replay rejected: {}", e);
        }
    }
}

/// Drive `ctx` from `events` forever.
///
/// Waits with a timeout while the application needs periodic resends and
/// blocks otherwise. Errors are logged and never stop the loop.
pub async fn run_control_loop<M, E, A, T, const N: usize>(
    ctx: &Mutex<M, RefCell<ControlLoop<A, T>>>,
    events: &EventChannel<E, N>,
) -> !
where
    M: RawMutex,
    E: RawMutex,
    A: HidApplication,
    T: Transport,
{
    info!("control loop started");
    loop {
        let interval = ctx.lock(|c| {
            let mut c = c.borrow_mut();
            c.sync_power(Instant::now());
            c.poll_interval()
        });

        let event = match interval {
            Some(timeout) => events.try_get_for(timeout).await,
            None => Some(events.get().await),
        };

        ctx.lock(|c| {
            let mut c = c.borrow_mut();
            c.sync_power(Instant::now());
            let result = match event {
                Some(event) => c.on_input(event),
                None => c.on_idle(),
            };
            match result {
                Ok(()) => {}
                Err(Error::Suspended) | Err(Error::NotReady) => debug!("report deferred"),
                Err(e) => warn!("report not sent: {}", e),
            }
        });
    }
}
