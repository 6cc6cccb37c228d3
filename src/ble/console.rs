//! Operator console over UART.
//!
//! Lines look like `passkey 123456`, `passkey -1` (cancel) or
//! `battery 80`, optionally prefixed with `bt`. `status` logs the link
//! state.

use embassy_nrf::peripherals::UARTE0;
use embassy_nrf::uarte::UarteRx;
use nrf_softdevice::Softdevice;

use crate::hid::HidApplication;
use crate::pairing::OperatorCommand;
use crate::shell::{Edit, LineEditor, ShellCommand, USAGE};
use crate::transport::Transport;

use super::{BleBridge, KeyboardServer, PasskeySecurity};

/// Read operator lines forever and act on them.
pub async fn operator_console<A: HidApplication>(
    mut rx: UarteRx<'static, UARTE0>,
    sd: &'static Softdevice,
    server: &'static KeyboardServer,
    security: &'static PasskeySecurity,
    bridge: &'static BleBridge<A>,
) -> ! {
    let mut editor = LineEditor::new();
    let mut byte = [0u8; 1];

    loop {
        if rx.read(&mut byte).await.is_err() {
            warn!("console read failed");
            editor.clear();
            continue;
        }
        match editor.feed(byte[0]) {
            Edit::Submit(line) => execute(&line, sd, server, security, bridge),
            Edit::Overflow => warn!("console line too long, discarded"),
            _ => {}
        }
    }
}

fn execute<A: HidApplication>(
    line: &str,
    sd: &Softdevice,
    server: &KeyboardServer,
    security: &PasskeySecurity,
    bridge: &BleBridge<A>,
) {
    match ShellCommand::parse(line) {
        Ok(ShellCommand::Operator(OperatorCommand::Passkey(value))) => security.reply(value),
        Ok(ShellCommand::Operator(OperatorCommand::Battery(level))) => {
            info!("battery level {}%", level);
            let conn = bridge.lock(|c| c.borrow().transport().connection().cloned());
            server.set_battery(sd, conn.as_ref(), level);
        }
        Ok(ShellCommand::Status) => {
            let (state, started) = bridge.lock(|c| {
                let c = c.borrow();
                (c.transport().power_state(), c.app().is_started())
            });
            info!("link: {}, connection started: {}", state, started);
        }
        Ok(ShellCommand::Help) | Err(_) => info!("{=str}", USAGE),
    }
}
