//! Passkey-entry pairing and bond storage.
//!
//! The SoftDevice asks for a passkey from inside its event loop. The
//! request is parked in a [`PairingQueue`] until the operator types
//! `passkey NNNNNN` on the console (or cancels with a negative value).

use core::cell::{Cell, RefCell};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Instant;
use heapless::Vec;
use nrf_softdevice::ble::security::{IoCapabilities, PasskeyReply, SecurityHandler};
use nrf_softdevice::ble::{Connection, EncryptionInfo, IdentityKey, MasterId, SecurityMode};

use crate::config::{MAX_BONDS, MAX_PAIRING_REQUESTS};
use crate::pairing::{passkey_digits, PairingQueue, PairingReply};

struct PeerBond {
    master_id: MasterId,
    key: EncryptionInfo,
}

type Queue = PairingQueue<PasskeyReply, MAX_PAIRING_REQUESTS>;

pub struct PasskeySecurity {
    peers: RefCell<Vec<PeerBond, MAX_BONDS>>,
    pending: Mutex<CriticalSectionRawMutex, RefCell<Queue>>,
    // Set by `can_bond`, which the stack calls right before asking for
    // the passkey of the same link.
    current: Cell<Option<u16>>,
}

impl PasskeySecurity {
    pub fn new() -> Self {
        Self {
            peers: RefCell::new(Vec::new()),
            pending: Mutex::new(RefCell::new(PairingQueue::new())),
            current: Cell::new(None),
        }
    }

    /// Operator answer for the oldest pending request.
    pub fn reply(&self, value: i32) {
        let reply = self.pending.lock(|q| q.borrow_mut().reply(value));
        match reply {
            Some(PairingReply::Passkey { passkey, token, .. }) => {
                token.reply(Some(&passkey_digits(passkey)));
            }
            Some(PairingReply::Cancel { token, .. }) => token.reply(None),
            None => info!("no pairing in progress"),
        }
    }

    /// `connection` went away; its pending request is dropped.
    pub fn on_disconnected(&self, connection: u16) {
        if let Some(token) = self.pending.lock(|q| q.borrow_mut().on_disconnected(connection)) {
            token.reply(None);
        }
        if self.current.get() == Some(connection) {
            self.current.set(None);
        }
    }
}

impl Default for PasskeySecurity {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityHandler for PasskeySecurity {
    fn io_capabilities(&self) -> IoCapabilities {
        IoCapabilities::KeyboardOnly
    }

    fn can_bond(&self, conn: &Connection) -> bool {
        self.current.set(conn.handle());
        true
    }

    fn display_passkey(&self, passkey: &[u8; 6]) {
        // Not reachable with keyboard-only IO, log it anyway.
        info!("BLE passkey: {}", passkey);
    }

    fn enter_passkey(&self, reply: PasskeyReply) {
        let Some(connection) = self.current.get() else {
            warn!("passkey requested without a pairing link");
            reply.reply(None);
            return;
        };
        let now = Instant::now();
        // Rejected requests drop their reply, which refuses the exchange.
        let _ = self
            .pending
            .lock(|q| q.borrow_mut().request(connection, reply, now));
    }

    fn on_security_update(&self, conn: &Connection, mode: SecurityMode) {
        info!("BLE security mode updated: {}", mode);
        let Some(connection) = conn.handle() else {
            return;
        };
        if matches!(mode, SecurityMode::NoAccess | SecurityMode::Open) {
            return;
        }
        let released = self
            .pending
            .lock(|q| q.borrow_mut().on_completed(connection, false));
        if let Some(token) = released {
            token.reply(None);
        }
    }

    fn on_bonded(
        &self,
        conn: &Connection,
        master_id: MasterId,
        key: EncryptionInfo,
        _peer_id: IdentityKey,
    ) {
        if let Some(connection) = conn.handle() {
            info!("bonded with conn {}", connection);
        }
        let mut peers = self.peers.borrow_mut();
        if let Some(existing) = peers.iter_mut().find(|p| p.master_id == master_id) {
            existing.key = key;
            return;
        }

        if peers.is_full() {
            peers.remove(0);
        }

        let _ = peers.push(PeerBond { master_id, key });
    }

    fn get_key(&self, _conn: &Connection, master_id: MasterId) -> Option<EncryptionInfo> {
        self.peers
            .borrow()
            .iter()
            .find_map(|p| (p.master_id == master_id).then_some(p.key))
    }
}
