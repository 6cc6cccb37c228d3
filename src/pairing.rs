//! Pairing handoff between the radio stack and the operator.
//!
//! The radio stack asks for a passkey from its own callback context; the
//! operator types it in later. [`PairingQueue`] holds at most one request
//! per connection, oldest first, until it is answered, cancelled, or the
//! connection goes away.
//!
//! Each request carries an opaque `token` supplied by the transport (the
//! retained connection reference). The queue hands it back whenever the
//! request leaves, so the transport can complete or drop it.

use embassy_time::Instant;
use heapless::Vec;

use crate::config::MAX_PASSKEY;
use crate::error::{Error, Result};

/// One outstanding passkey request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairingRequest<R> {
    pub connection: u16,
    pub requested_at: Instant,
    pub token: R,
}

/// Outcome of an operator reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairingReply<R> {
    /// Complete the exchange with this passkey.
    Passkey { connection: u16, passkey: u32, token: R },
    /// Cancel the exchange.
    Cancel { connection: u16, token: R },
}

impl<R> PairingReply<R> {
    pub fn connection(&self) -> u16 {
        match self {
            PairingReply::Passkey { connection, .. } | PairingReply::Cancel { connection, .. } => {
                *connection
            }
        }
    }
}

/// Bounded FIFO of pending passkey requests, one slot per connection.
pub struct PairingQueue<R, const N: usize> {
    pending: Vec<PairingRequest<R>, N>,
}

impl<R, const N: usize> PairingQueue<R, N> {
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Register a passkey request for `connection`.
    ///
    /// A second request for a connection that is still pending is rejected
    /// and the first one is left untouched.
    pub fn request(&mut self, connection: u16, token: R, now: Instant) -> Result<()> {
        if self.is_pending(connection) {
            warn!("pairing already pending for conn {}", connection);
            return Err(Error::PairingSlotOccupied);
        }
        let request = PairingRequest {
            connection,
            requested_at: now,
            token,
        };
        self.pending.push(request).map_err(|_| {
            warn!("pairing queue full, dropping request for conn {}", connection);
            Error::PairingQueueFull
        })?;
        info!(
            "passkey requested for conn {}, type `passkey XXXXXX` to complete",
            connection
        );
        Ok(())
    }

    /// Answer the oldest request. Values in `0..=999999` are a passkey,
    /// anything else cancels. With nothing pending this does nothing.
    pub fn reply(&mut self, value: i32) -> Option<PairingReply<R>> {
        if self.pending.is_empty() {
            debug!("passkey reply with nothing pending");
            return None;
        }
        let PairingRequest {
            connection, token, ..
        } = self.pending.remove(0);

        match u32::try_from(value) {
            Ok(passkey) if passkey <= MAX_PASSKEY => {
                info!("passkey entered for conn {}", connection);
                Some(PairingReply::Passkey {
                    connection,
                    passkey,
                    token,
                })
            }
            _ => {
                info!("pairing cancelled by operator for conn {}", connection);
                Some(PairingReply::Cancel { connection, token })
            }
        }
    }

    /// Pairing failed on `connection`. Releases the head request if it
    /// belongs to that connection.
    pub fn on_failed(&mut self, connection: u16, reason: i32) -> Option<R> {
        warn!("pairing failed for conn {}, reason {}", connection, reason);
        self.release_head(connection)
    }

    /// Pairing completed on `connection`. Releases the head request if it
    /// belongs to that connection.
    pub fn on_completed(&mut self, connection: u16, bonded: bool) -> Option<R> {
        info!("pairing completed for conn {}, bonded: {}", connection, bonded);
        self.release_head(connection)
    }

    /// The peer or the stack cancelled pairing on `connection`.
    pub fn on_cancelled(&mut self, connection: u16) -> Option<R> {
        info!("pairing cancelled for conn {}", connection);
        self.release(connection)
    }

    /// `connection` went away; drop whatever it had pending.
    pub fn on_disconnected(&mut self, connection: u16) -> Option<R> {
        self.release(connection)
    }

    /// Oldest pending request.
    pub fn peek(&self) -> Option<&PairingRequest<R>> {
        self.pending.first()
    }

    pub fn is_pending(&self, connection: u16) -> bool {
        self.pending.iter().any(|r| r.connection == connection)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn release_head(&mut self, connection: u16) -> Option<R> {
        match self.pending.first() {
            Some(head) if head.connection == connection => Some(self.pending.remove(0).token),
            _ => None,
        }
    }

    fn release(&mut self, connection: u16) -> Option<R> {
        let index = self
            .pending
            .iter()
            .position(|r| r.connection == connection)?;
        Some(self.pending.remove(index).token)
    }
}

impl<R, const N: usize> Default for PairingQueue<R, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero-padded ASCII digits of `passkey`, as radio stacks take them.
pub fn passkey_digits(passkey: u32) -> [u8; 6] {
    let mut digits = [b'0'; 6];
    let mut rest = passkey.min(MAX_PASSKEY);
    for digit in digits.iter_mut().rev() {
        *digit = b'0' + (rest % 10) as u8;
        rest /= 10;
    }
    digits
}

/// A line typed by the operator on the debug console.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatorCommand {
    /// `passkey <n>`: answer the oldest pairing request; negative cancels.
    Passkey(i32),
    /// `battery <0..=100>`: update the advertised battery level.
    Battery(u8),
}

impl OperatorCommand {
    /// Parse one command line. An optional leading `bt` is accepted.
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let mut command = words.next().ok_or(Error::InvalidCommand)?;
        if command == "bt" {
            command = words.next().ok_or(Error::InvalidCommand)?;
        }
        let argument = words.next().ok_or(Error::InvalidCommand)?;
        if words.next().is_some() {
            return Err(Error::InvalidCommand);
        }

        match command {
            "passkey" => argument
                .parse::<i32>()
                .map(OperatorCommand::Passkey)
                .map_err(|_| Error::InvalidCommand),
            "battery" => match argument.parse::<u8>() {
                Ok(level) if level <= 100 => Ok(OperatorCommand::Battery(level)),
                _ => Err(Error::InvalidCommand),
            },
            _ => Err(Error::InvalidCommand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Queue = PairingQueue<&'static str, 2>;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn reply_with_passkey_completes_oldest() {
        let mut q = Queue::new();
        q.request(1, "first", at(0)).unwrap();
        q.request(2, "second", at(5)).unwrap();

        assert_eq!(
            q.reply(123_456),
            Some(PairingReply::Passkey {
                connection: 1,
                passkey: 123_456,
                token: "first"
            })
        );
        assert_eq!(q.peek().map(|r| r.connection), Some(2));
    }

    #[test]
    fn negative_reply_cancels() {
        let mut q = Queue::new();
        q.request(7, "conn7", at(0)).unwrap();
        assert_eq!(
            q.reply(-1),
            Some(PairingReply::Cancel {
                connection: 7,
                token: "conn7"
            })
        );
        assert!(q.is_empty());
    }

    #[test]
    fn out_of_range_reply_cancels() {
        let mut q = Queue::new();
        q.request(7, "conn7", at(0)).unwrap();
        let reply = q.reply(1_000_000).unwrap();
        assert!(matches!(reply, PairingReply::Cancel { .. }));
        assert_eq!(reply.connection(), 7);
    }

    #[test]
    fn reply_without_request_is_noop() {
        let mut q = Queue::new();
        assert_eq!(q.reply(123_456), None);
        assert!(q.is_empty());
    }

    #[test]
    fn duplicate_request_rejected_first_kept() {
        let mut q = Queue::new();
        q.request(3, "original", at(10)).unwrap();
        assert_eq!(q.request(3, "retry", at(20)), Err(Error::PairingSlotOccupied));

        let head = q.peek().unwrap();
        assert_eq!(head.token, "original");
        assert_eq!(head.requested_at, at(10));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn full_queue_rejects_new_connection() {
        let mut q = Queue::new();
        q.request(1, "a", at(0)).unwrap();
        q.request(2, "b", at(0)).unwrap();
        assert_eq!(q.request(3, "c", at(0)), Err(Error::PairingQueueFull));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn failure_releases_matching_head_only() {
        let mut q = Queue::new();
        q.request(1, "a", at(0)).unwrap();
        q.request(2, "b", at(0)).unwrap();

        // Not the head: stays queued.
        assert_eq!(q.on_failed(2, 0x05), None);
        assert_eq!(q.len(), 2);

        assert_eq!(q.on_failed(1, 0x05), Some("a"));
        assert_eq!(q.on_completed(2, true), Some("b"));
        assert!(q.is_empty());
    }

    #[test]
    fn cancel_and_disconnect_release_anywhere() {
        let mut q = Queue::new();
        q.request(1, "a", at(0)).unwrap();
        q.request(2, "b", at(0)).unwrap();

        assert_eq!(q.on_cancelled(2), Some("b"));
        assert_eq!(q.on_disconnected(1), Some("a"));
        assert_eq!(q.on_disconnected(1), None);
        // The slot is free again.
        assert!(q.request(1, "again", at(30)).is_ok());
    }

    #[test]
    fn passkey_digits_are_zero_padded() {
        assert_eq!(&passkey_digits(42), b"000042");
        assert_eq!(&passkey_digits(999_999), b"999999");
        assert_eq!(&passkey_digits(0), b"000000");
    }

    #[test]
    fn parse_operator_commands() {
        assert_eq!(
            OperatorCommand::parse("passkey 123456"),
            Ok(OperatorCommand::Passkey(123_456))
        );
        assert_eq!(
            OperatorCommand::parse("bt passkey -1"),
            Ok(OperatorCommand::Passkey(-1))
        );
        assert_eq!(
            OperatorCommand::parse("  battery   80 "),
            Ok(OperatorCommand::Battery(80))
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        for line in [
            "",
            "passkey",
            "passkey abc",
            "battery 101",
            "battery -3",
            "reboot now",
            "passkey 1 2",
        ] {
            assert_eq!(OperatorCommand::parse(line), Err(Error::InvalidCommand), "{line}");
        }
    }
}
