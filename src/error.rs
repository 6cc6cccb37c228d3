//! Unified error type for hidbridge.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! None of these are fatal: every component logs and recovers locally.

use core::fmt;

/// Top-level error type used across the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // Resource exhaustion
    /// A bounded queue (input events, outgoing reports) was full.
    QueueFull,

    /// A pairing request is already pending for this connection.
    PairingSlotOccupied,

    /// Every pairing slot is in use.
    PairingQueueFull,

    // Host input
    /// A host-written report had the wrong length.
    InvalidReportLength { expected: u8, actual: u8 },

    /// The host addressed a report this application does not have.
    UnknownReport,

    // Transport
    /// The transport is not configured or the application is stopped.
    NotReady,

    /// The host has suspended the link; the send was deferred.
    Suspended,

    /// The transport reported a failure with this raw reason code.
    Transport(i32),

    // Generic
    /// Buffer too small for the requested operation.
    BufferOverflow,

    /// An operator command could not be parsed.
    InvalidCommand,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::QueueFull => f.write_str("queue full"),
            Error::PairingSlotOccupied => f.write_str("pairing already pending for connection"),
            Error::PairingQueueFull => f.write_str("no free pairing slot"),
            Error::InvalidReportLength { expected, actual } => {
                write!(f, "report length {} (expected {})", actual, expected)
            }
            Error::UnknownReport => f.write_str("unknown report"),
            Error::NotReady => f.write_str("transport not ready"),
            Error::Suspended => f.write_str("link suspended"),
            Error::Transport(code) => write!(f, "transport error {}", code),
            Error::BufferOverflow => f.write_str("buffer overflow"),
            Error::InvalidCommand => f.write_str("invalid command"),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
