//! Error types at each layer boundary.
//!
//! Command-level failures (bad LBA, write protect, ...) are not modeled
//! here: they are reported through the latched [`crate::sense::SenseCode`]
//! mechanism and never unwind a `Result`. These types are for the fatal,
//! operator-facing failures of spec §7: a file that can't be opened, an
//! image whose geometry doesn't add up, a handshake that times out.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileIoError {
    #[error("could not open {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("short read: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: usize, got: usize },

    #[error("short write: wanted {wanted} bytes, wrote {got}")]
    ShortWrite { wanted: usize, got: usize },

    #[error("seek past end of file")]
    SeekOutOfRange,

    #[error("no file is open")]
    NotOpen,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiskError {
    #[error(transparent)]
    Io(#[from] FileIoError),

    #[error("image size {size} is not a valid {kind} geometry")]
    BadGeometry { kind: &'static str, size: u64 },

    #[error("image offset {offset} plus image size exceeds file size {file_size}")]
    OffsetOutOfRange { offset: u64, file_size: u64 },

    #[error("unsupported media kind")]
    Unsupported,

    #[error("medium removal prevented")]
    RemovalPrevented,
}

/// Errors surfaced by the protocol engine itself, independent of any
/// particular LUN command. These map onto the "Protocol layer" half of §7.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("handshake timed out waiting for {0}")]
    HandshakeTimeout(&'static str),

    #[error("phase mismatch: expected {expected:?}, observed {observed:?}")]
    PhaseMismatch {
        expected: crate::bus::Phase,
        observed: crate::bus::Phase,
    },

    #[error("short transfer: wanted {wanted} bytes, transferred {got}")]
    ShortTransfer { wanted: usize, got: usize },

    #[error("bus reset")]
    Reset,
}
