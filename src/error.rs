//! Error taxonomy of the debug interface.
//!
//! Transport faults kill the session, abstract command errors are
//! recoverable, usage errors never touched the wire.

use thiserror::Error;

use crate::communication_interface::AbstractCommandErrorKind;
use crate::dtm::DebugVersion;
use crate::probe::TapError;

/// Top-level error type of this crate.
#[derive(Debug, Error)]
pub enum RiscvError {
    /// A fault on the TAP or DMI level. The session is unusable afterwards;
    /// the handle stays alive but further operations fail.
    #[error("debug transport error")]
    Transport(#[from] TransportError),
    /// An abstract command completed with a non-zero `cmderr`. The error
    /// bits have already been cleared, subsequent commands can run.
    #[error("abstract command failed: {0:?}")]
    AbstractCommand(AbstractCommandErrorKind),
    /// A caller-side precondition was violated.
    #[error("usage error")]
    Usage(#[from] UsageError),
    /// A busy-poll or retry loop exceeded its configured bound.
    #[error("timeout during debug module access")]
    Timeout,
}

impl From<TapError> for RiscvError {
    fn from(error: TapError) -> Self {
        RiscvError::Transport(TransportError::Tap(error))
    }
}

/// Faults at the TAP or DMI level, fatal for the current session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("a DMI operation failed")]
    DmiFailed,
    #[error("no debug transport module detected on the scan chain")]
    NoTransport,
    #[error("no debug module present behind the transport")]
    NoDebugModule,
    #[error("the debug module requires authentication")]
    Unauthenticated,
    #[error("the debug module reports no harts")]
    NoHarts,
    #[error("unsupported debug transport version {0:#03x}")]
    UnsupportedTransportVersion(u8),
    #[error("DMI address width {0} is outside the supported range")]
    InvalidAddressWidth(u8),
    #[error("invalid abstract data count {0}, expected 1..=12")]
    InvalidDataCount(u8),
    #[error("invalid program buffer size {0}, expected 0..=16")]
    InvalidProgbufSize(u8),
    #[error("a one-word program buffer requires the implicit ebreak")]
    MissingImpebreak,
    #[error("debug adapter fault")]
    Tap(#[from] TapError),
}

/// Caller-visible precondition violations.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("a {required}-word program does not fit the {capacity}-word program buffer")]
    ProgramBufferTooSmall { required: usize, capacity: usize },
    #[error("{0} argument registers requested, at most 31 are available")]
    TooManyArguments(usize),
    #[error("debug specification version {0} is not supported")]
    UnsupportedDebugVersion(DebugVersion),
    #[error("hart {0} does not exist")]
    NoHart(usize),
    #[error("no access method is available for this operation on this target")]
    NoAccessMethod,
    #[error("the interface was shut down after a transport error")]
    InterfaceDead,
}
