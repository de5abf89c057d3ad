//! Host-side driver for RISC-V External Debug Support, version 0.13.
//!
//! This crate implements the Debug Transport Module / Debug Module
//! Interface engine a debug probe uses to talk to a RISC-V target:
//!
//! - raw DMI scans over a JTAG TAP, including the busy-interrupt retry
//!   protocol ([`dtm`]),
//! - abstract command execution with `cmderr` handling and `autoexecdata`
//!   batching ([`communication_interface`]),
//! - program buffer uploads for CSR and memory access on targets whose
//!   abstract command engine cannot express them directly,
//! - capability negotiation and hart discovery at attach time.
//!
//! The physical probe is not part of this crate; it is consumed through
//! the [`probe::TapAccess`] trait. A session is established by attaching
//! a [`dtm::jtag_dtm::JtagDtm`] to a TAP and handing it to
//! [`RiscvDebugInterface::attach`].
//!
//! Only version 0.13 of the debug specification and XLEN 32 targets are
//! supported; system bus access is not implemented, memory goes through
//! the program buffer or the `access memory` abstract command.

pub mod assembly;
pub mod communication_interface;
pub mod dtm;
mod error;
pub mod probe;
pub mod registers;

pub use communication_interface::{
    AbstractCommandErrorKind, RiscvDebugHandle, RiscvDebugInterface, MAX_HARTS,
};
pub use dtm::DebugVersion;
pub use error::{RiscvError, TransportError, UsageError};
pub use probe::{TapAccess, TapError};
