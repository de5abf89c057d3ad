//! Adapter-side contract for the JTAG Test Access Port.
//!
//! The crate drives the scan chain through this trait; the physical probe
//! (FTDI, CMSIS-DAP, bitbang GPIO, ...) is implemented elsewhere.

use bitvec::vec::BitVec;
use thiserror::Error;

/// Errors reported by the TAP adapter.
#[derive(Debug, Error)]
pub enum TapError {
    #[error("communication with the debug adapter failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("the adapter shifted {actual} bits, expected {expected}")]
    ShiftLength { expected: u32, actual: u32 },
    #[error("the adapter rejected instruction register value {0:#04x}")]
    InvalidInstruction(u8),
}

/// Low-level access to a JTAG TAP.
///
/// All bit buffers are little-endian bit streams: bit `n` of the transfer is
/// bit `n % 8` of byte `n / 8`.
pub trait TapAccess: std::fmt::Debug {
    /// Place a value in the instruction register. Values are at most 5 bits
    /// wide for the DTM register set.
    fn write_ir(&mut self, value: u8) -> Result<(), TapError>;

    /// Shift `bits` bits through the data register, capturing TDO while
    /// driving TDI from `data`. Returns the captured bits.
    fn shift_dr(&mut self, data: &[u8], bits: u32) -> Result<BitVec, TapError>;

    /// Emit `count` TMS cycles driven from the low bits of `pattern`.
    ///
    /// A zero pattern keeps the TAP in Run-Test/Idle.
    fn tms_seq(&mut self, pattern: u8, count: u8) -> Result<(), TapError>;

    /// Configure the number of Run-Test/Idle cycles the adapter inserts
    /// after each data register scan.
    fn set_idle_cycles(&mut self, cycles: u8);

    /// The currently configured number of idle cycles.
    fn idle_cycles(&self) -> u8;
}
