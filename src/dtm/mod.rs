//! Debug Transport Module (DTM) handling
//!
//! The DTM bridges the host probe and the target's Debug Module. The DMI
//! engine is generic over the [`DmiTransport`] capability so that the
//! layers above stay transport-neutral; [`jtag_dtm::JtagDtm`] is the JTAG
//! incarnation.

pub mod jtag_dtm;

use std::fmt;

use crate::probe::TapError;

/// Offset of the `address` field in a DMI scan payload.
pub const DMI_ADDRESS_BIT_OFFSET: u32 = 34;

/// Offset of the `data` field in a DMI scan payload.
pub const DMI_VALUE_BIT_OFFSET: u32 = 2;

pub(crate) const DMI_OP_MASK: u128 = 0x3;

/// Version of the debug specification implemented by a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugVersion {
    /// Debug specification 0.11. Recognized, never supported.
    V0_11,
    /// Debug specification 0.13, the version this crate drives.
    V0_13,
    /// Anything the target reports that maps to neither.
    Unknown(u8),
}

impl DebugVersion {
    /// Decode the `version` field of `dtmcs`.
    pub fn from_dtmcs(raw: u8) -> Self {
        match raw {
            0 => DebugVersion::V0_11,
            1 => DebugVersion::V0_13,
            other => DebugVersion::Unknown(other),
        }
    }

    /// Decode the `version` field of `dmstatus`. Zero means no debug module
    /// is present at all.
    pub fn from_dmstatus(raw: u8) -> Option<Self> {
        match raw {
            0 => None,
            1 => Some(DebugVersion::V0_11),
            2 => Some(DebugVersion::V0_13),
            other => Some(DebugVersion::Unknown(other)),
        }
    }
}

impl fmt::Display for DebugVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugVersion::V0_11 => f.write_str("0.11"),
            DebugVersion::V0_13 => f.write_str("0.13"),
            DebugVersion::Unknown(_) => f.write_str("UNKNOWN"),
        }
    }
}

/// A single operation on the DMI bus.
#[derive(Copy, Clone, Debug)]
pub enum DmiOperation {
    NoOp,
    Read { address: u32 },
    Write { address: u32, value: u32 },
}

impl DmiOperation {
    fn opcode(&self) -> u8 {
        match self {
            Self::NoOp => 0,
            Self::Read { .. } => 1,
            Self::Write { .. } => 2,
        }
    }

    /// The `[address:abits][data:32][op:2]` scan payload for this operation.
    pub fn payload(&self) -> u64 {
        let (address, value): (u64, u64) = match *self {
            Self::NoOp => (0, 0),
            Self::Read { address } => (address as u64, 0),
            Self::Write { address, value } => (address as u64, value as u64),
        };

        address << DMI_ADDRESS_BIT_OFFSET | value << DMI_VALUE_BIT_OFFSET | self.opcode() as u64
    }
}

/// Possible values of the `op` field on an inbound DMI scan, reporting the
/// outcome of the previous transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DmiOperationStatus {
    Ok = 0,
    Reserved = 1,
    OperationFailed = 2,
    RequestInProgress = 3,
}

impl DmiOperationStatus {
    /// Decode the two-bit `op` field.
    pub(crate) fn from_bits(value: u8) -> Self {
        match value & 0x3 {
            0 => Self::Ok,
            1 => Self::Reserved,
            2 => Self::OperationFailed,
            _ => Self::RequestInProgress,
        }
    }
}

/// Capability the DMI engine needs from a transport: shift one scan payload
/// and reset the DMI state machine. Everything else about the protocol is
/// transport-neutral.
pub trait DmiTransport: fmt::Debug {
    /// The idcode captured when the transport attached.
    fn idcode(&self) -> u32;

    /// The debug specification version reported by the transport.
    fn version(&self) -> DebugVersion;

    /// Width of the `address` field in DMI scans.
    fn abits(&self) -> u8;

    /// Number of Run-Test/Idle cycles the target wants between scans.
    fn idle(&self) -> u8;

    /// Shift one `abits + 34` bit payload through the DMI register.
    ///
    /// Returns the 32 data bits and the status of the *previous* operation.
    fn low_access(&mut self, payload: u64) -> Result<(u32, DmiOperationStatus), TapError>;

    /// Issue `dmireset` (or `dmihardreset`), leaving the transport ready
    /// for further DMI scans.
    fn reset(&mut self, hard: bool) -> Result<(), TapError>;

    /// Spend `cycles` extra cycles in Run-Test/Idle.
    fn run_idle(&mut self, cycles: u8) -> Result<(), TapError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_layout() {
        let read = DmiOperation::Read { address: 0x11 };
        assert_eq!(read.payload(), (0x11 << 34) | 1);

        let write = DmiOperation::Write {
            address: 0x10,
            value: 0x8000_0001,
        };
        assert_eq!(write.payload(), (0x10 << 34) | (0x8000_0001 << 2) | 2);

        assert_eq!(DmiOperation::NoOp.payload(), 0);
    }

    #[test]
    fn status_decoding() {
        assert_eq!(DmiOperationStatus::from_bits(0), DmiOperationStatus::Ok);
        assert_eq!(
            DmiOperationStatus::from_bits(2),
            DmiOperationStatus::OperationFailed
        );
        assert_eq!(
            DmiOperationStatus::from_bits(3),
            DmiOperationStatus::RequestInProgress
        );
    }

    #[test]
    fn version_decoding() {
        assert_eq!(DebugVersion::from_dtmcs(1), DebugVersion::V0_13);
        assert_eq!(DebugVersion::from_dtmcs(0), DebugVersion::V0_11);
        assert_eq!(DebugVersion::from_dtmcs(15), DebugVersion::Unknown(15));

        assert_eq!(DebugVersion::from_dmstatus(0), None);
        assert_eq!(DebugVersion::from_dmstatus(2), Some(DebugVersion::V0_13));
        assert_eq!(DebugVersion::V0_13.to_string(), "0.13");
    }
}
