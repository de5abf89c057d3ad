//! JTAG Debug Transport Module.
//!
//! Scan-chain side of the debug module interface: `dtmcs` access, DMI
//! resets and raw DMI scans over a [`TapAccess`] adapter.

use bitfield::bitfield;
use bitvec::field::BitField;

use crate::dtm::{
    DebugVersion, DmiOperationStatus, DmiTransport, DMI_ADDRESS_BIT_OFFSET, DMI_OP_MASK,
    DMI_VALUE_BIT_OFFSET,
};
use crate::error::{RiscvError, TransportError};
use crate::probe::{TapAccess, TapError};

/// Instruction register values of the DTM.
///
/// 0x00 is recommended to be BYPASS as well, 0x12 to 0x17 are reserved.
pub const IR_IDCODE: u8 = 0x01;
pub const IR_DTMCS: u8 = 0x10;
pub const IR_DMI: u8 = 0x11;
pub const IR_BYPASS: u8 = 0x1f;

/// Width of the `dtmcs` register.
const DTMCS_WIDTH: u32 = 32;

bitfield! {
    /// The `dtmcs` register of the DTM.
    pub struct Dtmcs(u32);
    impl Debug;

    pub _, set_dmihardreset: 17;
    pub _, set_dmireset: 16;
    pub idle, _: 14, 12;
    pub dmistat, _: 11, 10;
    pub abits, _: 9, 4;
    pub version, _: 3, 0;
}

/// A Debug Transport Module on a JTAG scan chain.
#[derive(Debug)]
pub struct JtagDtm<T: TapAccess> {
    probe: T,
    current_ir: u8,
    idcode: u32,
    version: DebugVersion,
    abits: u8,
    idle: u8,
}

impl<T: TapAccess> JtagDtm<T> {
    /// Attach to the DTM: read the identity and `dtmcs`, configure idle
    /// cycles and leave the TAP pointing at the DMI register.
    pub fn attach(probe: T) -> Result<Self, RiscvError> {
        let mut dtm = Self {
            probe,
            current_ir: IR_BYPASS,
            idcode: 0,
            version: DebugVersion::Unknown(0xf),
            abits: 0,
            idle: 0,
        };

        dtm.scan()?;

        Ok(dtm)
    }

    fn scan(&mut self) -> Result<(), RiscvError> {
        self.select_ir(IR_IDCODE)?;
        let idcode = self.shift_u32(0)?;
        self.idcode = idcode;

        tracing::debug!("RISC-V DTM with idcode {:#010x} detected", idcode);

        self.select_ir(IR_DTMCS)?;
        let raw_dtmcs = self.shift_u32(0)?;

        if raw_dtmcs == 0 {
            return Err(TransportError::NoTransport.into());
        }

        let dtmcs = Dtmcs(raw_dtmcs);

        tracing::debug!("{:?}", dtmcs);

        let version = DebugVersion::from_dtmcs(dtmcs.version() as u8);
        match version {
            DebugVersion::V0_13 => {}
            DebugVersion::V0_11 => {
                // The engine rejects 0.11 at attach, but keep scanning so
                // the caller gets a precise error.
                tracing::warn!("target implements debug specification 0.11");
            }
            DebugVersion::Unknown(raw) => {
                return Err(TransportError::UnsupportedTransportVersion(raw).into());
            }
        }

        let abits = dtmcs.abits() as u8;
        if !(5..=31).contains(&abits) {
            return Err(TransportError::InvalidAddressWidth(abits).into());
        }

        self.version = version;
        self.abits = abits;
        self.idle = dtmcs.idle() as u8;

        match self.idle {
            0 => tracing::debug!("idle: no Run-Test/Idle state required"),
            1 => tracing::debug!("idle: leave Run-Test/Idle immediately"),
            n => tracing::debug!("idle: stay {} cycles in Run-Test/Idle", n - 1),
        }

        // The adapter inserts the idle cycles after every DR scan.
        self.probe.set_idle_cycles(self.idle);

        self.reset(false)?;

        Ok(())
    }

    fn select_ir(&mut self, value: u8) -> Result<(), TapError> {
        if self.current_ir != value {
            self.probe.write_ir(value)?;
            self.current_ir = value;
        }

        Ok(())
    }

    /// Shift 32 bits through the currently selected DR.
    fn shift_u32(&mut self, value: u32) -> Result<u32, TapError> {
        let response = self.probe.shift_dr(&value.to_le_bytes(), DTMCS_WIDTH)?;

        Ok(response.load_le::<u32>())
    }
}

impl<T: TapAccess> DmiTransport for JtagDtm<T> {
    fn idcode(&self) -> u32 {
        self.idcode
    }

    fn version(&self) -> DebugVersion {
        self.version
    }

    fn abits(&self) -> u8 {
        self.abits
    }

    fn idle(&self) -> u8 {
        self.idle
    }

    fn low_access(&mut self, payload: u64) -> Result<(u32, DmiOperationStatus), TapError> {
        self.select_ir(IR_DMI)?;

        let bits = self.abits as u32 + DMI_ADDRESS_BIT_OFFSET;
        let bytes = (payload as u128).to_le_bytes();

        let response = self.probe.shift_dr(&bytes, bits)?;
        let raw = response.load_le::<u128>();

        let status = DmiOperationStatus::from_bits((raw & DMI_OP_MASK) as u8);
        let value = (raw >> DMI_VALUE_BIT_OFFSET) as u32;

        Ok((value, status))
    }

    fn reset(&mut self, hard: bool) -> Result<(), TapError> {
        self.select_ir(IR_DTMCS)?;

        let mut dtmcs = Dtmcs(0);
        if hard {
            dtmcs.set_dmihardreset(true);
        } else {
            dtmcs.set_dmireset(true);
        }

        let after = self.shift_u32(dtmcs.0)?;
        tracing::debug!(
            "dtmcs after {}: {:#010x}",
            if hard { "dmihardreset" } else { "dmireset" },
            after
        );

        self.select_ir(IR_DMI)?;

        Ok(())
    }

    fn run_idle(&mut self, cycles: u8) -> Result<(), TapError> {
        if cycles > 0 {
            self.probe.tms_seq(0, cycles)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitvec::vec::BitVec;
    use std::collections::VecDeque;

    #[derive(Debug, Default)]
    struct ScriptedTap {
        ir_writes: Vec<u8>,
        dr_shifts: Vec<(u8, u128, u32)>,
        responses: VecDeque<u128>,
        idle_cycles: u8,
        tms_runs: Vec<(u8, u8)>,
    }

    impl ScriptedTap {
        fn with_responses(responses: &[u128]) -> Self {
            ScriptedTap {
                responses: responses.iter().copied().collect(),
                ..Default::default()
            }
        }

        fn current_ir(&self) -> u8 {
            *self.ir_writes.last().unwrap()
        }
    }

    impl TapAccess for ScriptedTap {
        fn write_ir(&mut self, value: u8) -> Result<(), TapError> {
            self.ir_writes.push(value);
            Ok(())
        }

        fn shift_dr(&mut self, data: &[u8], bits: u32) -> Result<BitVec, TapError> {
            let mut payload: u128 = 0;
            for bit in 0..bits as usize {
                if data[bit / 8] >> (bit % 8) & 1 == 1 {
                    payload |= 1 << bit;
                }
            }
            self.dr_shifts.push((self.current_ir(), payload, bits));

            let response = self.responses.pop_front().expect("script exhausted");
            let mut out = BitVec::with_capacity(bits as usize);
            for bit in 0..bits {
                out.push(response >> bit & 1 == 1);
            }
            Ok(out)
        }

        fn tms_seq(&mut self, pattern: u8, count: u8) -> Result<(), TapError> {
            self.tms_runs.push((pattern, count));
            Ok(())
        }

        fn set_idle_cycles(&mut self, cycles: u8) {
            self.idle_cycles = cycles;
        }

        fn idle_cycles(&self) -> u8 {
            self.idle_cycles
        }
    }

    #[test]
    fn attach_parses_dtmcs() {
        // idcode, dtmcs, dtmcs after dmireset
        let tap = ScriptedTap::with_responses(&[0x2000_0913, 0x0000_7111, 0x0000_7111]);

        let dtm = JtagDtm::attach(tap).unwrap();

        assert_eq!(dtm.idcode(), 0x2000_0913);
        assert_eq!(dtm.version(), DebugVersion::V0_13);
        assert_eq!(dtm.abits(), 17);
        assert_eq!(dtm.idle(), 7);

        // idle cycles configured on the adapter, IR left at DMI
        assert_eq!(dtm.probe.idle_cycles, 7);
        assert_eq!(dtm.probe.current_ir(), IR_DMI);
        assert_eq!(
            dtm.probe.ir_writes,
            vec![IR_IDCODE, IR_DTMCS, IR_DMI]
        );
    }

    #[test]
    fn attach_rejects_a_silent_dtm() {
        let tap = ScriptedTap::with_responses(&[0x0000_0001, 0]);

        match JtagDtm::attach(tap) {
            Err(RiscvError::Transport(TransportError::NoTransport)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn attach_rejects_unknown_versions() {
        let tap = ScriptedTap::with_responses(&[0x0000_0001, 0x0000_711f]);

        match JtagDtm::attach(tap) {
            Err(RiscvError::Transport(TransportError::UnsupportedTransportVersion(0xf))) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn low_access_payload_and_response_layout() {
        let tap = ScriptedTap::with_responses(&[
            0x2000_0913,
            0x0000_1071, // abits 7, idle 1
            0x0000_1071,
            (0xABCD << 2) | 0, // read data, ok status
        ]);

        let mut dtm = JtagDtm::attach(tap).unwrap();

        let payload = (0x11u64 << 34) | 1;
        let (value, status) = dtm.low_access(payload).unwrap();

        assert_eq!(value, 0xABCD);
        assert_eq!(status, DmiOperationStatus::Ok);

        // 7 + 34 bits shifted through the DMI register
        let (ir, shifted, bits) = *dtm.probe.dr_shifts.last().unwrap();
        assert_eq!(ir, IR_DMI);
        assert_eq!(shifted, payload as u128);
        assert_eq!(bits, 41);
    }

    #[test]
    fn reset_toggles_the_requested_bit() {
        let tap = ScriptedTap::with_responses(&[
            0x2000_0913,
            0x0000_1071,
            0x0000_1071,
            0x0000_1071,
        ]);

        let mut dtm = JtagDtm::attach(tap).unwrap();
        dtm.reset(true).unwrap();

        let (ir, shifted, _) = *dtm.probe.dr_shifts.last().unwrap();
        assert_eq!(ir, IR_DTMCS);
        assert_eq!(shifted, 1 << 17);
        assert_eq!(dtm.probe.current_ir(), IR_DMI);
    }
}
