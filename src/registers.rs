//! Debug Module register definitions.
//!
//! Field layouts follow the RISC-V debug specification v0.13; registers
//! with interesting fields get a `bitfield!` type, plain 32-bit registers
//! are generated by the `data_register!` macro.

use bitfield::bitfield;

/// DMI addresses of the debug module register file.
pub mod addr {
    /// First abstract data register, `data0`.
    pub const DATA_BASE: u8 = 0x04;
    /// Last abstract data register, `data11`.
    pub const DATA_END: u8 = 0x0f;
    pub const DMCONTROL: u8 = 0x10;
    pub const DMSTATUS: u8 = 0x11;
    pub const HARTINFO: u8 = 0x12;
    pub const HALTSUM1: u8 = 0x13;
    pub const HAWINDOWSEL: u8 = 0x14;
    pub const HAWINDOW: u8 = 0x15;
    pub const ABSTRACTCS: u8 = 0x16;
    pub const COMMAND: u8 = 0x17;
    pub const ABSTRACTAUTO: u8 = 0x18;
    pub const CONFSTRPTR0: u8 = 0x19;
    pub const CONFSTRPTR1: u8 = 0x1a;
    pub const CONFSTRPTR2: u8 = 0x1b;
    pub const CONFSTRPTR3: u8 = 0x1c;
    pub const NEXTDM: u8 = 0x1d;
    /// First program buffer word, `progbuf0`.
    pub const PROGBUF_BASE: u8 = 0x20;
    /// Last program buffer word, `progbuf15`.
    pub const PROGBUF_END: u8 = 0x2f;
    pub const AUTHDATA: u8 = 0x30;
    pub const HALTSUM2: u8 = 0x34;
    pub const HALTSUM3: u8 = 0x35;
    pub const SBADDRESS3: u8 = 0x37;
    pub const SBCS: u8 = 0x38;
    pub const SBADDRESS0: u8 = 0x39;
    pub const SBADDRESS1: u8 = 0x3a;
    pub const SBADDRESS2: u8 = 0x3b;
    pub const SBDATA0: u8 = 0x3c;
    pub const SBDATA1: u8 = 0x3d;
    pub const SBDATA2: u8 = 0x3e;
    pub const SBDATA3: u8 = 0x3f;
    pub const HALTSUM0: u8 = 0x40;
}

/// First CSR number in the `access register` numbering scheme.
pub const CSR_BASE: u16 = 0x0000;
/// The `misa` CSR.
pub const CSR_MISA: u16 = 0x0301;
/// The `mhartid` CSR.
pub const CSR_MHARTID: u16 = 0x0f14;
/// Last CSR number.
pub const CSR_END: u16 = 0x0fff;
/// Register number of x0 in the `access register` numbering scheme.
pub const GPR_BASE: u16 = 0x1000;
/// Register number of x31.
pub const GPR_END: u16 = 0x101f;

/// A debug module register accessible over the DMI.
pub trait DebugRegister: From<u32> + Into<u32> {
    const ADDRESS: u8;
    const NAME: &'static str;
}

macro_rules! data_register {
    ($(#[$outer:meta])* $i:ident, $addr:expr, $name:expr) => {
        $(#[$outer])*
        #[derive(Debug, Copy, Clone)]
        struct $i(u32);

        impl DebugRegister for $i {
            const ADDRESS: u8 = $addr;
            const NAME: &'static str = $name;
        }

        impl From<$i> for u32 {
            fn from(register: $i) -> Self {
                register.0
            }
        }

        impl From<u32> for $i {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };

    (pub $i:ident, $addr:expr, $name:expr) => {
        #[derive(Debug, Copy, Clone)]
        #[doc = concat!("The `", $name, "` register.")]
        pub struct $i(pub u32);

        impl DebugRegister for $i {
            const ADDRESS: u8 = $addr;
            const NAME: &'static str = $name;
        }

        impl From<$i> for u32 {
            fn from(register: $i) -> Self {
                register.0
            }
        }

        impl From<u32> for $i {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

bitfield! {
    /// The `dmcontrol` register, the main control knob of the debug module.
    pub struct Dmcontrol(u32);
    impl Debug;

    pub haltreq, set_haltreq: 31;
    pub resumereq, set_resumereq: 30;
    pub hartreset, set_hartreset: 29;
    pub ackhavereset, set_ackhavereset: 28;
    pub hasel, set_hasel: 26;
    pub hartsello, set_hartsello: 25, 16;
    pub hartselhi, set_hartselhi: 15, 6;
    pub setresethaltreq, set_setresethaltreq: 3;
    pub clrresethaltreq, set_clrresethaltreq: 2;
    pub ndmreset, set_ndmreset: 1;
    pub dmactive, set_dmactive: 0;
}

impl Dmcontrol {
    /// The 20-bit hart selector, assembled from its two halves.
    pub fn hartsel(&self) -> u32 {
        self.hartselhi() << 10 | self.hartsello()
    }

    /// Set the 20-bit hart selector.
    pub fn set_hartsel(&mut self, hartsel: u32) {
        self.set_hartsello(hartsel & 0x3ff);
        self.set_hartselhi((hartsel >> 10) & 0x3ff);
    }
}

impl DebugRegister for Dmcontrol {
    const ADDRESS: u8 = addr::DMCONTROL;
    const NAME: &'static str = "dmcontrol";
}

impl From<Dmcontrol> for u32 {
    fn from(register: Dmcontrol) -> Self {
        register.0
    }
}

impl From<u32> for Dmcontrol {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

bitfield! {
    /// The read-only `dmstatus` register.
    pub struct Dmstatus(u32);
    impl Debug;

    pub impebreak, _: 22;
    pub allhavereset, _: 19;
    pub anyhavereset, _: 18;
    pub allresumeack, _: 17;
    pub anyresumeack, _: 16;
    pub allnonexistent, _: 15;
    pub anynonexistent, _: 14;
    pub allunavail, _: 13;
    pub anyunavail, _: 12;
    pub allrunning, _: 11;
    pub anyrunning, _: 10;
    pub allhalted, _: 9;
    pub anyhalted, _: 8;
    pub authenticated, _: 7;
    pub authbusy, _: 6;
    pub hasresethaltreq, _: 5;
    pub confstrptrvalid, _: 4;
    pub version, _: 3, 0;
}

impl DebugRegister for Dmstatus {
    const ADDRESS: u8 = addr::DMSTATUS;
    const NAME: &'static str = "dmstatus";
}

impl From<Dmstatus> for u32 {
    fn from(register: Dmstatus) -> Self {
        register.0
    }
}

impl From<u32> for Dmstatus {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

bitfield! {
    /// The `abstractcs` register: abstract command status and capabilities.
    pub struct Abstractcs(u32);
    impl Debug;

    pub progbufsize, _: 28, 24;
    pub busy, _: 12;
    pub cmderr, set_cmderr: 10, 8;
    pub datacount, _: 3, 0;
}

impl DebugRegister for Abstractcs {
    const ADDRESS: u8 = addr::ABSTRACTCS;
    const NAME: &'static str = "abstractcs";
}

impl From<Abstractcs> for u32 {
    fn from(register: Abstractcs) -> Self {
        register.0
    }
}

impl From<u32> for Abstractcs {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

bitfield! {
    /// The `abstractauto` register, controlling automatic command re-execution.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Abstractauto(u32);
    impl Debug;

    pub autoexecprogbuf, set_autoexecprogbuf: 31, 16;
    pub autoexecdata, set_autoexecdata: 11, 0;
}

impl DebugRegister for Abstractauto {
    const ADDRESS: u8 = addr::ABSTRACTAUTO;
    const NAME: &'static str = "abstractauto";
}

impl From<Abstractauto> for u32 {
    fn from(register: Abstractauto) -> Self {
        register.0
    }
}

impl From<u32> for Abstractauto {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Access width of an abstract register or memory access.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
pub enum BusAccess {
    A8 = 0,
    A16 = 1,
    A32 = 2,
    A64 = 3,
    A128 = 4,
}

impl From<BusAccess> for u8 {
    fn from(value: BusAccess) -> Self {
        value as u8
    }
}

bitfield! {
    /// An `access register` abstract command word.
    pub struct AccessRegisterCommand(u32);
    impl Debug;

    pub _, set_cmd_type: 31, 24;
    pub u8, from into BusAccess, _, set_aarsize: 22, 20;
    pub _, set_aarpostincrement: 19;
    pub _, set_postexec: 18;
    pub _, set_transfer: 17;
    pub _, set_write: 16;
    pub _, set_regno: 15, 0;
}

impl From<AccessRegisterCommand> for u32 {
    fn from(register: AccessRegisterCommand) -> Self {
        register.0
    }
}

impl From<u32> for AccessRegisterCommand {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

bitfield! {
    /// An `access memory` abstract command word.
    pub struct AccessMemoryCommand(u32);
    impl Debug;

    _, set_cmd_type: 31, 24;
    pub _, set_aamvirtual: 23;
    pub u8, from into BusAccess, _, set_aamsize: 22, 20;
    pub _, set_aampostincrement: 19;
    pub _, set_write: 16;
}

impl From<AccessMemoryCommand> for u32 {
    fn from(register: AccessMemoryCommand) -> Self {
        let mut reg = register;
        reg.set_cmd_type(2);
        reg.0
    }
}

impl From<u32> for AccessMemoryCommand {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

data_register! { pub Data0, addr::DATA_BASE, "data0" }
data_register! { pub Data1, 0x05, "data1" }
data_register! { pub NextDm, addr::NEXTDM, "nextdm" }

data_register! { pub Progbuf0, 0x20, "progbuf0" }
data_register! { pub Progbuf1, 0x21, "progbuf1" }
data_register! { pub Progbuf2, 0x22, "progbuf2" }
data_register! { pub Progbuf3, 0x23, "progbuf3" }
data_register! { pub Progbuf4, 0x24, "progbuf4" }
data_register! { pub Progbuf5, 0x25, "progbuf5" }
data_register! { pub Progbuf6, 0x26, "progbuf6" }
data_register! { pub Progbuf7, 0x27, "progbuf7" }
data_register! { pub Progbuf8, 0x28, "progbuf8" }
data_register! { pub Progbuf9, 0x29, "progbuf9" }
data_register! { pub Progbuf10, 0x2a, "progbuf10" }
data_register! { pub Progbuf11, 0x2b, "progbuf11" }
data_register! { pub Progbuf12, 0x2c, "progbuf12" }
data_register! { pub Progbuf13, 0x2d, "progbuf13" }
data_register! { pub Progbuf14, 0x2e, "progbuf14" }
data_register! { pub Progbuf15, 0x2f, "progbuf15" }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hartsel_round_trips_through_both_halves() {
        let mut dmcontrol = Dmcontrol(0);
        dmcontrol.set_hartsel(0xabcde);

        assert_eq!(dmcontrol.hartsello(), 0x0de);
        assert_eq!(dmcontrol.hartselhi(), 0x2af);
        assert_eq!(dmcontrol.hartsel(), 0xabcde);
    }

    #[test]
    fn hartsel_all_ones_probe_value() {
        let mut dmcontrol = Dmcontrol(0);
        dmcontrol.set_dmactive(true);
        dmcontrol.set_hartsel(0xfffff);

        assert_eq!(dmcontrol.0, (0x3ff << 16) | (0x3ff << 6) | 1);
    }

    #[test]
    fn dmstatus_fields() {
        let dmstatus = Dmstatus(0x0003_02A2);

        assert_eq!(dmstatus.version(), 2);
        assert!(dmstatus.authenticated());
        assert!(dmstatus.allhalted());
        assert!(!dmstatus.impebreak());
        assert!(!dmstatus.anynonexistent());
    }

    #[test]
    fn abstractcs_fields() {
        let abstractcs = Abstractcs(0x0400_0102);

        assert_eq!(abstractcs.progbufsize(), 4);
        assert_eq!(abstractcs.datacount(), 2);
        assert_eq!(abstractcs.cmderr(), 1);
        assert!(!abstractcs.busy());
    }

    #[test]
    fn access_register_command_word() {
        // 32-bit read of mhartid, as submitted by the abstract CSR path.
        let mut command = AccessRegisterCommand(0);
        command.set_cmd_type(0);
        command.set_aarsize(BusAccess::A32);
        command.set_transfer(true);
        command.set_regno(CSR_MHARTID as u32);

        assert_eq!(command.0, 0x0022_0F14);
    }

    #[test]
    fn access_memory_command_sets_its_type() {
        let mut command = AccessMemoryCommand(0);
        command.set_aamsize(BusAccess::A32);
        command.set_write(true);

        assert_eq!(u32::from(command), 0x0221_0000);
    }
}
