//! Debug Module communication.
//!
//! This module implements communication with a Debug Module as described
//! in the RISC-V debug specification v0.13: the DMI read/write protocol
//! with its busy-retry handling, abstract command execution, program
//! buffer uploads, capability negotiation and hart discovery.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::assembly;
use crate::dtm::{DebugVersion, DmiOperation, DmiOperationStatus, DmiTransport};
use crate::error::{RiscvError, TransportError, UsageError};
use crate::probe::TapError;
use crate::registers::{
    addr, Abstractauto, Abstractcs, AccessMemoryCommand, AccessRegisterCommand, BusAccess, Data0,
    Data1, DebugRegister, Dmcontrol, Dmstatus, NextDm, Progbuf0, Progbuf1, Progbuf10, Progbuf11,
    Progbuf12, Progbuf13, Progbuf14, Progbuf15, Progbuf2, Progbuf3, Progbuf4, Progbuf5, Progbuf6,
    Progbuf7, Progbuf8, Progbuf9, CSR_MHARTID, GPR_BASE,
};

/// Maximum number of harts the interface keeps track of.
pub const MAX_HARTS: usize = 8;

/// Default bound for busy-poll and retry loops.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pattern written to `abstractauto` to find out which bits are implemented.
const AUTOEXEC_PROBE_PATTERN: u32 = 0b1010_1010_1010;

/// Errors which can occur while executing an abstract command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbstractCommandErrorKind {
    None = 0,
    Busy = 1,
    NotSupported = 2,
    Exception = 3,
    HaltResume = 4,
    Bus = 5,
    Reserved = 6,
    Other = 7,
}

impl AbstractCommandErrorKind {
    /// Decode the three-bit `cmderr` field.
    fn from_bits(value: u8) -> Self {
        use AbstractCommandErrorKind::*;

        match value & 0x7 {
            0 => None,
            1 => Busy,
            2 => NotSupported,
            3 => Exception,
            4 => HaltResume,
            5 => Bus,
            6 => Reserved,
            _ => Other,
        }
    }
}

/// How a CSR is accessed on this target, decided at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsrAccess {
    /// `access register` command with the CSR number.
    Abstract,
    /// A `csrr`/`csrw` sequence in the program buffer.
    ProgramBuffer,
}

/// How memory is accessed on this target, decided at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemAccess {
    /// `access memory` command with address and data in the data window.
    Abstract,
    /// A `lw`/`sw` sequence in the program buffer.
    ProgramBuffer,
}

/// A hart discovered during the `hartsel` scan.
#[derive(Debug)]
struct Hart {
    /// `hartsel` value of this hart.
    index: u32,
    /// The hart's `mhartid` CSR, read on first request.
    mhartid: Option<u32>,
    /// Scratch backup of x1..=x31 during program buffer calls.
    gpr_backup: [u32; 31],
}

impl Hart {
    fn new(index: u32) -> Self {
        Hart {
            index,
            mhartid: None,
            gpr_backup: [0; 31],
        }
    }
}

/// Communication interface to a v0.13 debug module.
///
/// Created by [`RiscvDebugInterface::attach`], which negotiates the
/// target's capabilities and scans for harts. All operations are
/// synchronous and strictly serialize their DMI traffic.
#[derive(Debug)]
pub struct RiscvDebugInterface {
    transport: Box<dyn DmiTransport>,

    debug_version: DebugVersion,

    /// Payload of the most recent DMI scan that completed with a success
    /// status. Replayed verbatim after an interrupted scan.
    last_dmi: u64,

    /// Size of the program buffer, in 32-bit words.
    progbuf_size: u8,

    /// Cache of the program buffer contents.
    progbuf_cache: [u32; 16],
    progbuf_cache_len: usize,

    /// Implicit `ebreak` instruction is present after the program buffer.
    implicit_ebreak: bool,

    /// Number of data registers for abstract commands.
    data_count: u8,

    /// Accessing `data0` re-executes the last abstract command.
    supports_autoexec: bool,

    harts: Vec<Hart>,
    current_hart: usize,

    csr_access: Option<CsrAccess>,
    mem_access: Option<MemAccess>,

    /// Set after a transport fault; every further operation fails.
    dead: bool,

    timeout: Duration,
}

impl RiscvDebugInterface {
    /// Bring up the debug module behind `transport`.
    ///
    /// Resets the DMI, verifies version and authentication, negotiates
    /// the CSR/memory access strategy and scans for harts.
    pub fn attach(transport: Box<dyn DmiTransport>) -> Result<Self, RiscvError> {
        let version = transport.version();
        if version != DebugVersion::V0_13 {
            return Err(UsageError::UnsupportedDebugVersion(version).into());
        }

        let mut interface = RiscvDebugInterface {
            transport,
            debug_version: version,
            last_dmi: 0,
            progbuf_size: 0,
            progbuf_cache: [0; 16],
            progbuf_cache_len: 0,
            implicit_ebreak: false,
            data_count: 1,
            supports_autoexec: false,
            harts: Vec::new(),
            current_hart: 0,
            csr_access: None,
            mem_access: None,
            dead: false,
            timeout: DEFAULT_TIMEOUT,
        };

        interface.enter_debug_mode()?;

        Ok(interface)
    }

    fn enter_debug_mode(&mut self) -> Result<(), RiscvError> {
        tracing::debug!(
            "initializing debug module behind DTM {:#010x}",
            self.transport.idcode()
        );

        self.transport_reset(true)?;

        let dmstatus: Dmstatus = self.read_dm_register()?;
        tracing::debug!("{:?}", dmstatus);

        match DebugVersion::from_dmstatus(dmstatus.version() as u8) {
            None => return Err(self.fatal(TransportError::NoDebugModule)),
            Some(version) if version != self.debug_version => {
                // The transport and the module disagree; the module knows
                // best, unless it does not know at all.
                tracing::warn!(
                    "dtmcs reports {} but dmstatus reports {}, trusting dmstatus",
                    self.debug_version,
                    version
                );
                if !matches!(version, DebugVersion::Unknown(_)) {
                    self.set_debug_version(version)?;
                }
            }
            Some(_) => {}
        }

        if !dmstatus.authenticated() {
            return Err(self.fatal(TransportError::Unauthenticated));
        }

        if dmstatus.confstrptrvalid() {
            tracing::debug!("target provides a configuration string");
        }

        self.implicit_ebreak = dmstatus.impebreak();

        let next_dm: NextDm = self.read_dm_register()?;
        if u32::from(next_dm) != 0 {
            tracing::warn!(
                "chained debug module at {:#010x} ignored, only one is supported",
                u32::from(next_dm)
            );
        }

        // Enable the debug module before issuing any abstract commands.
        let mut control = Dmcontrol::from(0);
        control.set_dmactive(true);
        self.write_dm_register(control)?;

        self.negotiate_access_methods()?;
        self.discover_harts()?;

        Ok(())
    }

    /// Set the debug specification version used for this session. Only
    /// version 0.13 is accepted.
    pub fn set_debug_version(&mut self, version: DebugVersion) -> Result<(), RiscvError> {
        match version {
            DebugVersion::V0_13 => {
                self.debug_version = version;
                Ok(())
            }
            other => Err(UsageError::UnsupportedDebugVersion(other).into()),
        }
    }

    /// The idcode of the transport this interface talks through.
    pub fn idcode(&self) -> u32 {
        self.transport.idcode()
    }

    /// The negotiated debug specification version.
    pub fn debug_version(&self) -> DebugVersion {
        self.debug_version
    }

    /// Width of the DMI address field.
    pub fn abits(&self) -> u8 {
        self.transport.abits()
    }

    /// Size of the program buffer in words.
    pub fn progbuf_size(&self) -> u8 {
        self.progbuf_size
    }

    /// Whether the hardware appends an implicit `ebreak` to the program
    /// buffer.
    pub fn implicit_ebreak(&self) -> bool {
        self.implicit_ebreak
    }

    /// Whether `data0` accesses can re-execute the last abstract command.
    pub fn supports_autoexec(&self) -> bool {
        self.supports_autoexec
    }

    /// Number of discovered harts.
    pub fn hart_count(&self) -> usize {
        self.harts.len()
    }

    /// Index of the currently selected hart.
    pub fn current_hart(&self) -> usize {
        self.current_hart
    }

    /// Replace the bound on busy-poll and retry loops.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn ensure_alive(&self) -> Result<(), RiscvError> {
        if self.dead {
            Err(UsageError::InterfaceDead.into())
        } else {
            Ok(())
        }
    }

    fn fatal(&mut self, error: TransportError) -> RiscvError {
        self.dead = true;
        RiscvError::Transport(error)
    }

    fn transport_reset(&mut self, hard: bool) -> Result<(), RiscvError> {
        match self.transport.reset(hard) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fatal(e.into())),
        }
    }

    /// Drive one operation over the DMI, retrying the busy-interrupt
    /// protocol until it commits or the timeout expires.
    fn dmi_access(&mut self, op: DmiOperation) -> Result<u32, RiscvError> {
        let payload = op.payload();
        let start = Instant::now();

        loop {
            let (value, status) = match self.transport.low_access(payload) {
                Ok(result) => result,
                Err(e) => return Err(self.fatal(e.into())),
            };

            match status {
                DmiOperationStatus::Ok => {
                    self.last_dmi = payload;
                    return Ok(value);
                }
                DmiOperationStatus::RequestInProgress => {
                    tracing::debug!("DMI busy, replaying the last committed scan");
                    self.recover_interrupted()?;
                }
                DmiOperationStatus::OperationFailed => {
                    tracing::warn!("DMI operation failed, resetting the interface");
                    if let Err(e) = self.transport.reset(false) {
                        return Err(self.fatal(e.into()));
                    }
                    return Err(self.fatal(TransportError::DmiFailed));
                }
                DmiOperationStatus::Reserved => {
                    return Err(self.fatal(TransportError::DmiFailed));
                }
            }

            if start.elapsed() > self.timeout {
                return Err(RiscvError::Timeout);
            }
        }
    }

    /// The target dropped the previous request: clear the sticky busy flag
    /// with `dmireset`, re-drive the dropped request by shifting the last
    /// committed payload again, and give the target extra idle time.
    fn recover_interrupted(&mut self) -> Result<(), RiscvError> {
        let replay = self.last_dmi;

        match self.replay_last_scan(replay) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fatal(e.into())),
        }
    }

    fn replay_last_scan(&mut self, replay: u64) -> Result<(), TapError> {
        self.transport.reset(false)?;
        self.transport.low_access(replay)?;

        let idle = self.transport.idle();
        if idle >= 2 {
            self.transport.run_idle(idle - 1)?;
        }

        Ok(())
    }

    fn dmi_read(&mut self, address: u8) -> Result<u32, RiscvError> {
        self.dmi_access(DmiOperation::Read {
            address: address as u32,
        })?;

        // The data shifted out by a NOP is the result of the read.
        self.dmi_access(DmiOperation::NoOp)
    }

    fn dmi_write(&mut self, address: u8, value: u32) -> Result<(), RiscvError> {
        self.dmi_access(DmiOperation::Write {
            address: address as u32,
            value,
        })?;

        Ok(())
    }

    fn read_dm_register<R: DebugRegister>(&mut self) -> Result<R, RiscvError> {
        let response = self.dmi_read(R::ADDRESS)?;

        tracing::debug!(
            "Read DM register '{}' at {:#04x} = {:#010x}",
            R::NAME,
            R::ADDRESS,
            response
        );

        Ok(response.into())
    }

    fn write_dm_register<R: DebugRegister>(&mut self, register: R) -> Result<(), RiscvError> {
        let value = register.into();

        tracing::debug!(
            "Write DM register '{}' at {:#04x} = {:#010x}",
            R::NAME,
            R::ADDRESS,
            value
        );

        self.dmi_write(R::ADDRESS, value)
    }

    /// Submit an abstract command and wait for it to complete.
    ///
    /// A `busy` command error is retried internally; any other non-zero
    /// `cmderr` is cleared and surfaced.
    fn execute_abstract_command(&mut self, command: u32) -> Result<(), RiscvError> {
        let start = Instant::now();

        loop {
            self.dmi_write(addr::COMMAND, command)?;

            let abstractcs = self.wait_for_abstract_command(start)?;
            let cmderr = AbstractCommandErrorKind::from_bits(abstractcs.cmderr() as u8);

            if cmderr == AbstractCommandErrorKind::None {
                return Ok(());
            }

            // Write ones to the field to clear the sticky error.
            let mut clear = Abstractcs::from(0);
            clear.set_cmderr(0x7);
            self.write_dm_register(clear)?;

            match cmderr {
                AbstractCommandErrorKind::Busy => {
                    tracing::debug!("abstract command engine busy, retrying");
                    if start.elapsed() > self.timeout {
                        return Err(RiscvError::Timeout);
                    }
                }
                AbstractCommandErrorKind::HaltResume => {
                    tracing::debug!(
                        "abstract command {:#010x} not supported in the current run/halt state",
                        command
                    );
                    return Err(RiscvError::AbstractCommand(cmderr));
                }
                other => return Err(RiscvError::AbstractCommand(other)),
            }
        }
    }

    fn wait_for_abstract_command(&mut self, start: Instant) -> Result<Abstractcs, RiscvError> {
        loop {
            let abstractcs: Abstractcs = self.read_dm_register()?;

            if !abstractcs.busy() {
                return Ok(abstractcs);
            }

            if start.elapsed() > self.timeout {
                return Err(RiscvError::Timeout);
            }
        }
    }

    /// Read a core register or CSR through the `access register` command.
    fn abstract_register_read(&mut self, regno: u16) -> Result<u32, RiscvError> {
        let mut command = AccessRegisterCommand::from(0);
        command.set_cmd_type(0);
        command.set_aarsize(BusAccess::A32);
        command.set_transfer(true);
        command.set_regno(regno as u32);

        self.execute_abstract_command(command.into())?;

        let value: Data0 = self.read_dm_register()?;
        Ok(value.into())
    }

    /// Write a core register or CSR through the `access register` command.
    fn abstract_register_write(&mut self, regno: u16, value: u32) -> Result<(), RiscvError> {
        self.write_dm_register(Data0(value))?;

        let mut command = AccessRegisterCommand::from(0);
        command.set_cmd_type(0);
        command.set_aarsize(BusAccess::A32);
        command.set_transfer(true);
        command.set_write(true);
        command.set_regno(regno as u32);

        self.execute_abstract_command(command.into())
    }

    fn arm_autoexec(&mut self, mask: u32) -> Result<(), RiscvError> {
        let mut abstractauto = Abstractauto::from(0);
        abstractauto.set_autoexecdata(mask);
        self.write_dm_register(abstractauto)
    }

    /// Read a run of consecutively numbered registers, accelerated with
    /// `autoexecdata` where the target supports it. Equivalent to the same
    /// number of single reads.
    fn read_registers(&mut self, first: u16, values: &mut [u32]) -> Result<(), RiscvError> {
        if values.len() > 1 && self.supports_autoexec {
            let result = self.read_registers_autoexec(first, values);
            self.arm_autoexec(0)?;
            result
        } else {
            for (i, value) in values.iter_mut().enumerate() {
                *value = self.abstract_register_read(first + i as u16)?;
            }
            Ok(())
        }
    }

    fn read_registers_autoexec(&mut self, first: u16, values: &mut [u32]) -> Result<(), RiscvError> {
        // One real submission with post-increment moves the first register
        // into data0.
        let mut command = AccessRegisterCommand::from(0);
        command.set_cmd_type(0);
        command.set_aarsize(BusAccess::A32);
        command.set_transfer(true);
        command.set_regno(first as u32);
        command.set_aarpostincrement(true);

        self.execute_abstract_command(command.into())?;

        // From here on every data0 access re-runs the command with the
        // incremented regno.
        self.arm_autoexec(0b1)?;

        for value in values.iter_mut() {
            let word: Data0 = self.read_dm_register()?;
            *value = word.into();

            // The re-execution is not gated by a submission, so completion
            // has to be polled explicitly.
            let start = Instant::now();
            self.wait_for_abstract_command(start)?;
        }

        Ok(())
    }

    /// Write a run of consecutively numbered registers, the counterpart to
    /// [`Self::read_registers`].
    fn write_registers(&mut self, first: u16, values: &[u32]) -> Result<(), RiscvError> {
        if values.len() > 1 && self.supports_autoexec {
            let result = self.write_registers_autoexec(first, values);
            self.arm_autoexec(0)?;
            result
        } else {
            for (i, value) in values.iter().enumerate() {
                self.abstract_register_write(first + i as u16, *value)?;
            }
            Ok(())
        }
    }

    fn write_registers_autoexec(&mut self, first: u16, values: &[u32]) -> Result<(), RiscvError> {
        self.write_dm_register(Data0(values[0]))?;

        let mut command = AccessRegisterCommand::from(0);
        command.set_cmd_type(0);
        command.set_aarsize(BusAccess::A32);
        command.set_transfer(true);
        command.set_write(true);
        command.set_regno(first as u32);
        command.set_aarpostincrement(true);

        self.execute_abstract_command(command.into())?;

        self.arm_autoexec(0b1)?;

        for value in &values[1..] {
            self.write_dm_register(Data0(*value))?;

            let start = Instant::now();
            self.wait_for_abstract_command(start)?;
        }

        Ok(())
    }

    fn write_progbuf(&mut self, index: usize, value: u32) -> Result<(), RiscvError> {
        match index {
            0 => self.write_dm_register(Progbuf0(value)),
            1 => self.write_dm_register(Progbuf1(value)),
            2 => self.write_dm_register(Progbuf2(value)),
            3 => self.write_dm_register(Progbuf3(value)),
            4 => self.write_dm_register(Progbuf4(value)),
            5 => self.write_dm_register(Progbuf5(value)),
            6 => self.write_dm_register(Progbuf6(value)),
            7 => self.write_dm_register(Progbuf7(value)),
            8 => self.write_dm_register(Progbuf8(value)),
            9 => self.write_dm_register(Progbuf9(value)),
            10 => self.write_dm_register(Progbuf10(value)),
            11 => self.write_dm_register(Progbuf11(value)),
            12 => self.write_dm_register(Progbuf12(value)),
            13 => self.write_dm_register(Progbuf13(value)),
            14 => self.write_dm_register(Progbuf14(value)),
            15 => self.write_dm_register(Progbuf15(value)),
            _ => Err(UsageError::ProgramBufferTooSmall {
                required: index + 1,
                capacity: 16,
            }
            .into()),
        }
    }

    /// Upload a program into the program buffer.
    ///
    /// When the hardware does not provide the implicit `ebreak`, one is
    /// appended so the hart always returns to debug mode; the program
    /// itself must not rely on an own terminator.
    fn setup_program_buffer(&mut self, program: &[u32]) -> Result<(), RiscvError> {
        let capacity = self.progbuf_size as usize;
        let required = program.len() + usize::from(!self.implicit_ebreak);

        if required > capacity {
            return Err(UsageError::ProgramBufferTooSmall { required, capacity }.into());
        }

        if program.len() == self.progbuf_cache_len
            && program == &self.progbuf_cache[..program.len()]
        {
            tracing::debug!("program buffer is up-to-date, skipping upload");
            return Ok(());
        }

        for (index, word) in program.iter().enumerate() {
            self.write_progbuf(index, *word)?;
        }

        if !self.implicit_ebreak || program.len() < capacity {
            self.write_progbuf(program.len(), assembly::EBREAK)?;
        }

        self.progbuf_cache[..program.len()].copy_from_slice(program);
        self.progbuf_cache_len = program.len();

        Ok(())
    }

    /// Execute the uploaded program with arguments passed in x1 upwards.
    ///
    /// `args[..in_len]` is copied into x1.. before execution and x1.. is
    /// copied back into `args[..out_len]` afterwards. The touched scratch
    /// registers are restored from the per-hart backup on every path, so a
    /// faulting program does not clobber the hart.
    fn execute_program_buffer(
        &mut self,
        args: &mut [u32],
        in_len: usize,
        out_len: usize,
    ) -> Result<(), RiscvError> {
        let backup_len = in_len.max(out_len);

        if backup_len > 31 || backup_len > args.len() {
            return Err(UsageError::TooManyArguments(backup_len).into());
        }

        let mut scratch = [0u32; 31];
        self.read_registers(GPR_BASE + 1, &mut scratch[..backup_len])?;
        self.harts[self.current_hart].gpr_backup[..backup_len]
            .copy_from_slice(&scratch[..backup_len]);

        self.write_registers(GPR_BASE + 1, &args[..in_len])?;

        let mut command = AccessRegisterCommand::from(0);
        command.set_cmd_type(0);
        command.set_postexec(true);

        let run = self.execute_abstract_command(command.into());

        if let Err(RiscvError::AbstractCommand(AbstractCommandErrorKind::Exception)) = &run {
            tracing::debug!("exception raised while executing the program buffer");
        }

        let copy_out = match run {
            Ok(()) => self.read_registers(GPR_BASE + 1, &mut args[..out_len]),
            Err(e) => Err(e),
        };

        let backup = self.harts[self.current_hart].gpr_backup;
        self.write_registers(GPR_BASE + 1, &backup[..backup_len])?;

        copy_out
    }

    /// Read `abstractcs`, validate the advertised capabilities and pick
    /// the CSR/memory access strategies this target can serve.
    fn negotiate_access_methods(&mut self) -> Result<(), RiscvError> {
        let abstractcs: Abstractcs = self.read_dm_register()?;

        self.progbuf_size = abstractcs.progbufsize() as u8;
        self.data_count = abstractcs.datacount() as u8;

        tracing::debug!(
            "program buffer size: {}, abstract data count: {}",
            self.progbuf_size,
            self.data_count
        );

        if !(1..=12).contains(&self.data_count) {
            return Err(self.fatal(TransportError::InvalidDataCount(self.data_count)));
        }
        if self.progbuf_size > 16 {
            return Err(self.fatal(TransportError::InvalidProgbufSize(self.progbuf_size)));
        }
        if self.progbuf_size == 1 && !self.implicit_ebreak {
            return Err(self.fatal(TransportError::MissingImpebreak));
        }

        if self.progbuf_size > 0 {
            self.csr_access = Some(CsrAccess::ProgramBuffer);
            self.mem_access = Some(MemAccess::ProgramBuffer);
        } else {
            self.csr_access = Some(CsrAccess::Abstract);
            // `access memory` places the address in data1.
            self.mem_access = (self.data_count >= 2).then_some(MemAccess::Abstract);
        }

        // Find out whether accessing data0 can re-run commands.
        let mut abstractauto = Abstractauto::from(0);
        abstractauto.set_autoexecdata(AUTOEXEC_PROBE_PATTERN);
        self.write_dm_register(abstractauto)?;

        let readback: Abstractauto = self.read_dm_register()?;
        self.supports_autoexec = readback.autoexecdata() == AUTOEXEC_PROBE_PATTERN;
        tracing::debug!("support for autoexecdata: {}", self.supports_autoexec);

        self.write_dm_register(Abstractauto::from(0))?;

        Ok(())
    }

    fn select_hartsel(&mut self, hartsel: u32) -> Result<(), RiscvError> {
        let mut dmcontrol = Dmcontrol::from(0);
        dmcontrol.set_dmactive(true);
        dmcontrol.set_hartsel(hartsel);
        self.write_dm_register(dmcontrol)
    }

    /// Find the harts behind this debug module.
    ///
    /// Writing all-ones to `hartsel` and reading it back reveals how many
    /// selector bits the hardware implements; the scan then walks the
    /// indices until the module flags a nonexistent hart.
    fn discover_harts(&mut self) -> Result<(), RiscvError> {
        self.select_hartsel(0xfffff)?;

        let readback: Dmcontrol = self.read_dm_register()?;
        let hartsellen = readback.hartsel();
        tracing::debug!("hartsellen = {:#07x}", hartsellen);

        for index in 0..=hartsellen {
            if self.harts.len() >= MAX_HARTS {
                break;
            }

            self.select_hartsel(index)?;

            let dmstatus: Dmstatus = self.read_dm_register()?;
            if dmstatus.anynonexistent() {
                tracing::debug!("hart {} does not exist, stopping the scan", index);
                break;
            }

            self.harts.push(Hart::new(index));
        }

        tracing::debug!("discovered {} harts", self.harts.len());

        if self.harts.is_empty() {
            return Err(self.fatal(TransportError::NoHarts));
        }

        self.select_hartsel(0)?;
        self.current_hart = 0;

        Ok(())
    }

    /// Select the hart subsequent operations address.
    pub fn select_hart(&mut self, index: usize) -> Result<(), RiscvError> {
        self.ensure_alive()?;

        let hartsel = self
            .harts
            .get(index)
            .ok_or(UsageError::NoHart(index))?
            .index;

        self.select_hartsel(hartsel)?;
        self.current_hart = index;

        Ok(())
    }

    /// The `mhartid` of the currently selected hart, read on first use.
    pub fn hart_id(&mut self) -> Result<u32, RiscvError> {
        self.ensure_alive()?;

        if let Some(mhartid) = self.harts[self.current_hart].mhartid {
            return Ok(mhartid);
        }

        let mhartid = self.read_csr(CSR_MHARTID)?;
        self.harts[self.current_hart].mhartid = Some(mhartid);

        Ok(mhartid)
    }

    /// Read a CSR of the current hart.
    pub fn read_csr(&mut self, csr: u16) -> Result<u32, RiscvError> {
        self.ensure_alive()?;

        match self.csr_access {
            Some(CsrAccess::Abstract) => self.abstract_register_read(csr),
            Some(CsrAccess::ProgramBuffer) => self.read_csr_progbuf(csr),
            None => Err(UsageError::NoAccessMethod.into()),
        }
    }

    /// Write a CSR of the current hart.
    pub fn write_csr(&mut self, csr: u16, value: u32) -> Result<(), RiscvError> {
        self.ensure_alive()?;

        match self.csr_access {
            Some(CsrAccess::Abstract) => self.abstract_register_write(csr, value),
            Some(CsrAccess::ProgramBuffer) => self.write_csr_progbuf(csr, value),
            None => Err(UsageError::NoAccessMethod.into()),
        }
    }

    /// Read one word of target memory.
    pub fn read_mem(&mut self, address: u32) -> Result<u32, RiscvError> {
        self.ensure_alive()?;

        match self.mem_access {
            Some(MemAccess::Abstract) => self.abstract_mem_read(address),
            Some(MemAccess::ProgramBuffer) => self.read_mem_progbuf(address),
            None => Err(UsageError::NoAccessMethod.into()),
        }
    }

    /// Write one word of target memory.
    pub fn write_mem(&mut self, address: u32, value: u32) -> Result<(), RiscvError> {
        self.ensure_alive()?;

        match self.mem_access {
            Some(MemAccess::Abstract) => self.abstract_mem_write(address, value),
            Some(MemAccess::ProgramBuffer) => self.write_mem_progbuf(address, value),
            None => Err(UsageError::NoAccessMethod.into()),
        }
    }

    fn read_csr_progbuf(&mut self, csr: u16) -> Result<u32, RiscvError> {
        // csrrs x1, csr, x0 leaves the value in x1.
        self.setup_program_buffer(&[assembly::csrrs(1, csr as u32, 0)])?;

        let mut args = [0u32; 1];
        self.execute_program_buffer(&mut args, 0, 1)?;

        Ok(args[0])
    }

    fn write_csr_progbuf(&mut self, csr: u16, value: u32) -> Result<(), RiscvError> {
        // csrrw x0, csr, x1 writes x1 without reading the old value.
        self.setup_program_buffer(&[assembly::csrrw(0, csr as u32, 1)])?;

        let mut args = [value];
        self.execute_program_buffer(&mut args, 1, 0)
    }

    fn read_mem_progbuf(&mut self, address: u32) -> Result<u32, RiscvError> {
        // lw x1, 0(x1)
        self.setup_program_buffer(&[assembly::lw(0, 1, BusAccess::A32 as u32, 1)])?;

        let mut args = [address];
        self.execute_program_buffer(&mut args, 1, 1)?;

        Ok(args[0])
    }

    fn write_mem_progbuf(&mut self, address: u32, value: u32) -> Result<(), RiscvError> {
        // sw x2, 0(x1)
        self.setup_program_buffer(&[assembly::sw(0, 1, BusAccess::A32 as u32, 2)])?;

        let mut args = [address, value];
        self.execute_program_buffer(&mut args, 2, 0)
    }

    fn abstract_mem_read(&mut self, address: u32) -> Result<u32, RiscvError> {
        self.write_dm_register(Data1(address))?;

        let mut command = AccessMemoryCommand::from(0);
        command.set_aamsize(BusAccess::A32);

        self.execute_abstract_command(command.into())?;

        let value: Data0 = self.read_dm_register()?;
        Ok(value.into())
    }

    fn abstract_mem_write(&mut self, address: u32, value: u32) -> Result<(), RiscvError> {
        self.write_dm_register(Data1(address))?;
        self.write_dm_register(Data0(value))?;

        let mut command = AccessMemoryCommand::from(0);
        command.set_aamsize(BusAccess::A32);
        command.set_write(true);

        self.execute_abstract_command(command.into())
    }
}

/// Shared handle to a [`RiscvDebugInterface`].
///
/// Cloning the handle shares the interface, dropping the last clone
/// destroys it. This lets independent driver modules (transport glue,
/// target glue) hold the same session without an owner hierarchy.
#[derive(Debug, Clone)]
pub struct RiscvDebugHandle(Rc<RefCell<RiscvDebugInterface>>);

impl RiscvDebugHandle {
    pub fn new(interface: RiscvDebugInterface) -> Self {
        RiscvDebugHandle(Rc::new(RefCell::new(interface)))
    }

    /// Number of live handles to this interface.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn read_csr(&self, csr: u16) -> Result<u32, RiscvError> {
        self.0.borrow_mut().read_csr(csr)
    }

    pub fn write_csr(&self, csr: u16, value: u32) -> Result<(), RiscvError> {
        self.0.borrow_mut().write_csr(csr, value)
    }

    pub fn read_mem(&self, address: u32) -> Result<u32, RiscvError> {
        self.0.borrow_mut().read_mem(address)
    }

    pub fn write_mem(&self, address: u32, value: u32) -> Result<(), RiscvError> {
        self.0.borrow_mut().write_mem(address, value)
    }

    pub fn select_hart(&self, index: usize) -> Result<(), RiscvError> {
        self.0.borrow_mut().select_hart(index)
    }

    pub fn hart_count(&self) -> usize {
        self.0.borrow().hart_count()
    }

    pub fn hart_id(&self) -> Result<u32, RiscvError> {
        self.0.borrow_mut().hart_id()
    }
}
