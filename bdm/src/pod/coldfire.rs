//! Run state tracking shared by the ColdFire pods.
//!
//! The parallel port and USB pods reach the debug module very differently,
//! but reconcile target status, step, run and maintain the caches the same
//! way. [`ColdFireCore`] holds that logic on top of a handful of register
//! primitives each pod provides.

use crate::error::BdmError;
use crate::registers::{
    coldfire_debug_alias, locate, Location, RegisterMode, ShadowRegisters, SysReg,
};
use crate::revision::{Capabilities, DebugRevision};
use crate::status::{status_from_pst, TargetStatus, CSR_BKPT, CSR_HALT, CSR_STOP_MASK};

use super::{invalid_register, Processor};

/// Debug module number of the CSR.
pub(crate) const CSR: u8 = 0x0;

/// Interrupt priority mask bits of SR.
const SR_INTERRUPT_MASK: u32 = 0x0700;

/// Session state of a ColdFire target.
#[derive(Debug, Clone)]
pub struct ColdFireState {
    pub revision: DebugRevision,
    pub caps: Capabilities,
    pub use_pst: bool,
    /// Whether the target is believed to be executing code.
    pub running: bool,
    /// The CSR as of the last halt. While the target is halted this is
    /// reported instead of reading the CSR again, which would lose the
    /// halt reason.
    pub csr: u32,
    pub mask_saved: bool,
    /// SR interrupt mask as it was before the first step.
    pub saved_mask: u32,
    pub shadow: ShadowRegisters,
}

impl ColdFireState {
    pub fn new(revision: DebugRevision) -> Self {
        ColdFireState {
            revision,
            caps: revision.capabilities(),
            use_pst: false,
            running: true,
            csr: 0,
            mask_saved: false,
            saved_mask: 0,
            shadow: ShadowRegisters::default(),
        }
    }
}

pub(crate) trait ColdFireCore {
    /// CSR value requesting a single step.
    const STEP_CSR: u32;

    fn state(&self) -> &ColdFireState;

    fn state_mut(&mut self) -> &mut ColdFireState;

    /// The status bits the pod can tell without asking the debug module.
    fn link_status(&mut self) -> Result<TargetStatus, BdmError>;

    fn read_pst(&mut self) -> Result<Option<u8>, BdmError> {
        Ok(None)
    }

    fn read_creg(&mut self, address: u16) -> Result<u32, BdmError>;

    fn write_creg(&mut self, address: u16, value: u32) -> Result<(), BdmError>;

    fn read_dreg(&mut self, number: u8) -> Result<u32, BdmError>;

    fn write_dreg(&mut self, number: u8, value: u32) -> Result<(), BdmError>;

    fn go(&mut self) -> Result<(), BdmError>;

    /// Resume execution for a single step, the CSR already being set up.
    fn step_go(&mut self) -> Result<(), BdmError> {
        self.go()
    }

    /// Read the CSR and start tracking the revision it reports.
    fn detect_revision(&mut self) -> Result<DebugRevision, BdmError> {
        let csr = self.read_dreg(CSR)?;
        let revision = DebugRevision::from_csr(csr);
        let use_pst = self.state().use_pst;

        let state = self.state_mut();
        *state = ColdFireState::new(revision);
        state.use_pst = use_pst && state.caps.pst_lines;
        state.csr = csr & CSR_STOP_MASK;

        tracing::debug!("ColdFire debug module {}, CSR {:#010x}", revision, csr);
        Ok(revision)
    }

    fn reconcile_status(&mut self) -> Result<TargetStatus, BdmError> {
        let link = self.link_status()?;
        if !link.is_empty() {
            return Ok(link);
        }

        if self.state().use_pst {
            if let Some(pst) = self.read_pst()? {
                let status = status_from_pst(pst);
                self.track_run_state(status)?;
                return Ok(status);
            }
        }

        if !self.state().running {
            return Ok(TargetStatus::from_csr(self.state().csr));
        }

        let csr = self.read_csr()?;
        if csr & CSR_STOP_MASK == 0 {
            return Ok(TargetStatus::empty());
        }

        if self.confirm_halt() {
            tracing::debug!("Target halted, CSR {:#010x}", csr);
            let state = self.state_mut();
            state.csr = csr;
            state.running = false;
            self.invalidate_cache()?;
            Ok(TargetStatus::from_csr(csr))
        } else {
            tracing::debug!("Halt indication in CSR {:#010x} not confirmed", csr);
            self.state_mut().csr &= !CSR_STOP_MASK;
            Ok(TargetStatus::from_csr(csr & !CSR_STOP_MASK))
        }
    }

    /// The halt bits in CSR can be produced by a bit error on the serial
    /// line. Only a core that answers two program counter reads in a row is
    /// really halted.
    fn confirm_halt(&mut self) -> bool {
        for _ in 0..2 {
            if let Err(e) = self.read_mapped(SysReg::Rpc) {
                tracing::debug!("PC read failed while confirming halt: {}", e);
                return false;
            }
        }
        true
    }

    /// Follow a run state change seen on the PST lines. The cached CSR is
    /// kept in line so the status stays right once PST decoding is off.
    fn track_run_state(&mut self, status: TargetStatus) -> Result<(), BdmError> {
        let halted = status.is_halted();
        let was_running = self.state().running;
        let state = self.state_mut();
        state.running = !halted;
        if !halted {
            state.csr = 0;
        } else if was_running {
            state.csr = if status.contains(TargetStatus::HALT) {
                CSR_HALT
            } else {
                CSR_BKPT
            };
            self.invalidate_cache()?;
        }
        Ok(())
    }

    /// Invalidate the caches so that no instruction fetched before the
    /// halt is executed after it. A zero CACR means the caches were never
    /// enabled and is left alone.
    fn invalidate_cache(&mut self) -> Result<(), BdmError> {
        let cacr = self.read_mapped(SysReg::Cacr)?;
        if cacr == 0 {
            return Ok(());
        }
        let bits = self.state().caps.cache_invalidate;
        tracing::debug!("Invalidating caches, CACR {:#010x}", cacr);
        self.write_mapped(SysReg::Cacr, cacr | bits)
    }

    /// Read the CSR, keeping halt bits latched earlier so a read of the
    /// register does not make the status reconciliation miss a halt.
    fn read_csr(&mut self) -> Result<u32, BdmError> {
        let value = self.read_dreg(CSR)? | (self.state().csr & CSR_STOP_MASK);
        if self.state().running {
            self.state_mut().csr = value & CSR_STOP_MASK;
        }
        Ok(value)
    }

    fn read_mapped(&mut self, reg: SysReg) -> Result<u32, BdmError> {
        match locate(Processor::ColdFire, reg) {
            Location::Unimplemented => Ok(0),
            Location::Control(address) => self.read_creg(address),
            Location::Debug(_) => self.read_csr(),
            Location::WriteOnlyDebug(_) => Ok(self.state().shadow.get(reg)),
            Location::System(_) | Location::Cpu32Mbar => {
                Err(invalid_register(reg.id(), RegisterMode::Mapped))
            }
        }
    }

    fn write_mapped(&mut self, reg: SysReg, value: u32) -> Result<(), BdmError> {
        match locate(Processor::ColdFire, reg) {
            Location::Unimplemented => Ok(()),
            Location::Control(address) => self.write_creg(address, value),
            Location::Debug(number) => self.write_dreg(number, value),
            Location::WriteOnlyDebug(number) => {
                self.write_dreg(number, value)?;
                self.state_mut().shadow.set(reg, value);
                Ok(())
            }
            Location::System(_) | Location::Cpu32Mbar => {
                Err(invalid_register(reg.id(), RegisterMode::Mapped))
            }
        }
    }

    fn cf_read_sysreg(&mut self, id: u16, mode: RegisterMode) -> Result<u32, BdmError> {
        match mode {
            RegisterMode::Mapped => {
                let reg = SysReg::from_id(id).ok_or_else(|| invalid_register(id, mode))?;
                self.read_mapped(reg)
            }
            RegisterMode::Control => self.read_creg(id),
            RegisterMode::Debug => {
                let number = debug_number(id)?;
                match coldfire_debug_alias(number) {
                    Some(reg) => self.read_mapped(reg),
                    None => self.read_dreg(number),
                }
            }
        }
    }

    fn cf_write_sysreg(
        &mut self,
        id: u16,
        mode: RegisterMode,
        value: u32,
    ) -> Result<(), BdmError> {
        match mode {
            RegisterMode::Mapped => {
                let reg = SysReg::from_id(id).ok_or_else(|| invalid_register(id, mode))?;
                self.write_mapped(reg, value)
            }
            RegisterMode::Control => self.write_creg(id, value),
            RegisterMode::Debug => {
                let number = debug_number(id)?;
                match coldfire_debug_alias(number) {
                    Some(reg) => self.write_mapped(reg, value),
                    None => self.write_dreg(number, value),
                }
            }
        }
    }

    /// Write the current PC back. Revision D cores otherwise may execute
    /// a stale prefetched instruction after a step.
    fn rewrite_pc(&mut self) -> Result<(), BdmError> {
        let pc = self.read_mapped(SysReg::Rpc)?;
        self.write_mapped(SysReg::Rpc, pc)
    }

    fn cf_step(&mut self) -> Result<(), BdmError> {
        self.invalidate_cache()?;

        if self.state().caps.interrupt_mask_save {
            let sr = self.read_mapped(SysReg::Sr)?;
            let state = self.state_mut();
            if !state.mask_saved {
                state.saved_mask = sr & SR_INTERRUPT_MASK;
                state.mask_saved = true;
            }
            self.write_mapped(SysReg::Sr, sr | SR_INTERRUPT_MASK)?;
            self.rewrite_pc()?;
        }

        self.write_mapped(SysReg::Csr, Self::STEP_CSR)?;
        self.step_go()?;

        // The CSR is not read back after a step, report a breakpoint halt.
        let state = self.state_mut();
        state.running = false;
        state.csr = CSR_BKPT;
        Ok(())
    }

    fn cf_run(&mut self) -> Result<(), BdmError> {
        self.invalidate_cache()?;

        if self.state().caps.interrupt_mask_save {
            if self.state().mask_saved {
                let sr = self.read_mapped(SysReg::Sr)?;
                let mask = self.state().saved_mask;
                self.write_mapped(SysReg::Sr, (sr & !SR_INTERRUPT_MASK) | mask)?;
                self.state_mut().mask_saved = false;
            }
            self.rewrite_pc()?;
        }

        // The driver sets no CSR bits but the step request, clear them.
        self.write_mapped(SysReg::Csr, 0)?;
        self.go()?;

        let state = self.state_mut();
        state.running = true;
        state.csr = 0;
        Ok(())
    }
}

fn debug_number(id: u16) -> Result<u8, BdmError> {
    u8::try_from(id)
        .ok()
        .filter(|number| *number < 0x10)
        .ok_or_else(|| invalid_register(id, RegisterMode::Debug))
}
