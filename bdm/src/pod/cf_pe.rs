//! ColdFire targets on the P&E parallel port pod.

use std::fmt;

use crate::command::Command;
use crate::config::{BdmConfig, StopPolicy};
use crate::error::{BdmError, Fault};
use crate::link::{split, BdmWire, SerialLink};
use crate::port::Lines;
use crate::registers::{ProReg, RegisterMode};
use crate::revision::DebugRevision;
use crate::status::{TargetStatus, CSR_IPI, CSR_SSM};

use super::coldfire::{ColdFireCore, ColdFireState};
use super::{Interface, Pod};

/// A ColdFire target on a P&E parallel port pod.
pub struct ColdFirePe<W> {
    link: SerialLink<W>,
    state: ColdFireState,
    stop: StopPolicy,
}

impl<W: BdmWire> ColdFirePe<W> {
    pub fn new(wire: W, config: &BdmConfig) -> Self {
        let mut state = ColdFireState::new(DebugRevision::A);
        state.use_pst = config.use_pst;
        ColdFirePe {
            link: SerialLink::new(wire, config),
            state,
            stop: config.stop,
        }
    }

    pub fn link(&self) -> &SerialLink<W> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut SerialLink<W> {
        &mut self.link
    }

    pub fn state(&self) -> &ColdFireState {
        &self.state
    }
}

impl<W> fmt::Debug for ColdFirePe<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColdFirePe")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<W: BdmWire> ColdFireCore for ColdFirePe<W> {
    const STEP_CSR: u32 = CSR_SSM | CSR_IPI;

    fn state(&self) -> &ColdFireState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ColdFireState {
        &mut self.state
    }

    fn link_status(&mut self) -> Result<TargetStatus, BdmError> {
        // The P&E pod has no freeze line, the debug module tells.
        Ok(self.link.pin_status()?.target_status() - TargetStatus::HALT)
    }

    fn read_pst(&mut self) -> Result<Option<u8>, BdmError> {
        self.link.read_pst()
    }

    fn read_creg(&mut self, address: u16) -> Result<u32, BdmError> {
        self.link
            .read_long(Command::ReadControlRegister, &split(address as u32))
    }

    fn write_creg(&mut self, address: u16, value: u32) -> Result<(), BdmError> {
        self.link
            .write_long(Command::WriteControlRegister, &split(address as u32), value)
    }

    fn read_dreg(&mut self, number: u8) -> Result<u32, BdmError> {
        self.link.read_long(Command::ReadDebugRegister(number), &[])
    }

    fn write_dreg(&mut self, number: u8, value: u32) -> Result<(), BdmError> {
        self.link
            .write_long(Command::WriteDebugRegister(number), &[], value)
    }

    fn go(&mut self) -> Result<(), BdmError> {
        self.link.send(Command::Go, &[])
    }
}

impl<W: BdmWire> Pod for ColdFirePe<W> {
    fn interface(&self) -> Interface {
        Interface::ColdFirePe
    }

    fn revision(&self) -> Option<DebugRevision> {
        Some(self.state.revision)
    }

    fn init_hardware(&mut self) -> Result<TargetStatus, BdmError> {
        self.link.drive(Lines::empty())?;

        let status = self.link_status()?;
        if !status.is_empty() {
            tracing::debug!("Target not accessible at init: {:?}", status);
            return Ok(status);
        }

        self.detect_revision()?;
        self.link.configure(&self.state.caps);
        self.reconcile_status()
    }

    fn get_status(&mut self) -> Result<TargetStatus, BdmError> {
        self.reconcile_status()
    }

    fn reset_chip(&mut self) -> Result<(), BdmError> {
        self.link.reset_sequence()?;
        self.state.running = true;
        self.state.csr = 0;
        Ok(())
    }

    fn release_chip(&mut self) -> Result<(), BdmError> {
        self.link.release_sequence()?;
        self.state.running = true;
        self.state.csr = 0;
        Ok(())
    }

    fn stop_chip(&mut self) -> Result<(), BdmError> {
        self.link.drive(Lines::BKPT)?;
        for _ in 0..self.stop.attempts {
            let status = self.reconcile_status()?;
            if status.is_halted() {
                self.link.drive(Lines::empty())?;
                return Ok(());
            }
            self.link.sleep(self.stop.delay());
        }
        self.link.drive(Lines::empty())?;
        Err(Fault::Response.into())
    }

    fn run_chip(&mut self) -> Result<(), BdmError> {
        self.cf_run()
    }

    fn step_chip(&mut self) -> Result<(), BdmError> {
        self.cf_step()
    }

    fn gen_bus_error(&mut self) -> Result<Fault, BdmError> {
        self.link.gen_bus_error()
    }

    fn read_sysreg(&mut self, id: u16, mode: RegisterMode) -> Result<u32, BdmError> {
        self.cf_read_sysreg(id, mode)
    }

    fn write_sysreg(&mut self, id: u16, mode: RegisterMode, value: u32) -> Result<(), BdmError> {
        self.cf_write_sysreg(id, mode, value)
    }

    fn read_proreg(&mut self, reg: ProReg) -> Result<u32, BdmError> {
        self.link
            .read_long(Command::ReadRegister(reg.number()), &[])
    }

    fn write_proreg(&mut self, reg: ProReg, value: u32) -> Result<(), BdmError> {
        self.link
            .write_long(Command::WriteRegister(reg.number()), &[], value)
    }

    fn read_memory(&mut self, address: u32, data: &mut [u8]) -> Result<(), BdmError> {
        self.link.read_memory(address, data)
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), BdmError> {
        self.link.write_memory(address, data)
    }

    fn set_delay(&mut self, ticks: u32) {
        self.link.set_delay(ticks);
    }

    fn delay(&self) -> u32 {
        self.link.delay()
    }

    fn set_use_pst(&mut self, use_pst: bool) -> Result<(), BdmError> {
        if use_pst && (!self.state.caps.pst_lines || self.link.read_pst()?.is_none()) {
            return Err(BdmError::Unsupported("processor status lines"));
        }
        self.state.use_pst = use_pst;
        Ok(())
    }

    fn set_debug(&mut self, debug: bool) {
        self.link.set_debug(debug);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Size;
    use crate::registers::SysReg;
    use crate::status::CSR_BKPT;
    use crate::test::{Frame, SimWire, CACR};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn open(revision: DebugRevision) -> ColdFirePe<SimWire> {
        let mut pod = ColdFirePe::new(SimWire::coldfire(revision), &BdmConfig::default());
        pod.init_hardware().unwrap();
        pod.link_mut().wire_mut().target().clear_log();
        pod
    }

    fn target(pod: &mut ColdFirePe<SimWire>) -> &mut crate::test::SimTarget {
        pod.link_mut().wire_mut().target()
    }

    #[test]
    fn init_detects_revision() {
        for revision in [DebugRevision::A, DebugRevision::B, DebugRevision::C, DebugRevision::D] {
            let pod = open(revision);
            assert_eq!(pod.revision(), Some(revision));
        }
    }

    #[test]
    fn init_without_power_reports_status() {
        let mut wire = SimWire::coldfire(DebugRevision::C);
        wire.target().pins.powered = false;
        let mut pod = ColdFirePe::new(wire, &BdmConfig::default());

        assert_eq!(pod.init_hardware().unwrap(), TargetStatus::POWER);
    }

    #[test]
    fn write_only_registers_are_served_from_shadow() {
        let mut pod = open(DebugRevision::B);
        target(&mut pod).forbid_write_only_reads = true;

        for reg in SysReg::all().filter(|reg| *reg > SysReg::Csr) {
            let value = 0x1000_0000 | reg.id() as u32;
            pod.write_sysreg(reg.id(), RegisterMode::Mapped, value)
                .unwrap();
            assert_eq!(pod.read_sysreg(reg.id(), RegisterMode::Mapped).unwrap(), value);
        }
        // Raw debug numbers of the same registers take the mapped path.
        assert_eq!(
            pod.read_sysreg(0x7, RegisterMode::Debug).unwrap(),
            0x1000_0000 | SysReg::Tdr.id() as u32
        );
    }

    #[test]
    fn unimplemented_registers_read_zero_and_drop_writes() {
        let mut pod = open(DebugRevision::A);
        pod.write_sysreg(SysReg::Pcc.id(), RegisterMode::Mapped, 0x1234)
            .unwrap();
        assert_eq!(pod.read_sysreg(SysReg::Pcc.id(), RegisterMode::Mapped).unwrap(), 0);
        assert!(target(&mut pod).frames.is_empty());
    }

    #[test]
    fn unknown_register_id_is_rejected() {
        let mut pod = open(DebugRevision::A);
        let err = pod.read_sysreg(99, RegisterMode::Mapped).unwrap_err();
        assert_eq!(err.fault(), Fault::InvalidCommand);
        let err = pod.read_sysreg(0x10, RegisterMode::Debug).unwrap_err();
        assert!(matches!(err, BdmError::InvalidRegister(_)));
    }

    #[test]
    fn control_and_general_registers() {
        let mut pod = open(DebugRevision::C);
        pod.write_sysreg(0x801, RegisterMode::Control, 0x2000_0000)
            .unwrap();
        assert_eq!(pod.read_sysreg(SysReg::Vbr.id(), RegisterMode::Mapped).unwrap(), 0x2000_0000);

        pod.write_proreg(ProReg::A7, 0x0040_0000).unwrap();
        assert_eq!(pod.read_proreg(ProReg::A7).unwrap(), 0x0040_0000);
        assert_eq!(target(&mut pod).regs[0xF], 0x0040_0000);
    }

    #[test]
    fn halt_needs_two_pc_reads() {
        let mut pod = open(DebugRevision::C);
        {
            let target = target(&mut pod);
            target.regs_control.insert(CACR, 0x8000_0000);
            target.halt(0x0200_0000);
            target.rpc_failures.push_back(true);
        }

        assert_eq!(pod.get_status().unwrap(), TargetStatus::empty());
        assert!(pod.state().running);
        assert_eq!(target(&mut pod).control_writes(CACR), 0);
    }

    #[test]
    fn confirmed_halt_invalidates_cache_once() {
        let mut pod = open(DebugRevision::C);
        {
            let target = target(&mut pod);
            target.regs_control.insert(CACR, 0x8000_0000);
            target.halt(0x0200_0000);
        }

        assert_eq!(pod.get_status().unwrap(), TargetStatus::HALT);
        assert!(!pod.state().running);
        assert_eq!(target(&mut pod).control_writes(CACR), 1);
        assert_eq!(target(&mut pod).regs_control[&CACR], 0x8104_0100);

        // Halted, so the cached CSR answers without touching the target.
        target(&mut pod).clear_log();
        assert_eq!(pod.get_status().unwrap(), TargetStatus::HALT);
        assert!(target(&mut pod).frames.is_empty());
    }

    #[test]
    fn zero_cacr_is_left_alone() {
        let mut pod = open(DebugRevision::A);
        target(&mut pod).halt(0x0200_0000);
        assert_eq!(pod.get_status().unwrap(), TargetStatus::HALT);
        assert_eq!(target(&mut pod).control_writes(CACR), 0);
    }

    #[test]
    fn step_on_revision_d_saves_mask_once() {
        let mut pod = open(DebugRevision::D);
        target(&mut pod).regs_control.insert(0x80E, 0x2004);

        pod.step_chip().unwrap();
        assert_eq!(target(&mut pod).regs_control[&0x80E], 0x2704);
        assert!(pod.state().mask_saved);
        assert_eq!(pod.state().saved_mask, 0x0000);

        pod.step_chip().unwrap();
        assert_eq!(pod.state().saved_mask, 0x0000);
        assert_eq!(pod.get_status().unwrap(), TargetStatus::STOPPED);
        assert_eq!(pod.state().csr, CSR_BKPT);

        pod.run_chip().unwrap();
        assert_eq!(target(&mut pod).regs_control[&0x80E], 0x2004);
        assert!(!pod.state().mask_saved);

        target(&mut pod).clear_log();
        pod.run_chip().unwrap();
        assert_eq!(target(&mut pod).control_writes(0x80E), 0);
    }

    #[test]
    fn step_writes_back_pc_on_revision_d() {
        let mut pod = open(DebugRevision::D);
        target(&mut pod).regs_control.insert(0x80F, 0x0001_0000);

        pod.step_chip().unwrap();

        let target = target(&mut pod);
        assert_eq!(target.control_writes(0x80F), 1);
        assert_eq!(target.regs_debug[0], 0x30);
        assert_eq!(target.count(Frame::Command(Command::Go)), 1);
    }

    #[test]
    fn step_before_revision_d_leaves_sr_alone() {
        let mut pod = open(DebugRevision::B);
        target(&mut pod).regs_control.insert(0x80E, 0x2004);

        pod.step_chip().unwrap();
        pod.run_chip().unwrap();

        let target = target(&mut pod);
        assert_eq!(target.control_writes(0x80E), 0);
        assert_eq!(target.control_writes(0x80F), 0);
        assert_eq!(target.regs_debug[0], 0);
    }

    #[test]
    fn stop_asserts_breakpoint_until_halted() {
        let mut pod = open(DebugRevision::C);

        pod.stop_chip().unwrap();

        assert_eq!(pod.get_status().unwrap(), TargetStatus::STOPPED);
        assert_eq!(target(&mut pod).lines, Lines::empty());
    }

    #[test]
    fn stop_gives_up_on_a_dead_target() {
        let mut pod = open(DebugRevision::C);
        target(&mut pod).ignore_breakpoint = true;

        let err = pod.stop_chip().unwrap_err();
        assert_eq!(err.as_fault(), Some(Fault::Response));
    }

    #[test]
    fn restart_comes_up_halted() {
        let mut pod = open(DebugRevision::C);
        pod.restart_chip().unwrap();
        assert!(!pod.state().running);
        assert_eq!(
            target(&mut pod).line_log,
            vec![
                Lines::empty(),
                Lines::RESET | Lines::BKPT,
                Lines::BKPT,
                Lines::empty()
            ]
        );
    }

    #[test]
    fn release_lets_the_target_run() {
        let mut pod = open(DebugRevision::C);
        pod.release_chip().unwrap();
        assert_eq!(pod.get_status().unwrap(), TargetStatus::empty());
        assert_eq!(
            target(&mut pod).line_log,
            vec![Lines::empty(), Lines::RESET, Lines::empty()]
        );
    }

    #[test]
    fn pst_status() {
        let mut pod = open(DebugRevision::C);
        pod.set_use_pst(true).unwrap();
        target(&mut pod).regs_control.insert(CACR, 0x8000_0000);

        target(&mut pod).pst = Some(0x3);
        assert_eq!(pod.get_status().unwrap(), TargetStatus::empty());
        target(&mut pod).pst = Some(0xF);
        assert_eq!(pod.get_status().unwrap(), TargetStatus::HALT);
        assert_eq!(target(&mut pod).control_writes(CACR), 1);
        target(&mut pod).pst = Some(0xE);
        assert_eq!(pod.get_status().unwrap(), TargetStatus::STOPPED);
        assert_eq!(target(&mut pod).control_writes(CACR), 1);
    }

    #[test_case(0xF, TargetStatus::HALT ; "halted")]
    #[test_case(0xE, TargetStatus::STOPPED ; "stopped")]
    #[test_case(0x3, TargetStatus::empty() ; "running")]
    fn status_survives_turning_pst_off(pst: u8, status: TargetStatus) {
        let mut pod = open(DebugRevision::C);
        pod.set_use_pst(true).unwrap();
        target(&mut pod).pst = Some(pst);
        assert_eq!(pod.get_status().unwrap(), status);

        pod.set_use_pst(false).unwrap();
        assert_eq!(pod.get_status().unwrap(), status);
    }

    #[test]
    fn pst_unavailable_on_revision_d() {
        let mut pod = open(DebugRevision::D);
        assert!(matches!(pod.set_use_pst(true), Err(BdmError::Unsupported(_))));
        pod.set_use_pst(false).unwrap();
    }

    #[test]
    fn memory_through_the_pod() {
        let mut pod = open(DebugRevision::A);
        pod.write_long(0x1000, 0xDEAD_BEEF).unwrap();
        assert_eq!(pod.read_word(0x1002).unwrap(), 0xBEEF);
        assert_eq!(pod.read_byte(0x1000).unwrap(), 0xDE);
        assert_eq!(
            target(&mut pod).memory_accesses(),
            vec![
                Command::Write(Size::Long),
                Command::Read(Size::Word),
                Command::Read(Size::Byte)
            ]
        );
    }
}
