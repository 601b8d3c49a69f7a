//! CPU32 targets on the public domain and ICD parallel port pods.
//!
//! The run state comes from the freeze line, and MBAR is reached through
//! CPU space accesses with SFC and DFC temporarily switched.

use std::fmt;

use crate::command::{Command, Size};
use crate::config::{BdmConfig, PollPolicy, StopPolicy};
use crate::error::{BdmError, Fault};
use crate::link::{BdmWire, SerialLink};
use crate::port::Lines;
use crate::registers::{locate, Location, ProReg, RegisterMode, SysReg};
use crate::status::TargetStatus;

use super::{invalid_register, Interface, Pod, Processor};

/// Address of MBAR in CPU space.
const MBAR_ADDRESS: u32 = 0x0003_FF00;
/// Function code of CPU space.
const CPU_SPACE: u32 = 7;

/// A CPU32 target on one of the parallel port pods.
///
/// Halt status comes straight from the FREEZE line, the CPU32 has no
/// debug module registers.
pub struct Cpu32Pod<W> {
    link: SerialLink<W>,
    interface: Interface,
    freeze_poll: PollPolicy,
    stop: StopPolicy,
}

impl<W: BdmWire> Cpu32Pod<W> {
    pub fn new(wire: W, interface: Interface, config: &BdmConfig) -> Self {
        Cpu32Pod {
            link: SerialLink::new(wire, config),
            interface,
            freeze_poll: config.freeze_poll,
            stop: config.stop,
        }
    }

    pub fn link(&self) -> &SerialLink<W> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut SerialLink<W> {
        &mut self.link
    }

    fn read_system(&mut self, code: u8) -> Result<u32, BdmError> {
        self.link
            .read_long(Command::ReadSystemRegister(code), &[])
    }

    fn write_system(&mut self, code: u8, value: u32) -> Result<(), BdmError> {
        self.link
            .write_long(Command::WriteSystemRegister(code), &[], value)
    }

    fn system_code(reg: SysReg) -> Result<u8, BdmError> {
        match locate(Processor::Cpu32, reg) {
            Location::System(code) => Ok(code),
            _ => Err(invalid_register(reg.id(), RegisterMode::Mapped)),
        }
    }

    /// MBAR is only reachable as a long word in CPU space. Switch SFC and
    /// DFC to CPU space for the access and put them back afterwards, also
    /// when the access fails.
    fn with_cpu_space<T>(
        &mut self,
        access: impl FnOnce(&mut Self) -> Result<T, BdmError>,
    ) -> Result<T, BdmError> {
        let sfc_code = Self::system_code(SysReg::Sfc)?;
        let dfc_code = Self::system_code(SysReg::Dfc)?;

        let sfc = self.read_system(sfc_code)?;
        let dfc = self.read_system(dfc_code)?;

        let result = self
            .write_system(sfc_code, CPU_SPACE)
            .and_then(|_| self.write_system(dfc_code, CPU_SPACE))
            .and_then(|_| access(self));

        let restored = self
            .write_system(sfc_code, sfc)
            .and_then(|_| self.write_system(dfc_code, dfc));

        match (result, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), restored) => {
                if let Err(restore) = restored {
                    tracing::warn!("Failed to restore SFC/DFC after {}: {}", e, restore);
                }
                Err(e)
            }
        }
    }

    fn poll_freeze(&mut self) -> Result<(), BdmError> {
        for _ in 0..self.freeze_poll.iterations {
            if self.link.pin_status()?.frozen {
                return Ok(());
            }
            self.link.sleep(self.freeze_poll.delay());
        }
        Err(Fault::Timeout.into())
    }
}

impl<W> fmt::Debug for Cpu32Pod<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpu32Pod")
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

impl<W: BdmWire> Pod for Cpu32Pod<W> {
    fn interface(&self) -> Interface {
        self.interface
    }

    fn init_hardware(&mut self) -> Result<TargetStatus, BdmError> {
        self.link.drive(Lines::empty())?;
        self.get_status()
    }

    fn get_status(&mut self) -> Result<TargetStatus, BdmError> {
        Ok(self.link.pin_status()?.target_status())
    }

    fn reset_chip(&mut self) -> Result<(), BdmError> {
        self.link.reset_sequence()
    }

    fn release_chip(&mut self) -> Result<(), BdmError> {
        self.link.release_sequence()
    }

    fn stop_chip(&mut self) -> Result<(), BdmError> {
        self.link.drive(Lines::BKPT)?;
        for _ in 0..self.stop.attempts {
            if self.get_status()?.is_halted() {
                self.link.drive(Lines::empty())?;
                return Ok(());
            }
            self.link.sleep(self.stop.delay());
        }
        self.link.drive(Lines::empty())?;
        Err(Fault::Response.into())
    }

    fn run_chip(&mut self) -> Result<(), BdmError> {
        self.link.send(Command::Go, &[])?;
        self.link.drive(Lines::empty())
    }

    /// The last bit of GO is clocked with BKPT asserted, so the core
    /// executes one instruction and freezes again.
    fn step_chip(&mut self) -> Result<(), BdmError> {
        self.link
            .serial_clock_held_back(Command::Go.word(), Lines::BKPT)?;
        self.link.drive(Lines::empty())?;
        self.poll_freeze()
    }

    fn gen_bus_error(&mut self) -> Result<Fault, BdmError> {
        self.link.gen_bus_error()
    }

    fn read_sysreg(&mut self, id: u16, mode: RegisterMode) -> Result<u32, BdmError> {
        match mode {
            RegisterMode::Mapped => {
                let reg = SysReg::from_id(id).ok_or_else(|| invalid_register(id, mode))?;
                match locate(Processor::Cpu32, reg) {
                    Location::System(code) => self.read_system(code),
                    Location::Cpu32Mbar => {
                        self.with_cpu_space(|pod| pod.link.read_at(Size::Long, MBAR_ADDRESS))
                    }
                    Location::Unimplemented => Ok(0),
                    _ => Err(invalid_register(id, mode)),
                }
            }
            RegisterMode::Control if id < 0x10 => self.read_system(id as u8),
            RegisterMode::Control | RegisterMode::Debug => Err(invalid_register(id, mode)),
        }
    }

    fn write_sysreg(&mut self, id: u16, mode: RegisterMode, value: u32) -> Result<(), BdmError> {
        match mode {
            RegisterMode::Mapped => {
                let reg = SysReg::from_id(id).ok_or_else(|| invalid_register(id, mode))?;
                match locate(Processor::Cpu32, reg) {
                    Location::System(code) => self.write_system(code, value),
                    Location::Cpu32Mbar => self.with_cpu_space(|pod| {
                        pod.link.write_at(Size::Long, MBAR_ADDRESS, value)
                    }),
                    Location::Unimplemented => Ok(()),
                    _ => Err(invalid_register(id, mode)),
                }
            }
            RegisterMode::Control if id < 0x10 => self.write_system(id as u8, value),
            RegisterMode::Control | RegisterMode::Debug => Err(invalid_register(id, mode)),
        }
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

    fn set_debug(&mut self, debug: bool) {
        self.link.set_debug(debug);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clocker::BitBangWire;
    use crate::port::{PinStatus, CPU32_ICD, CPU32_PD};
    use crate::test::{Frame, SimPort, SimTarget, SimWire};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    const SFC: u8 = 0xE;
    const DFC: u8 = 0xF;

    fn pod() -> Cpu32Pod<SimWire> {
        let mut pod = Cpu32Pod::new(SimWire::cpu32(), Interface::Cpu32Pd, &BdmConfig::default());
        pod.init_hardware().unwrap();
        pod
    }

    fn target(pod: &mut Cpu32Pod<SimWire>) -> &mut SimTarget {
        pod.link_mut().wire_mut().target()
    }

    #[test_case(CPU32_PD, Interface::Cpu32Pd)]
    #[test_case(CPU32_ICD, Interface::Cpu32Icd)]
    fn cold_open_reports_clean_status(pins: crate::port::PinMap, interface: Interface) {
        let port = SimPort::new(pins);
        let wire = BitBangWire::new(port, pins).unwrap();
        let mut pod = Cpu32Pod::new(wire, interface, &BdmConfig::default());

        assert_eq!(pod.init_hardware().unwrap(), TargetStatus::empty());
        assert_eq!(pod.processor(), Processor::Cpu32);
    }

    #[test]
    fn status_follows_sense_lines() {
        let mut pod = pod();
        target(&mut pod).halted = true;
        assert_eq!(pod.get_status().unwrap(), TargetStatus::HALT);

        target(&mut pod).pins = PinStatus {
            in_reset: true,
            ..PinStatus::READY
        };
        assert!(pod.get_status().unwrap().contains(TargetStatus::RESET));
    }

    #[test_case(0, 0 ; "user data space")]
    #[test_case(5, 2 ; "supervisor data and user program")]
    #[test_case(7, 7 ; "already cpu space")]
    fn mbar_access_restores_function_codes(sfc: u32, dfc: u32) {
        let mut pod = pod();
        {
            let target = target(&mut pod);
            target.system[SFC as usize] = sfc;
            target.system[DFC as usize] = dfc;
            target.mbar = 0x00FF_F001;
        }

        let mbar = SysReg::Mbar.id();
        assert_eq!(pod.read_sysreg(mbar, RegisterMode::Mapped).unwrap(), 0x00FF_F001);
        pod.write_sysreg(mbar, RegisterMode::Mapped, 0x00FF_E001)
            .unwrap();

        let target = target(&mut pod);
        assert_eq!(target.mbar, 0x00FF_E001);
        assert_eq!(target.system[SFC as usize], sfc);
        assert_eq!(target.system[DFC as usize], dfc);
    }

    #[test]
    fn mbar_fault_still_restores_function_codes() {
        let mut pod = pod();
        {
            let target = target(&mut pod);
            target.system[SFC as usize] = 1;
            target.system[DFC as usize] = 2;
            target.bus_error_at = Some(MBAR_ADDRESS);
        }

        let err = pod
            .read_sysreg(SysReg::Mbar.id(), RegisterMode::Mapped)
            .unwrap_err();

        assert_eq!(err.as_fault(), Some(Fault::BusError));
        let target = target(&mut pod);
        assert_eq!(target.system[SFC as usize], 1);
        assert_eq!(target.system[DFC as usize], 2);
    }

    #[test]
    fn system_registers_by_table_and_code() {
        let mut pod = pod();
        pod.write_sysreg(SysReg::Vbr.id(), RegisterMode::Mapped, 0x0010_0000)
            .unwrap();
        assert_eq!(target(&mut pod).system[0xA], 0x0010_0000);
        assert_eq!(pod.read_sysreg(0xA, RegisterMode::Control).unwrap(), 0x0010_0000);

        assert_eq!(pod.read_sysreg(SysReg::Cacr.id(), RegisterMode::Mapped).unwrap(), 0);
        assert!(matches!(
            pod.read_sysreg(0, RegisterMode::Debug),
            Err(BdmError::InvalidRegister(_))
        ));
    }

    #[test]
    fn step_clocks_go_with_breakpoint_and_waits_for_freeze() {
        let mut pod = pod();
        pod.step_chip().unwrap();

        let target = target(&mut pod);
        assert_eq!(target.steps, 1);
        assert!(target.halted);
        assert_eq!(target.lines, Lines::empty());
        assert_eq!(target.count(Frame::Command(Command::Go)), 1);
    }

    #[test]
    fn step_times_out_without_freeze() {
        let mut pod = pod();
        target(&mut pod).ignore_breakpoint = true;
        let err = pod.step_chip().unwrap_err();
        assert_eq!(err.as_fault(), Some(Fault::Timeout));
    }

    #[test]
    fn run_and_stop() {
        let mut pod = pod();
        target(&mut pod).halted = true;

        pod.run_chip().unwrap();
        assert_eq!(pod.get_status().unwrap(), TargetStatus::empty());

        pod.stop_chip().unwrap();
        assert_eq!(pod.get_status().unwrap(), TargetStatus::HALT);
    }

    #[test]
    fn restart_freezes_the_core() {
        let mut pod = pod();
        pod.restart_chip().unwrap();
        assert!(target(&mut pod).halted);
    }

    #[test]
    fn general_registers() {
        let mut pod = pod();
        pod.write_proreg(ProReg::D0, 0x1234_5678).unwrap();
        assert_eq!(pod.read_proreg(ProReg::D0).unwrap(), 0x1234_5678);
        assert_eq!(target(&mut pod).regs[0], 0x1234_5678);
    }
}
