//! Turbo BDM Light ColdFire, a USB pod running the BDM protocol in its
//! own firmware.
//!
//! The host never sees individual serial frames. Each register, memory or
//! run control operation is one command frame (see [`protocol`]) carried by
//! a [`TblcfTransport`].

pub mod protocol;
pub mod usb_interface;

use std::fmt;
use std::thread;
use std::time::Duration;

use crate::command::Size;
use crate::config::{BdmConfig, StopPolicy};
use crate::error::{BdmError, Fault};
use crate::registers::{ProReg, RegisterMode};
use crate::revision::DebugRevision;
use crate::status::{TargetStatus, CSR_IPI};

use self::protocol::*;
use super::coldfire::{ColdFireCore, ColdFireState};
use super::{Interface, Pod};

pub use self::usb_interface::{list_tblcf_devices, TblcfInfo, TblcfUsbDevice};

/// Carries command frames to the pod firmware and returns its replies.
pub trait TblcfTransport: Send {
    /// Send one frame, `[reply length, command, parameters...]`, and return
    /// the raw reply starting with the echoed command.
    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, BdmError>;

    fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

impl<T: TblcfTransport + ?Sized> TblcfTransport for Box<T> {
    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, BdmError> {
        (**self).exchange(frame)
    }

    fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// A ColdFire target on a TBLCF pod.
pub struct Tblcf<T> {
    transport: T,
    state: ColdFireState,
    stop: StopPolicy,
    firmware_version: Option<u16>,
    delay: u32,
    debug: bool,
}

impl<T: TblcfTransport> Tblcf<T> {
    pub fn new(transport: T, config: &BdmConfig) -> Self {
        Tblcf {
            transport,
            state: ColdFireState::new(DebugRevision::A),
            stop: config.stop,
            firmware_version: None,
            delay: config.delay_ticks,
            debug: config.debug,
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn state(&self) -> &ColdFireState {
        &self.state
    }

    /// Firmware version reported during [`Pod::init_hardware`].
    pub fn firmware_version(&self) -> Option<u16> {
        self.firmware_version
    }

    fn transact(&mut self, request: Request) -> Result<Reply, BdmError> {
        let reply = self.transport.exchange(request.as_bytes())?;
        if self.debug {
            tracing::debug!("Sent {:02x?}, received {:02x?}", request.as_bytes(), reply);
        } else {
            tracing::trace!("Sent {:02x?}, received {:02x?}", request.as_bytes(), reply);
        }
        Reply::check(&request, reply)
    }

    fn command(&mut self, command: u8) -> Result<(), BdmError> {
        self.transact(Request::new(command, 1))?;
        Ok(())
    }

    fn reset_target(&mut self, mode: u8) -> Result<(), BdmError> {
        self.transact(Request::new(CMD_RESET, 1).u8(mode))?;
        self.state.running = true;
        self.state.csr = 0;
        Ok(())
    }

    fn read_single(&mut self, address: u32, size: Size, data: &mut [u8]) -> Result<(), BdmError> {
        let (command, reply_len) = match size {
            Size::Byte => (CMD_READ_MEM8, 2),
            Size::Word => (CMD_READ_MEM16, 3),
            Size::Long => (CMD_READ_MEM32, 5),
        };
        let reply = self.transact(Request::new(command, reply_len).u32(address))?;
        let bytes = reply
            .data()
            .get(..size.bytes())
            .ok_or_else(|| BdmError::UnexpectedReply {
                command,
                reply: reply.data().to_vec(),
            })?;
        data.copy_from_slice(bytes);
        Ok(())
    }

    fn write_single(&mut self, address: u32, data: &[u8]) -> Result<(), BdmError> {
        let command = match Size::widest(0, data.len()) {
            Size::Byte => CMD_WRITE_MEM8,
            Size::Word => CMD_WRITE_MEM16,
            Size::Long => CMD_WRITE_MEM32,
        };
        self.transact(Request::new(command, 1).u32(address).bytes(data))?;
        Ok(())
    }
}

/// Length of the next transfer of a block starting at `address`. Runs of
/// longs go through the block commands, the misaligned head and the short
/// tail through single accesses.
fn next_chunk(address: u32, remaining: usize) -> Chunk {
    match Size::widest(address, remaining) {
        Size::Long if remaining >= 8 => Chunk::Block((remaining & !3).min(MAX_DATA_SIZE)),
        size => Chunk::Single(size),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    Single(Size),
    Block(usize),
}

impl Chunk {
    fn len(self) -> usize {
        match self {
            Chunk::Single(size) => size.bytes(),
            Chunk::Block(len) => len,
        }
    }
}

impl<T> fmt::Debug for Tblcf<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tblcf")
            .field("state", &self.state)
            .field("firmware_version", &self.firmware_version)
            .finish_non_exhaustive()
    }
}

impl<T: TblcfTransport> ColdFireCore for Tblcf<T> {
    // The firmware masks interrupts itself while stepping.
    const STEP_CSR: u32 = CSR_IPI;

    fn state(&self) -> &ColdFireState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ColdFireState {
        &mut self.state
    }

    fn link_status(&mut self) -> Result<TargetStatus, BdmError> {
        let flags = self.transact(Request::new(CMD_GET_STATUS, 2))?.u8(0)?;

        if flags & STATUS_RESET_DETECTED != 0 {
            tracing::debug!("Target was reset behind our back");
            self.state.running = true;
            self.state.csr = 0;
        }

        if flags & STATUS_RESET_ASSERTED != 0 {
            Ok(TargetStatus::RESET)
        } else {
            Ok(TargetStatus::empty())
        }
    }

    fn read_creg(&mut self, address: u16) -> Result<u32, BdmError> {
        self.transact(Request::new(CMD_READ_CREG, 5).u16(address))?
            .u32(0)
    }

    fn write_creg(&mut self, address: u16, value: u32) -> Result<(), BdmError> {
        self.transact(Request::new(CMD_WRITE_CREG, 1).u16(address).u32(value))?;
        Ok(())
    }

    fn read_dreg(&mut self, number: u8) -> Result<u32, BdmError> {
        self.transact(Request::new(CMD_READ_DREG, 5).u8(number))?
            .u32(0)
    }

    fn write_dreg(&mut self, number: u8, value: u32) -> Result<(), BdmError> {
        self.transact(Request::new(CMD_WRITE_DREG, 1).u8(number).u32(value))?;
        Ok(())
    }

    fn go(&mut self) -> Result<(), BdmError> {
        self.command(CMD_GO)
    }

    fn step_go(&mut self) -> Result<(), BdmError> {
        self.command(CMD_STEP)
    }
}

impl<T: TblcfTransport> Pod for Tblcf<T> {
    fn interface(&self) -> Interface {
        Interface::Tblcf
    }

    fn revision(&self) -> Option<DebugRevision> {
        Some(self.state.revision)
    }

    fn init_hardware(&mut self) -> Result<TargetStatus, BdmError> {
        let version = self.transact(Request::new(CMD_GET_VERSION, 3))?.u16(0)?;
        tracing::debug!("TBLCF firmware version {:#06x}", version);
        self.firmware_version = Some(version);

        self.transact(Request::new(CMD_SET_TARGET, 1).u8(TARGET_COLDFIRE))?;

        let status = self.link_status()?;
        if !status.is_empty() {
            tracing::debug!("Target not accessible at init: {:?}", status);
            return Ok(status);
        }

        self.detect_revision()?;
        self.reconcile_status()
    }

    fn get_status(&mut self) -> Result<TargetStatus, BdmError> {
        self.reconcile_status()
    }

    fn reset_chip(&mut self) -> Result<(), BdmError> {
        self.reset_target(RESET_BDM)
    }

    fn release_chip(&mut self) -> Result<(), BdmError> {
        self.reset_target(RESET_NORMAL)
    }

    fn stop_chip(&mut self) -> Result<(), BdmError> {
        self.command(CMD_HALT)?;
        for _ in 0..self.stop.attempts {
            if self.reconcile_status()?.is_halted() {
                return Ok(());
            }
            self.transport.sleep(self.stop.delay());
        }
        Err(Fault::Response.into())
    }

    fn run_chip(&mut self) -> Result<(), BdmError> {
        self.cf_run()
    }

    fn step_chip(&mut self) -> Result<(), BdmError> {
        self.cf_step()
    }

    fn gen_bus_error(&mut self) -> Result<Fault, BdmError> {
        self.transact(Request::new(CMD_ASSERT_TA, 1).u8(ASSERT_TA_US))?;
        Ok(Fault::ForcedTa)
    }

    fn read_sysreg(&mut self, id: u16, mode: RegisterMode) -> Result<u32, BdmError> {
        self.cf_read_sysreg(id, mode)
    }

    fn write_sysreg(&mut self, id: u16, mode: RegisterMode, value: u32) -> Result<(), BdmError> {
        self.cf_write_sysreg(id, mode, value)
    }

    fn read_proreg(&mut self, reg: ProReg) -> Result<u32, BdmError> {
        self.transact(Request::new(CMD_READ_REG, 5).u8(reg.number()))?
            .u32(0)
    }

    fn write_proreg(&mut self, reg: ProReg, value: u32) -> Result<(), BdmError> {
        self.transact(Request::new(CMD_WRITE_REG, 1).u8(reg.number()).u32(value))?;
        Ok(())
    }

    fn read_memory(&mut self, address: u32, data: &mut [u8]) -> Result<(), BdmError> {
        let mut offset = 0;
        while offset < data.len() {
            let current = address.wrapping_add(offset as u32);
            let chunk = next_chunk(current, data.len() - offset);
            let target = &mut data[offset..offset + chunk.len()];

            match chunk {
                Chunk::Single(size) => self.read_single(current, size, target)?,
                Chunk::Block(len) => {
                    // The block length is implied by the reply length.
                    let request = Request::new(CMD_READ_MEMBLOCK, len as u8 + 1).u32(current);
                    let reply = self.transact(request)?;
                    let bytes = reply.data().get(..len).ok_or_else(|| {
                        BdmError::UnexpectedReply {
                            command: CMD_READ_MEMBLOCK,
                            reply: reply.data().to_vec(),
                        }
                    })?;
                    target.copy_from_slice(bytes);
                }
            }
            offset += chunk.len();
        }
        Ok(())
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), BdmError> {
        let mut offset = 0;
        while offset < data.len() {
            let current = address.wrapping_add(offset as u32);
            let chunk = next_chunk(current, data.len() - offset);
            let source = &data[offset..offset + chunk.len()];

            match chunk {
                Chunk::Single(_) => self.write_single(current, source)?,
                Chunk::Block(len) => {
                    let request = Request::new(CMD_WRITE_MEMBLOCK, 1)
                        .u32(current)
                        .u8(len as u8)
                        .bytes(source);
                    self.transact(request)?;
                }
            }
            offset += chunk.len();
        }
        Ok(())
    }

    /// The firmware times the serial clock itself, the value is only kept
    /// for reporting.
    fn set_delay(&mut self, ticks: u32) {
        self.delay = ticks;
    }

    fn delay(&self) -> u32 {
        self.delay
    }

    fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::SysReg;
    use crate::status::CSR_BKPT;
    use crate::test::{SimTblcf, CACR};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn config() -> BdmConfig {
        let mut config = BdmConfig::default();
        config.stop.delay_ms = 0;
        config
    }

    fn open(revision: DebugRevision) -> Tblcf<SimTblcf> {
        let mut pod = Tblcf::new(SimTblcf::new(revision), &config());
        pod.init_hardware().unwrap();
        pod.transport_mut().requests.clear();
        pod
    }

    #[test_case(0x1000, 4, Chunk::Single(Size::Long))]
    #[test_case(0x1000, 8, Chunk::Block(8))]
    #[test_case(0x1000, 11, Chunk::Block(8))]
    #[test_case(0x1000, 200, Chunk::Block(MAX_DATA_SIZE))]
    #[test_case(0x1002, 200, Chunk::Single(Size::Word))]
    #[test_case(0x1001, 200, Chunk::Single(Size::Byte))]
    fn chunking(address: u32, remaining: usize, chunk: Chunk) {
        assert_eq!(next_chunk(address, remaining), chunk);
    }

    #[test]
    fn init_reads_version_and_revision() {
        let mut pod = Tblcf::new(SimTblcf::new(DebugRevision::D), &config());
        assert_eq!(pod.init_hardware().unwrap(), TargetStatus::empty());
        assert_eq!(pod.firmware_version(), Some(SimTblcf::VERSION));
        assert_eq!(pod.revision(), Some(DebugRevision::D));
        assert_eq!(
            &pod.transport_mut().commands()[..3],
            &[CMD_GET_VERSION, CMD_SET_TARGET, CMD_GET_STATUS]
        );
    }

    #[test]
    fn init_in_reset_stops_early() {
        let mut sim = SimTblcf::new(DebugRevision::B);
        sim.reset_asserted = true;
        let mut pod = Tblcf::new(sim, &config());

        assert_eq!(pod.init_hardware().unwrap(), TargetStatus::RESET);
        assert!(!pod.transport_mut().commands().contains(&CMD_READ_DREG));
    }

    #[test]
    fn block_transfers_split_at_edges() {
        let mut pod = open(DebugRevision::C);
        let image: Vec<u8> = (0..130).map(|i| i as u8).collect();
        pod.transport_mut().target.load(0x1001, &image);

        let mut data = vec![0; image.len()];
        pod.read_memory(0x1001, &mut data).unwrap();

        assert_eq!(data, image);
        assert_eq!(
            pod.transport_mut().commands(),
            vec![
                CMD_READ_MEM8,
                CMD_READ_MEM16,
                CMD_READ_MEMBLOCK,
                CMD_READ_MEMBLOCK,
                CMD_READ_MEMBLOCK,
                CMD_READ_MEM16,
                CMD_READ_MEM8,
            ]
        );
    }

    #[test]
    fn block_writes_land_in_memory() {
        let mut pod = open(DebugRevision::C);
        let image: Vec<u8> = (0..100).map(|i| (i * 3) as u8).collect();

        pod.write_memory(0x2002, &image).unwrap();

        let mut data = vec![0; image.len()];
        pod.read_memory(0x2002, &mut data).unwrap();
        assert_eq!(data, image);
        assert_eq!(pod.read_long(0x2004).unwrap(), 0x0609_0C0F);
    }

    #[test]
    fn failed_access_is_a_bus_error() {
        let mut pod = open(DebugRevision::C);
        pod.transport_mut().target.bus_error_at = Some(0x3000);

        let err = pod.write_word(0x3000, 0xAA55).unwrap_err();
        assert_eq!(err.as_fault(), Some(Fault::BusError));
    }

    #[test]
    fn step_is_done_by_the_firmware() {
        let mut pod = open(DebugRevision::D);
        pod.transport_mut()
            .target
            .regs_control
            .insert(0x80E, 0x2004);

        pod.step_chip().unwrap();

        let sim = pod.transport_mut();
        assert_eq!(sim.target.regs_debug[0], CSR_IPI);
        assert_eq!(sim.target.regs_control[&0x80E], 0x2704);
        assert!(sim.commands().contains(&CMD_STEP));
        assert!(!sim.commands().contains(&CMD_GO));
        assert_eq!(pod.state().csr, CSR_BKPT);
        assert_eq!(pod.get_status().unwrap(), TargetStatus::STOPPED);
    }

    #[test]
    fn halt_is_confirmed_and_caches_invalidated() {
        let mut pod = open(DebugRevision::B);
        {
            let target = &mut pod.transport_mut().target;
            target.regs_control.insert(CACR, 0x8000_0000);
            target.halt(0x0200_0000);
        }

        assert_eq!(pod.get_status().unwrap(), TargetStatus::HALT);
        assert_eq!(pod.transport_mut().target.regs_control[&CACR], 0x8100_0100);
    }

    #[test]
    fn stop_and_run() {
        let mut pod = open(DebugRevision::C);

        pod.stop_chip().unwrap();
        assert_eq!(pod.get_status().unwrap(), TargetStatus::STOPPED);

        pod.run_chip().unwrap();
        assert!(pod.state().running);
        assert_eq!(pod.get_status().unwrap(), TargetStatus::empty());
    }

    #[test]
    fn stop_gives_up_on_a_dead_target() {
        let mut pod = open(DebugRevision::C);
        pod.transport_mut().target.ignore_breakpoint = true;

        let err = pod.stop_chip().unwrap_err();
        assert_eq!(err.as_fault(), Some(Fault::Response));
    }

    #[test]
    fn restart_comes_up_halted() {
        let mut pod = open(DebugRevision::C);
        pod.restart_chip().unwrap();
        assert!(!pod.state().running);

        pod.release_chip().unwrap();
        assert_eq!(pod.get_status().unwrap(), TargetStatus::empty());
    }

    #[test]
    fn reset_behind_our_back_clears_halt() {
        let mut pod = open(DebugRevision::C);
        pod.stop_chip().unwrap();
        assert!(!pod.state().running);

        pod.transport_mut().reset_detected = true;
        pod.transport_mut().target.resume();

        assert_eq!(pod.get_status().unwrap(), TargetStatus::empty());
        assert!(pod.state().running);
    }

    #[test]
    fn bus_error_is_a_forced_ta() {
        let mut pod = open(DebugRevision::A);
        assert_eq!(pod.gen_bus_error().unwrap(), Fault::ForcedTa);
        assert_eq!(pod.transport_mut().commands(), vec![CMD_ASSERT_TA]);
    }

    #[test]
    fn registers_through_the_firmware() {
        let mut pod = open(DebugRevision::C);
        let d3 = ProReg::data(3).unwrap();
        pod.write_proreg(d3, 0x1234_5678).unwrap();
        assert_eq!(pod.read_proreg(d3).unwrap(), 0x1234_5678);

        pod.write_sysreg(SysReg::Vbr.id(), RegisterMode::Mapped, 0x4000_0000)
            .unwrap();
        assert_eq!(pod.read_sysreg(0x801, RegisterMode::Control).unwrap(), 0x4000_0000);
    }

    #[test]
    fn pst_is_not_available() {
        let mut pod = open(DebugRevision::C);
        assert!(matches!(pod.set_use_pst(true), Err(BdmError::Unsupported(_))));
    }

    #[test]
    fn delay_is_only_recorded() {
        let mut pod = open(DebugRevision::C);
        pod.set_delay(7);
        assert_eq!(pod.delay(), 7);
        assert!(pod.transport_mut().requests.is_empty());
    }
}
