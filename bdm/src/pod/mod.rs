//! The BDM pods and the operation set they all implement.

mod cf_pe;
mod coldfire;
mod cpu32;
pub mod tblcf;

pub use cf_pe::ColdFirePe;
pub use coldfire::ColdFireState;
pub use cpu32::Cpu32Pod;
pub use tblcf::Tblcf;

use std::fmt;

use crate::error::{BdmError, Fault, RegisterAccess};
use crate::registers::{ProReg, RegisterMode};
use crate::revision::DebugRevision;
use crate::status::TargetStatus;

/// Processor family of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Processor {
    Cpu32,
    ColdFire,
}

/// Pod design used to reach the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    /// Public domain CPU32 parallel port pod.
    Cpu32Pd,
    /// ICD CPU32 parallel port pod.
    Cpu32Icd,
    /// P&E ColdFire parallel port pod.
    ColdFirePe,
    /// Turbo BDM Light ColdFire USB pod.
    Tblcf,
}

impl Interface {
    pub fn processor(self) -> Processor {
        match self {
            Interface::Cpu32Pd | Interface::Cpu32Icd => Processor::Cpu32,
            Interface::ColdFirePe | Interface::Tblcf => Processor::ColdFire,
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Interface::Cpu32Pd => "CPU32 PD",
            Interface::Cpu32Icd => "CPU32 ICD",
            Interface::ColdFirePe => "ColdFire P&E",
            Interface::Tblcf => "ColdFire TBLCF",
        };
        f.write_str(name)
    }
}

/// A BDM pod connected to a target.
///
/// Every operation is synchronous and a pod is driven by one debug session
/// at a time. Operations fail with a [`BdmError`] whose
/// [`fault`](BdmError::fault) is what collaborators report to the user.
pub trait Pod: Send + fmt::Debug {
    fn interface(&self) -> Interface;

    fn processor(&self) -> Processor {
        self.interface().processor()
    }

    /// Debug module revision, for ColdFire targets.
    fn revision(&self) -> Option<DebugRevision> {
        None
    }

    /// Put the pod lines into a known state and probe the target.
    fn init_hardware(&mut self) -> Result<TargetStatus, BdmError>;

    fn get_status(&mut self) -> Result<TargetStatus, BdmError>;

    /// Reset the target into background mode. The target is considered
    /// running afterwards until it is stopped.
    fn reset_chip(&mut self) -> Result<(), BdmError>;

    /// Reset the target and check that it came up halted.
    fn restart_chip(&mut self) -> Result<(), BdmError> {
        self.reset_chip()?;
        let status = self.get_status()?;
        if !status.is_halted() {
            tracing::debug!("Target not halted after restart: {:?}", status);
            return Err(Fault::Response.into());
        }
        Ok(())
    }

    /// Reset the target out of background mode and let it run its own
    /// code.
    fn release_chip(&mut self) -> Result<(), BdmError>;

    fn stop_chip(&mut self) -> Result<(), BdmError>;

    fn run_chip(&mut self) -> Result<(), BdmError>;

    fn step_chip(&mut self) -> Result<(), BdmError>;

    /// Force the access the target is stuck in to terminate.
    ///
    /// Returns which kind of abort was generated. Both kinds mean the
    /// same to the caller.
    fn gen_bus_error(&mut self) -> Result<Fault, BdmError>;

    fn read_sysreg(&mut self, id: u16, mode: RegisterMode) -> Result<u32, BdmError>;

    fn write_sysreg(&mut self, id: u16, mode: RegisterMode, value: u32) -> Result<(), BdmError>;

    fn read_proreg(&mut self, reg: ProReg) -> Result<u32, BdmError>;

    fn write_proreg(&mut self, reg: ProReg, value: u32) -> Result<(), BdmError>;

    /// Read target memory into `data`. Bytes are in target order.
    fn read_memory(&mut self, address: u32, data: &mut [u8]) -> Result<(), BdmError>;

    /// Write `data` to target memory. Bytes are in target order.
    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), BdmError>;

    fn read_byte(&mut self, address: u32) -> Result<u8, BdmError> {
        let mut data = [0; 1];
        self.read_memory(address, &mut data)?;
        Ok(data[0])
    }

    fn read_word(&mut self, address: u32) -> Result<u16, BdmError> {
        let mut data = [0; 2];
        self.read_memory(address, &mut data)?;
        Ok(u16::from_be_bytes(data))
    }

    fn read_long(&mut self, address: u32) -> Result<u32, BdmError> {
        let mut data = [0; 4];
        self.read_memory(address, &mut data)?;
        Ok(u32::from_be_bytes(data))
    }

    fn write_byte(&mut self, address: u32, value: u8) -> Result<(), BdmError> {
        self.write_memory(address, &[value])
    }

    fn write_word(&mut self, address: u32, value: u16) -> Result<(), BdmError> {
        self.write_memory(address, &value.to_be_bytes())
    }

    fn write_long(&mut self, address: u32, value: u32) -> Result<(), BdmError> {
        self.write_memory(address, &value.to_be_bytes())
    }

    /// Set the serial clock delay, in ticks per half cycle.
    fn set_delay(&mut self, ticks: u32);

    fn delay(&self) -> u32;

    /// Decode the run state from the processor status lines.
    fn set_use_pst(&mut self, use_pst: bool) -> Result<(), BdmError> {
        if use_pst {
            return Err(BdmError::Unsupported("processor status lines"));
        }
        Ok(())
    }

    /// Log every exchange with the target at debug level.
    fn set_debug(&mut self, debug: bool);
}

pub(crate) fn invalid_register(id: u16, mode: RegisterMode) -> BdmError {
    BdmError::InvalidRegister(RegisterAccess { id, mode })
}
