//! Target status reporting and the ColdFire CSR bits it is derived from.

use bitfield::bitfield;
use bitflags::bitflags;

bitflags! {
    /// Status of the target as reported by `get_status`.
    ///
    /// An empty set means the target is powered, connected and running.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct TargetStatus: u32 {
        /// The target is held in reset.
        const RESET = 1 << 0;
        /// The target is halted in background mode.
        const HALT = 1 << 1;
        /// The target is stopped, either on a breakpoint or waiting for an
        /// interrupt.
        const STOPPED = 1 << 2;
        /// The target has no power.
        const POWER = 1 << 3;
        /// The cable is not connected.
        const NOT_CONNECTED = 1 << 4;
    }
}

impl TargetStatus {
    /// The target is under debugger control.
    pub fn is_halted(self) -> bool {
        self.intersects(TargetStatus::HALT | TargetStatus::STOPPED)
    }

    /// Derive the run state from a ColdFire CSR value.
    pub fn from_csr(csr: u32) -> TargetStatus {
        if csr & CSR_HALT_MASK != 0 {
            TargetStatus::HALT
        } else if csr & CSR_BKPT != 0 {
            TargetStatus::STOPPED
        } else {
            TargetStatus::empty()
        }
    }
}

/// CSR bits that show the core halted for a reason other than a
/// breakpoint request.
pub const CSR_HALT_MASK: u32 = 0x0E00_0000;
/// CSR bits that make the driver suspect a halt.
pub const CSR_STOP_MASK: u32 = 0x0F00_0000;
/// The core executed a HALT instruction.
pub const CSR_HALT: u32 = 0x0200_0000;
/// Breakpoint request latched.
pub const CSR_BKPT: u32 = 0x0100_0000;
/// Single step mode.
pub const CSR_SSM: u32 = 1 << 4;
/// Ignore pending interrupts while stepping.
pub const CSR_IPI: u32 = 1 << 5;

bitfield! {
    /// The ColdFire debug module configuration/status register.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct Csr(u32);
    impl Debug;

    u8;
    /// Breakpoint status.
    pub bstat, _: 31, 28;
    /// Fault on fault, the core halted on a double bus fault.
    pub fof, _: 27;
    /// A hardware trigger halted the core.
    pub trg, _: 26;
    /// The core executed a HALT instruction.
    pub halt, _: 25;
    /// The BKPT line was asserted.
    pub bkpt, _: 24;
    /// Hardware revision level of the debug module.
    pub hrl, _: 23, 20;
    /// Ignore pending interrupts.
    pub ipi, set_ipi: 5;
    /// Single step mode.
    pub ssm, set_ssm: 4;
}

/// Decode a processor status code read from the PST lines.
///
/// Codes 0x0 to 0xD are the instruction execution states and all mean
/// running, 0xE is a stopped core and 0xF a halted one.
pub fn status_from_pst(pst: u8) -> TargetStatus {
    match pst {
        0x0..=0xD => TargetStatus::empty(),
        0xE => TargetStatus::STOPPED,
        0xF => TargetStatus::HALT,
        other => {
            tracing::warn!("Invalid PST code {:#x}, treating target as running", other);
            TargetStatus::empty()
        }
    }
}
