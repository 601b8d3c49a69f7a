//! Logical register ids and their per-processor mapping tables.

use std::fmt;

use crate::pod::Processor;

/// How a system register id passed to `read_sysreg`/`write_sysreg` is
/// interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterMode {
    /// A logical [`SysReg`] id, resolved through the processor's table.
    Mapped,
    /// A raw control register number (CPU32 system register code or
    /// ColdFire control register address).
    Control,
    /// A raw ColdFire debug module register number.
    Debug,
}

/// Logical system register ids, stable across processor families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum SysReg {
    Rpc = 0,
    Pcc,
    Sr,
    Usp,
    Ssp,
    Sfc,
    Dfc,
    Atemp,
    Far,
    Vbr,
    Cacr,
    Acr0,
    Acr1,
    Rambar,
    Mbar,
    Csr,
    Aatr,
    Tdr,
    Pbr,
    Pbmr,
    Abhr,
    Ablr,
    Dbr,
    Dbmr,
}

impl SysReg {
    /// Number of logical system registers.
    pub const COUNT: usize = 24;

    const ALL: [SysReg; SysReg::COUNT] = [
        SysReg::Rpc,
        SysReg::Pcc,
        SysReg::Sr,
        SysReg::Usp,
        SysReg::Ssp,
        SysReg::Sfc,
        SysReg::Dfc,
        SysReg::Atemp,
        SysReg::Far,
        SysReg::Vbr,
        SysReg::Cacr,
        SysReg::Acr0,
        SysReg::Acr1,
        SysReg::Rambar,
        SysReg::Mbar,
        SysReg::Csr,
        SysReg::Aatr,
        SysReg::Tdr,
        SysReg::Pbr,
        SysReg::Pbmr,
        SysReg::Abhr,
        SysReg::Ablr,
        SysReg::Dbr,
        SysReg::Dbmr,
    ];

    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<SysReg> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn all() -> impl Iterator<Item = SysReg> {
        Self::ALL.into_iter()
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// A general register, D0-D7 (0x0-0x7) and A0-A7 (0x8-0xF).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProReg(u8);

impl ProReg {
    pub const D0: ProReg = ProReg(0x0);
    pub const A0: ProReg = ProReg(0x8);
    pub const A7: ProReg = ProReg(0xF);

    pub fn new(id: u16) -> Option<ProReg> {
        (id < 16).then_some(ProReg(id as u8))
    }

    pub fn data(n: u8) -> Option<ProReg> {
        (n < 8).then_some(ProReg(n))
    }

    pub fn address(n: u8) -> Option<ProReg> {
        (n < 8).then_some(ProReg(n + 8))
    }

    pub fn number(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for ProReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 8 {
            write!(f, "D{}", self.0)
        } else {
            write!(f, "A{}", self.0 - 8)
        }
    }
}

/// Where a mapped register lives on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// The processor family has no such register. Reads give zero and
    /// writes are dropped.
    Unimplemented,
    /// CPU32 system register, accessed with RSREG/WSREG.
    System(u8),
    /// CPU32 module base address register. Only reachable through a
    /// supervisor space memory access.
    Cpu32Mbar,
    /// ColdFire control register, accessed with RCREG/WCREG.
    Control(u16),
    /// ColdFire debug module register with a hardware read path.
    Debug(u8),
    /// ColdFire debug module register without a hardware read path.
    ///
    /// Reads never touch the target, they return the last value the
    /// driver wrote.
    WriteOnlyDebug(u8),
}

use Location as L;

const CPU32_MAP: [Location; SysReg::COUNT] = [
    L::System(0x0), // RPC
    L::System(0x1), // PCC
    L::System(0xB), // SR
    L::System(0xC), // USP
    L::System(0xD), // SSP
    L::System(0xE), // SFC
    L::System(0xF), // DFC
    L::System(0x8), // ATEMP
    L::System(0x9), // FAR
    L::System(0xA), // VBR
    L::Unimplemented,
    L::Unimplemented,
    L::Unimplemented,
    L::Unimplemented,
    L::Cpu32Mbar,
    L::Unimplemented,
    L::Unimplemented,
    L::Unimplemented,
    L::Unimplemented,
    L::Unimplemented,
    L::Unimplemented,
    L::Unimplemented,
    L::Unimplemented,
    L::Unimplemented,
];

const COLDFIRE_MAP: [Location; SysReg::COUNT] = [
    L::Control(0x80F), // RPC
    L::Unimplemented,  // PCC
    L::Control(0x80E), // SR
    L::Control(0x800), // USP (other A7)
    L::Unimplemented,  // SSP is A7
    L::Unimplemented,
    L::Unimplemented,
    L::Unimplemented,
    L::Unimplemented,
    L::Control(0x801), // VBR
    L::Control(0x002), // CACR
    L::Control(0x004), // ACR0
    L::Control(0x005), // ACR1
    L::Control(0xC05), // RAMBAR
    L::Control(0xC0F), // MBAR
    L::Debug(0x0),     // CSR
    L::WriteOnlyDebug(0x6),
    L::WriteOnlyDebug(0x7),
    L::WriteOnlyDebug(0x8),
    L::WriteOnlyDebug(0x9),
    L::WriteOnlyDebug(0xC),
    L::WriteOnlyDebug(0xD),
    L::WriteOnlyDebug(0xE),
    L::WriteOnlyDebug(0xF),
];

/// Resolve a logical register for a processor family.
pub fn locate(processor: Processor, reg: SysReg) -> Location {
    match processor {
        Processor::Cpu32 => CPU32_MAP[reg.index()],
        Processor::ColdFire => COLDFIRE_MAP[reg.index()],
    }
}

/// The logical register, if any, that a raw ColdFire debug module register
/// number corresponds to.
pub fn coldfire_debug_alias(number: u8) -> Option<SysReg> {
    SysReg::all().find(|reg| {
        matches!(
            COLDFIRE_MAP[reg.index()],
            L::Debug(n) | L::WriteOnlyDebug(n) if n == number
        )
    })
}

/// Host side copies of registers that cannot be read back.
#[derive(Debug, Clone, Default)]
pub struct ShadowRegisters {
    values: [u32; SysReg::COUNT],
}

impl ShadowRegisters {
    pub fn get(&self, reg: SysReg) -> u32 {
        self.values[reg.index()]
    }

    pub fn set(&mut self, reg: SysReg, value: u32) {
        self.values[reg.index()] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for reg in SysReg::all() {
            assert_eq!(SysReg::from_id(reg.id()), Some(reg));
        }
        assert_eq!(SysReg::from_id(SysReg::COUNT as u16), None);
    }

    #[test]
    fn write_only_registers_are_exactly_those_after_csr() {
        for reg in SysReg::all() {
            let write_only = matches!(
                locate(Processor::ColdFire, reg),
                Location::WriteOnlyDebug(_)
            );
            assert_eq!(write_only, reg > SysReg::Csr, "{reg:?}");
        }
    }

    #[test]
    fn cpu32_table() {
        assert_eq!(locate(Processor::Cpu32, SysReg::Sr), Location::System(0xB));
        assert_eq!(locate(Processor::Cpu32, SysReg::Vbr), Location::System(0xA));
        assert_eq!(locate(Processor::Cpu32, SysReg::Mbar), Location::Cpu32Mbar);
        assert_eq!(locate(Processor::Cpu32, SysReg::Csr), Location::Unimplemented);
    }

    #[test]
    fn debug_numbers_alias_mapped_registers() {
        assert_eq!(coldfire_debug_alias(0x0), Some(SysReg::Csr));
        assert_eq!(coldfire_debug_alias(0x7), Some(SysReg::Tdr));
        assert_eq!(coldfire_debug_alias(0x5), None);
    }

    #[test]
    fn general_register_names() {
        assert_eq!(format!("{:?}", ProReg::new(3).unwrap()), "D3");
        assert_eq!(format!("{:?}", ProReg::A7), "A7");
        assert_eq!(ProReg::new(16), None);
        assert_eq!(ProReg::address(2).unwrap().number(), 0xA);
    }
}
