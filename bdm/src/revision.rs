//! ColdFire debug module revisions and what differs between them.

use std::fmt;

use crate::status::Csr;

/// Revision of the ColdFire debug module, read from the CSR hardware
/// revision level field when the device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DebugRevision {
    A,
    B,
    C,
    D,
}

/// Per-revision behavior, kept in one table so the deltas are auditable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The pod has a dedicated bus error line. Without it a stuck bus
    /// cycle is terminated with a forced transfer acknowledge instead.
    pub bus_error_pin: bool,
    /// Invalid commands can be recovered with a forced transfer
    /// acknowledge followed by two no-ops.
    pub forced_ta: bool,
    /// Stepping masks interrupts in SR and the saved mask has to be put
    /// back before the target is allowed to run.
    pub interrupt_mask_save: bool,
    /// Bits OR'd into CACR to invalidate the caches.
    pub cache_invalidate: u32,
    /// The processor status lines are wired to the parallel port.
    pub pst_lines: bool,
}

const REV_A: Capabilities = Capabilities {
    bus_error_pin: true,
    forced_ta: false,
    interrupt_mask_save: false,
    cache_invalidate: 0x0100_0100,
    pst_lines: true,
};

const REV_B: Capabilities = REV_A;

const REV_C: Capabilities = Capabilities {
    cache_invalidate: 0x0104_0100,
    ..REV_B
};

const REV_D: Capabilities = Capabilities {
    bus_error_pin: false,
    forced_ta: true,
    interrupt_mask_save: true,
    cache_invalidate: 0x0104_0100,
    pst_lines: false,
};

impl DebugRevision {
    /// Decode the CSR hardware revision level (bits 23..20).
    ///
    /// Levels newer than the ones known here behave like revision D.
    pub fn from_csr(csr: u32) -> DebugRevision {
        match Csr(csr).hrl() {
            0 => DebugRevision::A,
            1 | 9 => DebugRevision::B,
            2 => DebugRevision::C,
            _ => DebugRevision::D,
        }
    }

    pub fn capabilities(self) -> Capabilities {
        match self {
            DebugRevision::A => REV_A,
            DebugRevision::B => REV_B,
            DebugRevision::C => REV_C,
            DebugRevision::D => REV_D,
        }
    }
}

impl fmt::Display for DebugRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rev {self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0x0000_0000, DebugRevision::A)]
    #[test_case(0x0010_0000, DebugRevision::B)]
    #[test_case(0x0090_0000, DebugRevision::B)]
    #[test_case(0x0020_0000, DebugRevision::C)]
    #[test_case(0x0030_0000, DebugRevision::D)]
    #[test_case(0x01B0_0000, DebugRevision::D)]
    fn revision_from_csr(csr: u32, revision: DebugRevision) {
        assert_eq!(DebugRevision::from_csr(csr), revision);
    }

    #[test]
    fn revision_d_has_no_bus_error_pin() {
        let caps = DebugRevision::D.capabilities();
        assert!(!caps.bus_error_pin);
        assert!(caps.forced_ta);
        assert!(caps.interrupt_mask_save);
    }

    #[test_case(DebugRevision::A, 0x0100_0100)]
    #[test_case(DebugRevision::B, 0x0100_0100)]
    #[test_case(DebugRevision::C, 0x0104_0100)]
    #[test_case(DebugRevision::D, 0x0104_0100)]
    fn cache_invalidate_pattern(revision: DebugRevision, bits: u32) {
        assert_eq!(revision.capabilities().cache_invalidate, bits);
    }
}
