//! Parallel port access and the pin assignments of the parallel port pods.
//!
//! A pod is wired to the three registers of a PC parallel port. Output
//! lines live in the data or control register, input lines in the status
//! register. Some lines are inverted by the port hardware itself, which is
//! folded into the `active_low` flag of each pin so the rest of the driver
//! only deals with asserted and released lines.

#[cfg(target_os = "linux")]
#[cfg_attr(bdm_docsrs, doc(cfg(target_os = "linux")))]
pub mod ppdev;

use std::io;

use bitflags::bitflags;

use crate::error::Fault;
use crate::status::TargetStatus;

/// Raw register access to a parallel port.
pub trait ParallelPort: Send {
    fn read_data(&mut self) -> io::Result<u8>;
    fn write_data(&mut self, value: u8) -> io::Result<()>;
    fn read_status(&mut self) -> io::Result<u8>;
    fn read_control(&mut self) -> io::Result<u8>;
    fn write_control(&mut self, value: u8) -> io::Result<()>;
}

impl<P: ParallelPort + ?Sized> ParallelPort for Box<P> {
    fn read_data(&mut self) -> io::Result<u8> {
        (**self).read_data()
    }

    fn write_data(&mut self, value: u8) -> io::Result<()> {
        (**self).write_data(value)
    }

    fn read_status(&mut self) -> io::Result<u8> {
        (**self).read_status()
    }

    fn read_control(&mut self) -> io::Result<u8> {
        (**self).read_control()
    }

    fn write_control(&mut self, value: u8) -> io::Result<()> {
        (**self).write_control(value)
    }
}

bitflags! {
    /// Target control lines driven by the host.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct Lines: u8 {
        /// Breakpoint request (BKPT, also used as the CPU32 step line).
        const BKPT = 1 << 0;
        /// Target reset.
        const RESET = 1 << 1;
        /// Bus error. Revision D ColdFire debug modules abort with a
        /// forced transfer acknowledge instead.
        const BERR = 1 << 2;
        /// Serial clock.
        const DSCLK = 1 << 3;
        /// Serial data to the target.
        const DSI = 1 << 4;
    }
}

/// Which port register an output line lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Data,
    Control,
}

/// An output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pin {
    pub register: Register,
    pub mask: u8,
    pub active_low: bool,
}

impl Pin {
    const fn data(mask: u8) -> Pin {
        Pin {
            register: Register::Data,
            mask,
            active_low: false,
        }
    }

    const fn control_inverted(mask: u8) -> Pin {
        Pin {
            register: Register::Control,
            mask,
            active_low: true,
        }
    }

    fn apply(self, asserted: bool, data: &mut u8, control: &mut u8) {
        let reg = match self.register {
            Register::Data => data,
            Register::Control => control,
        };
        if asserted != self.active_low {
            *reg |= self.mask;
        } else {
            *reg &= !self.mask;
        }
    }

    /// Whether the line is asserted given the register contents.
    pub fn is_asserted(self, data: u8, control: u8) -> bool {
        let reg = match self.register {
            Register::Data => data,
            Register::Control => control,
        };
        (reg & self.mask != 0) != self.active_low
    }
}

/// An input line in the status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPin {
    pub mask: u8,
    pub active_low: bool,
}

impl StatusPin {
    const fn high(mask: u8) -> StatusPin {
        StatusPin {
            mask,
            active_low: false,
        }
    }

    const fn low(mask: u8) -> StatusPin {
        StatusPin {
            mask,
            active_low: true,
        }
    }

    pub fn is_asserted(self, status: u8) -> bool {
        (status & self.mask != 0) != self.active_low
    }

    /// The status register bits that report this line as `asserted`.
    pub fn level(self, asserted: bool) -> u8 {
        if asserted != self.active_low {
            self.mask
        } else {
            0
        }
    }
}

/// Pin assignment of one pod design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinMap {
    pub name: &'static str,
    pub dsclk: Pin,
    pub dsi: Pin,
    pub bkpt: Pin,
    pub reset: Pin,
    pub berr: Option<Pin>,
    /// Buffer enable, asserted for as long as the port is open.
    pub enable: Option<Pin>,
    /// Serial data from the target. The port inverts it.
    pub dso: StatusPin,
    pub connected: StatusPin,
    pub powered: StatusPin,
    pub in_reset: StatusPin,
    pub frozen: Option<StatusPin>,
    /// The processor status lines can be read back through the control
    /// register.
    pub pst: bool,
}

/// The public domain CPU32 pod.
pub const CPU32_PD: PinMap = PinMap {
    name: "cpu32-pd",
    dsclk: Pin::data(0x08),
    dsi: Pin::data(0x04),
    bkpt: Pin::data(0x01),
    reset: Pin::data(0x02),
    berr: Some(Pin::data(0x20)),
    enable: Some(Pin::data(0x10)),
    dso: StatusPin::low(0x80),
    connected: StatusPin::high(0x08),
    powered: StatusPin::high(0x10),
    in_reset: StatusPin::low(0x20),
    frozen: Some(StatusPin::high(0x40)),
    pst: false,
};

/// The CPU32 ICD pod. Breakpoint and reset go through the control
/// register, whose lower bits are inverted by the port.
pub const CPU32_ICD: PinMap = PinMap {
    name: "cpu32-icd",
    dsclk: Pin::data(0x01),
    dsi: Pin::data(0x02),
    bkpt: Pin::control_inverted(0x01),
    reset: Pin::control_inverted(0x02),
    berr: Some(Pin::data(0x04)),
    enable: Some(Pin::data(0x80)),
    dso: StatusPin::low(0x80),
    connected: StatusPin::high(0x08),
    powered: StatusPin::high(0x10),
    in_reset: StatusPin::low(0x20),
    frozen: Some(StatusPin::high(0x40)),
    pst: false,
};

/// The P&E ColdFire pod.
pub const COLDFIRE_PE: PinMap = PinMap {
    name: "coldfire-pe",
    dsclk: Pin::data(0x01),
    dsi: Pin::data(0x04),
    bkpt: Pin::data(0x02),
    reset: Pin::data(0x08),
    berr: Some(Pin::data(0x10)),
    enable: None,
    dso: StatusPin::low(0x80),
    connected: StatusPin::high(0x08),
    powered: StatusPin::high(0x10),
    in_reset: StatusPin::low(0x20),
    frozen: None,
    pst: true,
};

/// Control register bits the port inverts on read.
const CONTROL_INVERTED: u8 = 0x0B;

impl PinMap {
    /// Compute register contents driving exactly `lines`, starting from
    /// the current contents so unrelated bits are kept.
    pub fn encode(&self, lines: Lines, data: &mut u8, control: &mut u8) {
        self.dsclk
            .apply(lines.contains(Lines::DSCLK), data, control);
        self.dsi.apply(lines.contains(Lines::DSI), data, control);
        self.bkpt.apply(lines.contains(Lines::BKPT), data, control);
        self.reset.apply(lines.contains(Lines::RESET), data, control);
        if let Some(berr) = self.berr {
            berr.apply(lines.contains(Lines::BERR), data, control);
        }
        if let Some(enable) = self.enable {
            enable.apply(true, data, control);
        }
    }

    /// The lines asserted by the given register contents.
    pub fn decode(&self, data: u8, control: u8) -> Lines {
        let mut lines = Lines::empty();
        lines.set(Lines::DSCLK, self.dsclk.is_asserted(data, control));
        lines.set(Lines::DSI, self.dsi.is_asserted(data, control));
        lines.set(Lines::BKPT, self.bkpt.is_asserted(data, control));
        lines.set(Lines::RESET, self.reset.is_asserted(data, control));
        if let Some(berr) = self.berr {
            lines.set(Lines::BERR, berr.is_asserted(data, control));
        }
        lines
    }

    pub fn pin_status(&self, status: u8) -> PinStatus {
        PinStatus {
            connected: self.connected.is_asserted(status),
            powered: self.powered.is_asserted(status),
            in_reset: self.in_reset.is_asserted(status),
            frozen: self
                .frozen
                .map_or(false, |frozen| frozen.is_asserted(status)),
        }
    }

    /// Extract the PST code from a control register read.
    pub fn pst_from_control(control: u8) -> u8 {
        (control ^ CONTROL_INVERTED) & 0x0F
    }

    /// The control register value the port returns for a PST code.
    pub fn control_from_pst(pst: u8) -> u8 {
        (pst & 0x0F) ^ CONTROL_INVERTED
    }
}

/// Sampled state of the target sense lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PinStatus {
    pub connected: bool,
    pub powered: bool,
    pub in_reset: bool,
    pub frozen: bool,
}

impl PinStatus {
    /// A healthy, connected target that is running.
    pub const READY: PinStatus = PinStatus {
        connected: true,
        powered: true,
        in_reset: false,
        frozen: false,
    };

    /// The link fault that prevents talking to the target, if any.
    pub fn fault(self) -> Option<Fault> {
        if self.in_reset {
            Some(Fault::Reset)
        } else if !self.connected {
            Some(Fault::Cable)
        } else if !self.powered {
            Some(Fault::Power)
        } else {
            None
        }
    }

    /// The status bits the sense lines can report on their own.
    pub fn target_status(self) -> TargetStatus {
        let mut status = TargetStatus::empty();
        status.set(TargetStatus::RESET, self.in_reset);
        status.set(TargetStatus::NOT_CONNECTED, !self.connected);
        status.set(TargetStatus::POWER, !self.powered);
        status.set(TargetStatus::HALT, self.frozen);
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(CPU32_PD)]
    #[test_case(CPU32_ICD)]
    #[test_case(COLDFIRE_PE)]
    fn encoded_lines_decode_back(map: PinMap) {
        for bits in 0..=Lines::all().bits() {
            let lines = Lines::from_bits_truncate(bits);
            let (mut data, mut control) = (0xA5, 0x5A);
            map.encode(lines, &mut data, &mut control);
            assert_eq!(map.decode(data, control), lines, "{}", map.name);
        }
    }

    #[test]
    fn icd_control_lines_are_inverted() {
        let (mut data, mut control) = (0, 0);
        CPU32_ICD.encode(Lines::empty(), &mut data, &mut control);
        assert_eq!(control & 0x03, 0x03);
        CPU32_ICD.encode(Lines::BKPT, &mut data, &mut control);
        assert_eq!(control & 0x03, 0x02);
    }

    #[test]
    fn status_decoding() {
        let status = CPU32_PD.connected.level(true)
            | CPU32_PD.powered.level(true)
            | CPU32_PD.in_reset.level(false);
        assert_eq!(CPU32_PD.pin_status(status), PinStatus::READY);
        assert_eq!(PinStatus::READY.target_status(), TargetStatus::empty());
        assert_eq!(PinStatus::READY.fault(), None);
    }

    #[test_case(PinStatus { in_reset: true, connected: false, ..PinStatus::READY }, Fault::Reset ; "reset first")]
    #[test_case(PinStatus { connected: false, powered: false, ..PinStatus::READY }, Fault::Cable ; "cable before power")]
    #[test_case(PinStatus { powered: false, ..PinStatus::READY }, Fault::Power ; "power")]
    fn link_fault_priority(status: PinStatus, fault: Fault) {
        assert_eq!(status.fault(), Some(fault));
    }

    #[test]
    fn pst_round_trips_through_control_register() {
        for pst in 0..16 {
            assert_eq!(PinMap::pst_from_control(PinMap::control_from_pst(pst)), pst);
        }
    }
}
