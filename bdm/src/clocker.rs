//! Serial clocker for the parallel port pods.
//!
//! Every frame is 17 bits long and shifted MSB first. On each cycle the
//! host presents one bit on DSI, pulses DSCLK and then samples DSO, so the
//! target's reply is received while the command is sent.

use std::fmt;

use crate::error::BdmError;
use crate::link::BdmWire;
use crate::port::{Lines, ParallelPort, PinMap, PinStatus};

/// Number of bits in a frame.
pub const FRAME_BITS: u32 = 17;

const FRAME_MASK: u32 = (1 << FRAME_BITS) - 1;

/// A frame whose last bit has not been clocked yet.
///
/// Holding back the last bit lets the caller change control lines right
/// before the target sees the frame complete. The frame must be finished
/// with [`BdmWire::complete`].
#[must_use = "a pending frame leaves the target mid-frame until it is completed"]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PendingFrame {
    pub(crate) word: u16,
    /// The first 16 bits received.
    pub(crate) received: u32,
}

impl PendingFrame {
    /// The command word being sent.
    pub fn word(&self) -> u16 {
        self.word
    }
}

impl fmt::Debug for PendingFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PendingFrame({:#06x})", self.word)
    }
}

/// A [`BdmWire`] that bit-bangs the serial protocol on a parallel port.
pub struct BitBangWire<P> {
    port: P,
    pins: PinMap,
    delay_ticks: u32,

    /// Shadows of the output registers, so every write starts from what
    /// was last written.
    data: u8,
    control: u8,

    /// Control lines held asserted between frames.
    driven: Lines,
}

impl<P: ParallelPort> BitBangWire<P> {
    pub fn new(mut port: P, pins: PinMap) -> Result<Self, BdmError> {
        let data = port.read_data()?;
        let control = port.read_control()?;

        let mut wire = BitBangWire {
            port,
            pins,
            delay_ticks: 0,
            data,
            control,
            driven: Lines::empty(),
        };

        wire.pins
            .encode(Lines::empty(), &mut wire.data, &mut wire.control);
        wire.port.write_data(wire.data)?;
        wire.port.write_control(wire.control)?;

        tracing::debug!("Initialized {} pod", pins.name);

        Ok(wire)
    }

    pub fn pins(&self) -> &PinMap {
        &self.pins
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn write_lines(&mut self, lines: Lines) -> Result<(), BdmError> {
        let (data, control) = (self.data, self.control);
        self.pins.encode(lines, &mut self.data, &mut self.control);

        if self.data != data {
            self.port.write_data(self.data)?;
        }
        if self.control != control {
            self.port.write_control(self.control)?;
        }
        Ok(())
    }

    /// Busy wait for the configured number of ticks. A tick is one read
    /// of the status register, which takes about a microsecond on the ISA
    /// bus independent of the host speed.
    fn tick(&mut self) -> Result<(), BdmError> {
        for _ in 0..self.delay_ticks {
            self.port.read_status()?;
        }
        Ok(())
    }

    fn clock_bit(&mut self, bit: bool) -> Result<bool, BdmError> {
        let mut lines = self.driven;
        lines.set(Lines::DSI, bit);

        self.write_lines(lines)?;
        self.write_lines(lines | Lines::DSCLK)?;
        self.tick()?;
        self.write_lines(lines)?;
        self.tick()?;

        let status = self.port.read_status()?;
        Ok(self.pins.dso.is_asserted(status))
    }

    /// Clock bits `high..=low` of `frame`, MSB first, into `received`.
    fn clock_bits(
        &mut self,
        frame: u32,
        high: u32,
        low: u32,
        mut received: u32,
    ) -> Result<u32, BdmError> {
        for bit in (low..=high).rev() {
            let sample = self.clock_bit(frame & (1 << bit) != 0)?;
            received = (received << 1) | sample as u32;
        }
        Ok(received)
    }
}

impl<P: ParallelPort> BdmWire for BitBangWire<P> {
    fn pin_status(&mut self) -> Result<PinStatus, BdmError> {
        let status = self.port.read_status()?;
        Ok(self.pins.pin_status(status))
    }

    fn shift(&mut self, word: u16) -> Result<u32, BdmError> {
        let received = self.clock_bits(word as u32, FRAME_BITS - 1, 0, 0)?;
        Ok(received & FRAME_MASK)
    }

    fn shift_partial(&mut self, word: u16) -> Result<PendingFrame, BdmError> {
        let received = self.clock_bits(word as u32, FRAME_BITS - 1, 1, 0)?;
        Ok(PendingFrame { word, received })
    }

    fn complete(&mut self, pending: PendingFrame, assert: Lines) -> Result<u32, BdmError> {
        self.driven |= assert;
        let received = self.clock_bits(pending.word as u32, 0, 0, pending.received)?;
        Ok(received & FRAME_MASK)
    }

    fn drive(&mut self, lines: Lines) -> Result<(), BdmError> {
        self.driven = lines - (Lines::DSCLK | Lines::DSI);
        self.write_lines(self.driven)
    }

    fn read_pst(&mut self) -> Result<Option<u8>, BdmError> {
        if !self.pins.pst {
            return Ok(None);
        }
        let control = self.port.read_control()?;
        Ok(Some(PinMap::pst_from_control(control)))
    }

    fn set_delay(&mut self, ticks: u32) {
        self.delay_ticks = ticks;
    }

    fn delay(&self) -> u32 {
        self.delay_ticks
    }
}
