//! Command/response exchange over a serial BDM link.
//!
//! [`SerialLink`] turns the frame primitive of a [`BdmWire`] into register
//! and memory transactions. It checks the target sense lines before every
//! frame, classifies the status bit of every reply and bounds the number of
//! "not ready" answers it accepts before giving up.

use std::thread;
use std::time::Duration;

use scroll::{Pread, Pwrite, BE};

use crate::clocker::PendingFrame;
use crate::command::{
    Command, Size, RESPONSE_BUS_ERROR, RESPONSE_COMPLETE, RESPONSE_NOT_READY, STATUS_BIT,
};
use crate::config::{BdmConfig, ResetTiming, RetryPolicy};
use crate::error::{BdmError, Fault};
use crate::port::{Lines, PinStatus};
use crate::revision::Capabilities;

/// The physical side of a serial BDM link.
///
/// Implemented by the bit-banging parallel port clocker, and by the
/// simulated targets the tests use.
pub trait BdmWire: Send {
    /// Sample the target sense lines.
    fn pin_status(&mut self) -> Result<PinStatus, BdmError>;

    /// Clock one full frame and return the 17 bits received.
    fn shift(&mut self, word: u16) -> Result<u32, BdmError>;

    /// Clock all but the last bit of a frame.
    fn shift_partial(&mut self, word: u16) -> Result<PendingFrame, BdmError>;

    /// Clock the held back bit of `pending` with `assert` lines driven in
    /// addition to the ones already driven. The extra lines stay asserted
    /// until the next [`BdmWire::drive`].
    fn complete(&mut self, pending: PendingFrame, assert: Lines) -> Result<u32, BdmError>;

    /// Assert exactly `lines` and release all other control lines.
    fn drive(&mut self, lines: Lines) -> Result<(), BdmError>;

    /// Read the processor status lines, if the pod has them.
    fn read_pst(&mut self) -> Result<Option<u8>, BdmError>;

    fn set_delay(&mut self, ticks: u32);

    fn delay(&self) -> u32;

    fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

impl<W: BdmWire + ?Sized> BdmWire for Box<W> {
    fn pin_status(&mut self) -> Result<PinStatus, BdmError> {
        (**self).pin_status()
    }

    fn shift(&mut self, word: u16) -> Result<u32, BdmError> {
        (**self).shift(word)
    }

    fn shift_partial(&mut self, word: u16) -> Result<PendingFrame, BdmError> {
        (**self).shift_partial(word)
    }

    fn complete(&mut self, pending: PendingFrame, assert: Lines) -> Result<u32, BdmError> {
        (**self).complete(pending, assert)
    }

    fn drive(&mut self, lines: Lines) -> Result<(), BdmError> {
        (**self).drive(lines)
    }

    fn read_pst(&mut self) -> Result<Option<u8>, BdmError> {
        (**self).read_pst()
    }

    fn set_delay(&mut self, ticks: u32) {
        (**self).set_delay(ticks)
    }

    fn delay(&self) -> u32 {
        (**self).delay()
    }

    fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// How a stuck target access is aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusErrorMethod {
    /// Pulse the bus error line.
    Pin,
    /// Clock a forced transfer acknowledge.
    ForcedTa,
}

pub struct SerialLink<W> {
    wire: W,
    retry: RetryPolicy,
    reset_timing: ResetTiming,
    bus_error_pulse: Duration,
    bus_error: BusErrorMethod,
    /// Recover from an unrecognized command with a forced transfer
    /// acknowledge.
    nvc_recovery: bool,
    /// The 17 bits received by the last frame.
    last_read: u32,
    debug: bool,
}

impl<W: BdmWire> SerialLink<W> {
    pub fn new(mut wire: W, config: &BdmConfig) -> Self {
        wire.set_delay(config.delay_ticks);
        SerialLink {
            wire,
            retry: config.retry,
            reset_timing: config.reset,
            bus_error_pulse: config.bus_error_pulse(),
            bus_error: BusErrorMethod::Pin,
            nvc_recovery: false,
            last_read: 0,
            debug: config.debug,
        }
    }

    /// Adapt fault recovery to the debug module revision of the target.
    pub fn configure(&mut self, caps: &Capabilities) {
        self.bus_error = if caps.bus_error_pin {
            BusErrorMethod::Pin
        } else {
            BusErrorMethod::ForcedTa
        };
        self.nvc_recovery = caps.forced_ta;
    }

    pub fn wire(&self) -> &W {
        &self.wire
    }

    pub fn wire_mut(&mut self) -> &mut W {
        &mut self.wire
    }

    pub fn last_read(&self) -> u32 {
        self.last_read
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn set_delay(&mut self, ticks: u32) {
        self.wire.set_delay(ticks);
    }

    pub fn delay(&self) -> u32 {
        self.wire.delay()
    }

    pub fn pin_status(&mut self) -> Result<PinStatus, BdmError> {
        self.wire.pin_status()
    }

    pub fn drive(&mut self, lines: Lines) -> Result<(), BdmError> {
        self.wire.drive(lines)
    }

    pub fn read_pst(&mut self) -> Result<Option<u8>, BdmError> {
        self.wire.read_pst()
    }

    pub fn sleep(&mut self, duration: Duration) {
        self.wire.sleep(duration);
    }

    fn log_frame(&self, word: u16, value: u32) {
        if self.debug {
            tracing::debug!("Clocked {:#06x}, received {:#07x}", word, value);
        } else {
            tracing::trace!("Clocked {:#06x}, received {:#07x}", word, value);
        }
    }

    fn check_pins(&mut self) -> Result<(), BdmError> {
        match self.wire.pin_status()?.fault() {
            Some(fault) => Err(fault.into()),
            None => Ok(()),
        }
    }

    /// Clock one frame and classify the reply.
    ///
    /// A "not ready" reply is passed back to the caller, every other
    /// reply with the status bit set is a fault.
    pub fn serial_clock(&mut self, word: u16) -> Result<u32, BdmError> {
        self.check_pins()?;
        let value = self.wire.shift(word)?;
        self.log_frame(word, value);
        self.last_read = value;
        self.classify(value)
    }

    /// Clock `word` holding back its last bit, and clock that bit with
    /// `assert` lines driven.
    pub fn serial_clock_held_back(&mut self, word: u16, assert: Lines) -> Result<u32, BdmError> {
        self.check_pins()?;
        let pending = self.wire.shift_partial(word)?;
        let value = self.wire.complete(pending, assert)?;
        self.log_frame(word, value);
        self.last_read = value;
        self.classify(value)
    }

    fn classify(&mut self, value: u32) -> Result<u32, BdmError> {
        if value & STATUS_BIT == 0 || value == RESPONSE_NOT_READY {
            return Ok(value);
        }

        if value == RESPONSE_BUS_ERROR {
            tracing::debug!("Target reported a bus error");
            return Err(Fault::BusError.into());
        }

        if self.nvc_recovery {
            tracing::debug!("Command not accepted, forcing transfer acknowledge");
            for command in [Command::ForceTa, Command::Nop, Command::Nop] {
                let value = self.wire.shift(command.word())?;
                self.log_frame(command.word(), value);
                self.last_read = value;
            }
            return Err(Fault::ForcedTa.into());
        }

        Err(Fault::InvalidCommand.into())
    }

    /// Clock `word` until the target stops answering "not ready".
    ///
    /// After `retry.escalate_after` consecutive not-ready answers a bus
    /// error is forced to break the target out of a stuck access. After
    /// `retry.give_up_after` the exchange fails with [`Fault::Response`].
    pub fn clock_until_ready(&mut self, word: u16) -> Result<u32, BdmError> {
        for attempt in 1..=self.retry.give_up_after {
            let value = self.serial_clock(word)?;
            if value != RESPONSE_NOT_READY {
                return Ok(value);
            }
            if attempt == self.retry.escalate_after {
                let fault = self.gen_bus_error()?;
                tracing::debug!("Target not ready after {} attempts, forced {:?}", attempt, fault);
            }
        }
        Err(Fault::Response.into())
    }

    /// Abort the access the target is stuck in.
    pub fn gen_bus_error(&mut self) -> Result<Fault, BdmError> {
        match self.bus_error {
            BusErrorMethod::Pin => {
                self.wire.drive(Lines::BERR)?;
                self.wire.sleep(self.bus_error_pulse);
                self.wire.drive(Lines::empty())?;
                Ok(Fault::BusError)
            }
            BusErrorMethod::ForcedTa => {
                for command in [Command::ForceTa, Command::Nop] {
                    let value = self.wire.shift(command.word())?;
                    self.log_frame(command.word(), value);
                    self.last_read = value;
                }
                Ok(Fault::ForcedTa)
            }
        }
    }

    /// Send a command followed by its operand words.
    ///
    /// The replies to these frames belong to the previous exchange, only
    /// faults are of interest.
    pub fn send(&mut self, command: Command, operands: &[u16]) -> Result<(), BdmError> {
        self.serial_clock(command.word())?;
        for &word in operands {
            self.serial_clock(word)?;
        }
        Ok(())
    }

    /// Collect the result of a read type command.
    pub fn fetch(&mut self, size: Size) -> Result<u32, BdmError> {
        let mut value = 0;
        for _ in 0..size.words() {
            let word = self.clock_until_ready(Command::Nop.word())?;
            value = (value << 16) | (word & 0xFFFF);
        }
        Ok(value)
    }

    /// Wait for a write type command to complete.
    pub fn finish(&mut self) -> Result<(), BdmError> {
        let value = self.clock_until_ready(Command::Nop.word())?;
        if value != RESPONSE_COMPLETE {
            tracing::debug!("Unexpected write completion {:#07x}", value);
            return Err(Fault::Response.into());
        }
        Ok(())
    }

    /// Read a 32 bit value with `command`.
    pub fn read_long(&mut self, command: Command, operands: &[u16]) -> Result<u32, BdmError> {
        self.send(command, operands)?;
        self.fetch(Size::Long)
    }

    /// Write a 32 bit value with `command`.
    pub fn write_long(
        &mut self,
        command: Command,
        operands: &[u16],
        value: u32,
    ) -> Result<(), BdmError> {
        self.send(command, operands)?;
        self.send_data(Size::Long, value)?;
        self.finish()
    }

    fn send_data(&mut self, size: Size, value: u32) -> Result<(), BdmError> {
        if size == Size::Long {
            self.serial_clock((value >> 16) as u16)?;
        }
        self.serial_clock(value as u16)?;
        Ok(())
    }

    /// Read one memory operand of `size` at `address`.
    pub fn read_at(&mut self, size: Size, address: u32) -> Result<u32, BdmError> {
        self.send(Command::Read(size), &split(address))?;
        self.fetch(size)
    }

    /// Write one memory operand of `size` at `address`.
    pub fn write_at(&mut self, size: Size, address: u32, value: u32) -> Result<(), BdmError> {
        self.send(Command::Write(size), &split(address))?;
        self.send_data(size, value)?;
        self.finish()
    }

    /// Read target memory, using the widest aligned access for each
    /// chunk. Consecutive chunks of the same size use DUMP, which
    /// continues at the address following the previous access.
    pub fn read_memory(&mut self, address: u32, data: &mut [u8]) -> Result<(), BdmError> {
        let mut offset = 0;
        let mut previous = None;

        while offset < data.len() {
            let at = address.wrapping_add(offset as u32);
            let size = Size::widest(at, data.len() - offset);
            let value = if previous == Some(size) {
                self.send(Command::Dump(size), &[])?;
                self.fetch(size)?
            } else {
                self.read_at(size, at)?
            };
            put(data, offset, size, value)?;
            previous = Some(size);
            offset += size.bytes();
        }
        Ok(())
    }

    /// Write target memory, the counterpart of [`SerialLink::read_memory`]
    /// using FILL for continuation chunks.
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), BdmError> {
        let mut offset = 0;
        let mut previous = None;

        while offset < data.len() {
            let at = address.wrapping_add(offset as u32);
            let size = Size::widest(at, data.len() - offset);
            let value = get(data, offset, size)?;
            if previous == Some(size) {
                self.send(Command::Fill(size), &[])?;
                self.send_data(size, value)?;
                self.finish()?;
            } else {
                self.write_at(size, at, value)?;
            }
            previous = Some(size);
            offset += size.bytes();
        }
        Ok(())
    }

    /// Run the pin sequence that resets the target into background mode.
    ///
    /// BKPT is kept asserted while RESET is negated.
    pub fn reset_sequence(&mut self) -> Result<(), BdmError> {
        let timing = self.reset_timing;
        self.wire.drive(Lines::empty())?;
        self.wire.sleep(timing.settle());
        self.wire.drive(Lines::RESET | Lines::BKPT)?;
        self.wire.sleep(timing.assert());
        self.wire.drive(Lines::BKPT)?;
        self.wire.sleep(timing.hold_breakpoint());
        self.wire.drive(Lines::empty())?;
        self.wire.sleep(timing.release());
        Ok(())
    }

    /// Pulse reset with BKPT released, so the target starts running its
    /// own code.
    pub fn release_sequence(&mut self) -> Result<(), BdmError> {
        let timing = self.reset_timing;
        self.wire.drive(Lines::empty())?;
        self.wire.sleep(timing.settle());
        self.wire.drive(Lines::RESET)?;
        self.wire.sleep(timing.assert());
        self.wire.drive(Lines::empty())?;
        Ok(())
    }
}

/// Split a 32 bit operand into its two command words.
pub(crate) fn split(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, value as u16]
}

fn put(data: &mut [u8], offset: usize, size: Size, value: u32) -> Result<usize, BdmError> {
    let written = match size {
        Size::Byte => data.pwrite_with(value as u8, offset, BE),
        Size::Word => data.pwrite_with(value as u16, offset, BE),
        Size::Long => data.pwrite_with(value, offset, BE),
    };
    written.map_err(|_| BdmError::Unsupported("memory access outside the buffer"))
}

fn get(data: &[u8], offset: usize, size: Size) -> Result<u32, BdmError> {
    let value = match size {
        Size::Byte => data.pread_with::<u8>(offset, BE).map(u32::from),
        Size::Word => data.pread_with::<u16>(offset, BE).map(u32::from),
        Size::Long => data.pread_with::<u32>(offset, BE),
    };
    value.map_err(|_| BdmError::Unsupported("memory access outside the buffer"))
}
