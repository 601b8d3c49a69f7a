//! Command frames of the TBLCF firmware.
//!
//! A frame is `[reply length, command, parameters...]` with multi-byte
//! parameters in big endian order. A successful reply starts with the
//! command code echoed back.

use scroll::{Pread, BE};

use crate::error::{BdmError, Fault};

pub const CMD_GET_VERSION: u8 = 0x01;
pub const CMD_GET_STATUS: u8 = 0x02;
pub const CMD_SET_TARGET: u8 = 0x03;
pub const CMD_RESET: u8 = 0x04;

pub const CMD_HALT: u8 = 0x10;
pub const CMD_GO: u8 = 0x11;
pub const CMD_STEP: u8 = 0x12;
pub const CMD_ASSERT_TA: u8 = 0x13;

pub const CMD_READ_REG: u8 = 0x20;
pub const CMD_WRITE_REG: u8 = 0x21;
pub const CMD_READ_CREG: u8 = 0x22;
pub const CMD_WRITE_CREG: u8 = 0x23;
pub const CMD_READ_DREG: u8 = 0x24;
pub const CMD_WRITE_DREG: u8 = 0x25;

pub const CMD_READ_MEM8: u8 = 0x30;
pub const CMD_READ_MEM16: u8 = 0x31;
pub const CMD_READ_MEM32: u8 = 0x32;
pub const CMD_WRITE_MEM8: u8 = 0x33;
pub const CMD_WRITE_MEM16: u8 = 0x34;
pub const CMD_WRITE_MEM32: u8 = 0x35;
pub const CMD_READ_MEMBLOCK: u8 = 0x36;
pub const CMD_WRITE_MEMBLOCK: u8 = 0x37;

/// Reply code of a command the target did not complete.
pub const CMD_FAILED: u8 = 0xFF;

/// Largest payload of a block transfer, in bytes.
pub const MAX_DATA_SIZE: usize = 56;

/// `CMD_SET_TARGET` parameter selecting a ColdFire target.
pub const TARGET_COLDFIRE: u8 = 0x01;

/// `CMD_RESET` parameter: come out of reset halted in background mode.
pub const RESET_BDM: u8 = 0x00;
/// `CMD_RESET` parameter: come out of reset running.
pub const RESET_NORMAL: u8 = 0x01;

/// Width of a forced transfer acknowledge pulse, in microseconds.
pub const ASSERT_TA_US: u8 = 50;

/// `CMD_GET_STATUS` flag: the reset line is asserted.
pub const STATUS_RESET_ASSERTED: u8 = 0x01;
/// `CMD_GET_STATUS` flag: a reset was seen since the last query.
pub const STATUS_RESET_DETECTED: u8 = 0x02;

/// A command frame being built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    frame: Vec<u8>,
}

impl Request {
    /// Start a frame for `command` that expects `reply_len` bytes back,
    /// counting the echoed command byte.
    pub fn new(command: u8, reply_len: u8) -> Self {
        Request {
            frame: vec![reply_len, command],
        }
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.frame.push(value);
        self
    }

    pub fn u16(mut self, value: u16) -> Self {
        self.frame.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.frame.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.frame.extend_from_slice(data);
        self
    }

    pub fn command(&self) -> u8 {
        self.frame[1]
    }

    pub fn reply_len(&self) -> usize {
        self.frame[0] as usize
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.frame
    }
}

/// A reply whose command echo has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    command: u8,
    data: Vec<u8>,
}

impl Reply {
    /// Validate the reply to `request`.
    pub fn check(request: &Request, reply: Vec<u8>) -> Result<Self, BdmError> {
        let command = request.command();
        if reply.first() == Some(&CMD_FAILED) {
            tracing::debug!("Command {:#04x} failed on the target", command);
            return Err(Fault::BusError.into());
        }
        if reply.first() != Some(&command) || reply.len() < request.reply_len() {
            return Err(BdmError::UnexpectedReply { command, reply });
        }
        Ok(Reply {
            command,
            data: reply[1..].to_vec(),
        })
    }

    /// Reply payload after the echoed command.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn u8(&self, offset: usize) -> Result<u8, BdmError> {
        self.data
            .pread_with::<u8>(offset, BE)
            .map_err(|_| self.malformed())
    }

    pub fn u16(&self, offset: usize) -> Result<u16, BdmError> {
        self.data
            .pread_with::<u16>(offset, BE)
            .map_err(|_| self.malformed())
    }

    pub fn u32(&self, offset: usize) -> Result<u32, BdmError> {
        self.data
            .pread_with::<u32>(offset, BE)
            .map_err(|_| self.malformed())
    }

    fn malformed(&self) -> BdmError {
        let mut reply = vec![self.command];
        reply.extend_from_slice(&self.data);
        BdmError::UnexpectedReply {
            command: self.command,
            reply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn frames_are_big_endian() {
        let request = Request::new(CMD_WRITE_CREG, 1)
            .u16(0x080F)
            .u32(0x1234_5678);
        assert_eq!(
            request.as_bytes(),
            &[1, CMD_WRITE_CREG, 0x08, 0x0F, 0x12, 0x34, 0x56, 0x78]
        );
    }

    #[test]
    fn reply_must_echo_command() {
        let request = Request::new(CMD_READ_MEM32, 5).u32(0x1000);

        let reply = Reply::check(&request, vec![CMD_READ_MEM32, 0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert_eq!(reply.u32(0).unwrap(), 0xDEAD_BEEF);
        assert_eq!(reply.u16(2).unwrap(), 0xBEEF);

        let err = Reply::check(&request, vec![CMD_READ_MEM16, 0, 0]).unwrap_err();
        assert!(matches!(
            err,
            BdmError::UnexpectedReply {
                command: CMD_READ_MEM32,
                ..
            }
        ));
    }

    #[test]
    fn failed_command_is_a_bus_error() {
        let request = Request::new(CMD_WRITE_MEM8, 1).u32(0x1000).u8(0);
        let err = Reply::check(&request, vec![CMD_FAILED]).unwrap_err();
        assert_eq!(err.as_fault(), Some(Fault::BusError));
    }

    #[test]
    fn short_payload_is_an_error() {
        let request = Request::new(CMD_GET_VERSION, 1);
        let reply = Reply::check(&request, vec![CMD_GET_VERSION]).unwrap();
        assert!(reply.u16(0).is_err());
    }
}
