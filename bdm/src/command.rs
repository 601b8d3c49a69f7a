//! BDM command words.
//!
//! A command is a 16-bit opcode, optionally OR'd with an operand size or a
//! register number. It is shifted out MSB first inside a 17-bit frame whose
//! leading bit is the status bit set by the target.

use std::fmt;

/// Status bit of a 17-bit frame.
pub const STATUS_BIT: u32 = 1 << 16;

/// "Not ready": the previous command has not completed yet.
pub const RESPONSE_NOT_READY: u32 = 0x1_0000;
/// The previous command was terminated by a bus error.
pub const RESPONSE_BUS_ERROR: u32 = 0x1_0001;
/// The previous command was not recognized.
pub const RESPONSE_ILLEGAL: u32 = 0x1_FFFF;
/// Answer of the target after a write type command has completed.
pub const RESPONSE_COMPLETE: u32 = 0x0_FFFF;

const NOP: u16 = 0x0000;
const RST: u16 = 0x0400;
const CALL: u16 = 0x0800;
const GO: u16 = 0x0C00;
const WRITE: u16 = 0x1800;
const READ: u16 = 0x1900;
const FILL: u16 = 0x1C00;
const DUMP: u16 = 0x1D00;
const WRREG: u16 = 0x2080;
const RDREG: u16 = 0x2180;
const WSREG: u16 = 0x2480;
const RSREG: u16 = 0x2580;
const WCREG: u16 = 0x2880;
const RCREG: u16 = 0x2980;
const WDMREG: u16 = 0x2C80;
const RDMREG: u16 = 0x2D80;
/// Revision D "terminate the stuck bus cycle" request.
const FORCE_TA: u16 = 0x0001;

/// Operand size of a memory command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Size {
    Byte,
    Word,
    Long,
}

impl Size {
    fn bits(self) -> u16 {
        match self {
            Size::Byte => 0x0000,
            Size::Word => 0x0040,
            Size::Long => 0x0080,
        }
    }

    /// Number of bytes moved by one access of this size.
    pub fn bytes(self) -> usize {
        match self {
            Size::Byte => 1,
            Size::Word => 2,
            Size::Long => 4,
        }
    }

    /// Number of 16-bit words carrying an operand of this size.
    pub fn words(self) -> usize {
        match self {
            Size::Byte | Size::Word => 1,
            Size::Long => 2,
        }
    }

    /// The widest access that is aligned at `address` and fits into
    /// `remaining` bytes.
    pub fn widest(address: u32, remaining: usize) -> Size {
        if address % 4 == 0 && remaining >= 4 {
            Size::Long
        } else if address % 2 == 0 && remaining >= 2 {
            Size::Word
        } else {
            Size::Byte
        }
    }

    fn from_bits(bits: u16) -> Option<Size> {
        match bits & 0x00C0 {
            0x0000 => Some(Size::Byte),
            0x0040 => Some(Size::Word),
            0x0080 => Some(Size::Long),
            _ => None,
        }
    }
}

/// A decoded BDM command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Nop,
    Go,
    Call,
    Reset,
    /// Read a general register, D0-D7 are 0-7 and A0-A7 are 8-15.
    ReadRegister(u8),
    WriteRegister(u8),
    /// CPU32 system register access by its 4-bit code.
    ReadSystemRegister(u8),
    WriteSystemRegister(u8),
    /// ColdFire control register access, the register address follows.
    ReadControlRegister,
    WriteControlRegister,
    /// ColdFire debug module register access by its 4-bit number.
    ReadDebugRegister(u8),
    WriteDebugRegister(u8),
    Read(Size),
    Write(Size),
    Dump(Size),
    Fill(Size),
    ForceTa,
}

impl Command {
    /// The command word shifted to the target.
    pub fn word(self) -> u16 {
        match self {
            Command::Nop => NOP,
            Command::Go => GO,
            Command::Call => CALL,
            Command::Reset => RST,
            Command::ReadRegister(reg) => RDREG | (reg as u16 & 0xF),
            Command::WriteRegister(reg) => WRREG | (reg as u16 & 0xF),
            Command::ReadSystemRegister(code) => RSREG | (code as u16 & 0xF),
            Command::WriteSystemRegister(code) => WSREG | (code as u16 & 0xF),
            Command::ReadControlRegister => RCREG,
            Command::WriteControlRegister => WCREG,
            Command::ReadDebugRegister(reg) => RDMREG | (reg as u16 & 0xF),
            Command::WriteDebugRegister(reg) => WDMREG | (reg as u16 & 0xF),
            Command::Read(size) => READ | size.bits(),
            Command::Write(size) => WRITE | size.bits(),
            Command::Dump(size) => DUMP | size.bits(),
            Command::Fill(size) => FILL | size.bits(),
            Command::ForceTa => FORCE_TA,
        }
    }

    /// Decode a command word, as seen by the target side of the link.
    pub fn decode(word: u16) -> Option<Command> {
        let reg = (word & 0xF) as u8;
        let command = match word {
            NOP => Command::Nop,
            GO => Command::Go,
            CALL => Command::Call,
            RST => Command::Reset,
            FORCE_TA => Command::ForceTa,
            RCREG => Command::ReadControlRegister,
            WCREG => Command::WriteControlRegister,
            _ => match word & 0xFFF0 {
                RDREG => Command::ReadRegister(reg),
                WRREG => Command::WriteRegister(reg),
                RSREG => Command::ReadSystemRegister(reg),
                WSREG => Command::WriteSystemRegister(reg),
                RDMREG => Command::ReadDebugRegister(reg),
                WDMREG => Command::WriteDebugRegister(reg),
                _ => {
                    let size = Size::from_bits(word)?;
                    match word & 0xFF3F {
                        READ => Command::Read(size),
                        WRITE => Command::Write(size),
                        DUMP => Command::Dump(size),
                        FILL => Command::Fill(size),
                        _ => return None,
                    }
                }
            },
        };
        Some(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:#06x})", self, self.word())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Command::Go, 0x0C00)]
    #[test_case(Command::ReadRegister(0xF), 0x218F)]
    #[test_case(Command::WriteSystemRegister(0xB), 0x248B)]
    #[test_case(Command::Read(Size::Long), 0x1980)]
    #[test_case(Command::Fill(Size::Word), 0x1C40)]
    #[test_case(Command::Dump(Size::Byte), 0x1D00)]
    #[test_case(Command::ReadDebugRegister(0), 0x2D80)]
    #[test_case(Command::ReadControlRegister, 0x2980)]
    fn command_words(command: Command, word: u16) {
        assert_eq!(command.word(), word);
        assert_eq!(Command::decode(word), Some(command));
    }

    #[test]
    fn undefined_words_do_not_decode() {
        assert_eq!(Command::decode(0x19C0), None);
        assert_eq!(Command::decode(0x7777), None);
    }

    #[test_case(0, 7, Size::Long)]
    #[test_case(2, 7, Size::Word)]
    #[test_case(1, 7, Size::Byte)]
    #[test_case(4, 3, Size::Word)]
    #[test_case(4, 1, Size::Byte)]
    fn widest_aligned_access(address: u32, remaining: usize, size: Size) {
        assert_eq!(Size::widest(address, remaining), size);
    }
}
