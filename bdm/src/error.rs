use std::fmt;

/// A fault reported by the BDM link or the target.
///
/// The numeric codes are stable and shared with everything that talks to
/// the driver, so never renumber a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error, docsplay::Display)]
#[repr(i32)]
pub enum Fault {
    /// Unknown fault
    Unknown = 1,
    /// Target has no power
    Power = 2,
    /// Cable is not connected
    Cable = 3,
    /// Target did not respond
    Response = 4,
    /// Target is held in reset
    Reset = 5,
    /// Port access failed
    Port = 6,
    /// Bus error on the target
    BusError = 7,
    /// Target did not accept the command
    InvalidCommand = 8,
    /// Operation timed out
    Timeout = 9,
    /// Bus cycle terminated with a forced transfer acknowledge
    ForcedTa = 10,
}

impl Fault {
    /// The stable numeric code of this fault.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Look up a fault by its numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        let fault = match code {
            1 => Fault::Unknown,
            2 => Fault::Power,
            3 => Fault::Cable,
            4 => Fault::Response,
            5 => Fault::Reset,
            6 => Fault::Port,
            7 => Fault::BusError,
            8 => Fault::InvalidCommand,
            9 => Fault::Timeout,
            10 => Fault::ForcedTa,
            _ => return None,
        };
        Some(fault)
    }

    /// Returns `true` if the in-flight access was aborted by force.
    ///
    /// A pulsed bus error and a forced transfer acknowledge are the same
    /// event seen through different debug module revisions, so callers
    /// should treat both alike.
    pub fn is_forced_abort(self) -> bool {
        matches!(self, Fault::BusError | Fault::ForcedTa)
    }
}

/// The error type of every driver operation.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum BdmError {
    /// {0}
    Fault(#[from] Fault),

    /// Parallel port access failed.
    Io(#[from] std::io::Error),

    /// USB transfer failed.
    Usb(#[from] rusb::Error),

    /// The pod answered command {command:#04x} with an unexpected reply ({reply:02x?}).
    UnexpectedReply { command: u8, reply: Vec<u8> },

    /// Register {0} cannot be accessed this way.
    InvalidRegister(RegisterAccess),

    /// Invalid device name: {0}
    InvalidDeviceName(String),

    /// Device {0} is already open.
    DeviceBusy(String),

    /// No such device: {0}
    NotFound(String),

    /// Not supported: {0}
    Unsupported(&'static str),

    /// Invalid configuration.
    Config(#[from] serde_yaml::Error),
}

impl BdmError {
    /// The fault code a caller of the core API would see for this error.
    pub fn fault(&self) -> Fault {
        match self {
            BdmError::Fault(fault) => *fault,
            BdmError::Io(_) | BdmError::Usb(_) | BdmError::DeviceBusy(_) => Fault::Port,
            BdmError::UnexpectedReply { .. } => Fault::Response,
            BdmError::InvalidRegister(_) => Fault::InvalidCommand,
            BdmError::InvalidDeviceName(_)
            | BdmError::NotFound(_)
            | BdmError::Unsupported(_)
            | BdmError::Config(_) => Fault::Unknown,
        }
    }

    /// Returns the fault if this error is one.
    pub fn as_fault(&self) -> Option<Fault> {
        match self {
            BdmError::Fault(fault) => Some(*fault),
            _ => None,
        }
    }
}

/// Describes a register access that was rejected, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterAccess {
    pub id: u16,
    pub mode: crate::registers::RegisterMode,
}

impl fmt::Display for RegisterAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} ({:?})", self.id, self.mode)
    }
}
