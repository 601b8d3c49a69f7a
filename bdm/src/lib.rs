//! # Background Debug Mode driver for CPU32 and ColdFire targets
//!
//! Talks to Motorola CPU32 and ColdFire processors through a BDM pod: the
//! public domain and ICD CPU32 parallel port cables, the P&E ColdFire
//! parallel port cable and the Turbo BDM Light ColdFire USB pod.
//!
//! # Examples
//!
//! ## Halting a target and reading its program counter
//! ```no_run
//! # use bdm::BdmError;
//! use bdm::{BdmConfig, RegisterMode, Registry, SysReg};
//!
//! let registry = Registry::new(BdmConfig::default());
//! let mut device = registry.open("/dev/bdmcf0")?;
//!
//! let pod = device.pod_mut();
//! pod.stop_chip()?;
//! let pc = pod.read_sysreg(SysReg::Rpc as u16, RegisterMode::Mapped)?;
//! println!("Halted at {pc:#010x}");
//! # Ok::<(), BdmError>(())
//! ```
//!
//! ## Buffered download
//!
//! ```no_run
//! # use bdm::BdmError;
//! use bdm::{BdmConfig, Registry};
//!
//! let registry = Registry::new(BdmConfig::default());
//! let mut device = registry.open("/dev/tblcf0")?;
//!
//! device.buffer_mut()[..4].copy_from_slice(&[0x4e, 0x71, 0x4e, 0x75]);
//! device.send_buf(0x2000_0000, 4)?;
//! device.close(true)?;
//! # Ok::<(), BdmError>(())
//! ```

#![cfg_attr(bdm_docsrs, feature(doc_cfg))]

pub mod clocker;
pub mod command;
pub mod config;
mod device;
mod error;
pub mod link;
pub mod pod;
pub mod port;
pub mod registers;
mod registry;
pub mod revision;
pub mod status;


pub use crate::config::BdmConfig;
pub use crate::device::Device;
pub use crate::error::{BdmError, Fault, RegisterAccess};
pub use crate::pod::{Interface, Pod, Processor};
pub use crate::registers::{ProReg, RegisterMode, SysReg};
pub use crate::registry::{parallel_pod, DeviceName, Registry};
pub use crate::revision::DebugRevision;
pub use crate::status::TargetStatus;

/// Version of this driver.
pub fn driver_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_version_is_the_crate_version() {
        assert_eq!(driver_version(), "0.3.0");
    }
}
