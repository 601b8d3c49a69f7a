//! Parallel port access through the Linux `ppdev` driver.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use super::ParallelPort;

// ioctl request numbers from <linux/ppdev.h>.
const PPRSTATUS: u32 = 0x8001_7081;
const PPRCONTROL: u32 = 0x8001_7083;
const PPWCONTROL: u32 = 0x4001_7084;
const PPRDATA: u32 = 0x8001_7085;
const PPWDATA: u32 = 0x4001_7086;
const PPCLAIM: u32 = 0x0000_708B;
const PPRELEASE: u32 = 0x0000_708C;

/// A claimed `/dev/parportN`.
#[derive(Debug)]
pub struct PpdevPort {
    file: File,
}

impl PpdevPort {
    /// Open and claim the port. The claim is held until the port is
    /// dropped.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let port = PpdevPort { file };
        port.ioctl_none(PPCLAIM)?;
        tracing::debug!("Claimed parallel port {}", path.display());
        Ok(port)
    }

    /// Open `/dev/parport<index>`.
    pub fn open_index(index: u32) -> io::Result<Self> {
        Self::open(format!("/dev/parport{index}"))
    }

    fn ioctl_none(&self, request: u32) -> io::Result<()> {
        // SAFETY: the request takes no argument and the descriptor is valid
        // for the lifetime of `self.file`.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn ioctl_read(&self, request: u32) -> io::Result<u8> {
        let mut value: libc::c_uchar = 0;
        // SAFETY: the request writes a single byte through the pointer.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                request as _,
                &mut value as *mut libc::c_uchar,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(value)
    }

    fn ioctl_write(&self, request: u32, value: u8) -> io::Result<()> {
        let value: libc::c_uchar = value;
        // SAFETY: the request reads a single byte through the pointer.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                request as _,
                &value as *const libc::c_uchar,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl ParallelPort for PpdevPort {
    fn read_data(&mut self) -> io::Result<u8> {
        self.ioctl_read(PPRDATA)
    }

    fn write_data(&mut self, value: u8) -> io::Result<()> {
        self.ioctl_write(PPWDATA, value)
    }

    fn read_status(&mut self) -> io::Result<u8> {
        self.ioctl_read(PPRSTATUS)
    }

    fn read_control(&mut self) -> io::Result<u8> {
        self.ioctl_read(PPRCONTROL)
    }

    fn write_control(&mut self, value: u8) -> io::Result<()> {
        self.ioctl_write(PPWCONTROL, value)
    }
}

impl Drop for PpdevPort {
    fn drop(&mut self) {
        if let Err(e) = self.ioctl_none(PPRELEASE) {
            tracing::warn!("Failed to release parallel port: {}", e);
        }
    }
}
