//! An open BDM device and its block transfer buffer.

use std::fmt;

use crate::error::BdmError;
use crate::pod::Pod;
use crate::registry::{Claim, DeviceName};

/// A pod claimed for one debug session.
///
/// Dropping the device releases the claim. The target is left in whatever
/// state it is in, use [`Device::close`] to let it run first.
pub struct Device {
    name: DeviceName,
    pod: Box<dyn Pod>,
    buffer: Vec<u8>,
    _claim: Claim,
}

impl Device {
    pub(crate) fn new(
        name: DeviceName,
        pod: Box<dyn Pod>,
        buffer_size: usize,
        claim: Claim,
    ) -> Self {
        Device {
            name,
            pod,
            buffer: vec![0; buffer_size],
            _claim: claim,
        }
    }

    pub fn name(&self) -> &DeviceName {
        &self.name
    }

    pub fn pod(&self) -> &dyn Pod {
        self.pod.as_ref()
    }

    pub fn pod_mut(&mut self) -> &mut dyn Pod {
        self.pod.as_mut()
    }

    /// The block transfer buffer. Its bytes are in target order: the
    /// first byte of a word is the one at the lower target address.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Read `count` bytes of target memory at `address` into the buffer.
    pub fn fill_buf(&mut self, address: u32, count: usize) -> Result<(), BdmError> {
        let data = self
            .buffer
            .get_mut(..count)
            .ok_or(BdmError::Unsupported("transfer larger than the I/O buffer"))?;
        self.pod.read_memory(address, data)
    }

    /// Write the first `count` bytes of the buffer to target memory at
    /// `address`.
    pub fn send_buf(&mut self, address: u32, count: usize) -> Result<(), BdmError> {
        let data = self
            .buffer
            .get(..count)
            .ok_or(BdmError::Unsupported("transfer larger than the I/O buffer"))?;
        self.pod.write_memory(address, data)
    }

    /// Close the device, optionally releasing the target to run its own
    /// code first. The claim is dropped in either case.
    pub fn close(mut self, release: bool) -> Result<(), BdmError> {
        if release {
            self.pod.release_chip()?;
        }
        tracing::debug!("Closed {}", self.name);
        Ok(())
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("pod", &self.pod)
            .finish_non_exhaustive()
    }
}
