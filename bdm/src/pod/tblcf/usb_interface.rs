//! USB access to TBLCF pods through vendor control transfers.

use std::time::Duration;

use rusb::{request_type, Context, Device, DeviceHandle, Direction, Recipient, RequestType, UsbContext};

use crate::error::BdmError;

use super::TblcfTransport;

pub const TBLCF_VID: u16 = 0x0425;
pub const TBLCF_PID: u16 = 0x1001;

const INTERFACE: u8 = 0;

/// Where a TBLCF pod sits on the USB bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TblcfInfo {
    /// Position among the TBLCF pods, the `N` of `/dev/tblcfN`.
    pub index: usize,
    pub bus_number: u8,
    pub address: u8,
}

impl TblcfInfo {
    pub fn device_name(&self) -> String {
        format!("/dev/tblcf{}", self.index)
    }
}

fn is_tblcf_device<T: UsbContext>(device: &Device<T>) -> bool {
    matches!(
        device.device_descriptor(),
        Ok(descriptor) if descriptor.vendor_id() == TBLCF_VID && descriptor.product_id() == TBLCF_PID
    )
}

/// An open TBLCF pod.
///
/// Each command frame becomes one vendor control transfer on endpoint 0.
/// The command is the request code, the first four parameter bytes are
/// carried in the value and index fields and the rest of the frame is the
/// data stage. Frames without a data stage are read back from the pod,
/// frames with one are written and acknowledged by the transfer itself.
pub struct TblcfUsbDevice {
    handle: DeviceHandle<Context>,
    timeout: Duration,
}

impl TblcfUsbDevice {
    /// Open the `index`-th TBLCF pod found on the bus.
    pub fn open_nth(index: usize, timeout: Duration) -> Result<Self, BdmError> {
        let context = Context::new()?;

        tracing::debug!("Acquired libusb context.");

        let device = context
            .devices()?
            .iter()
            .filter(is_tblcf_device)
            .nth(index)
            .ok_or_else(|| BdmError::NotFound(format!("/dev/tblcf{index}")))?;

        let mut handle = device.open()?;

        tracing::debug!("Acquired handle for TBLCF pod");

        handle.claim_interface(INTERFACE)?;

        tracing::debug!("Claimed interface {} of TBLCF pod", INTERFACE);

        Ok(TblcfUsbDevice { handle, timeout })
    }
}

impl TblcfTransport for TblcfUsbDevice {
    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, BdmError> {
        let [reply_len, command, parameters @ ..] = frame else {
            return Err(BdmError::Unsupported("empty command frame"));
        };

        let parameter = |i: usize| parameters.get(i).copied().unwrap_or(0);
        let value = u16::from_be_bytes([parameter(0), parameter(1)]);
        let index = u16::from_be_bytes([parameter(2), parameter(3)]);
        let payload = parameters.get(4..).unwrap_or(&[]);

        if payload.is_empty() {
            let mut reply = vec![0; (*reply_len).max(1) as usize];
            let read = self.handle.read_control(
                request_type(Direction::In, RequestType::Vendor, Recipient::Device),
                *command,
                value,
                index,
                &mut reply,
                self.timeout,
            )?;
            reply.truncate(read);
            Ok(reply)
        } else {
            let written = self.handle.write_control(
                request_type(Direction::Out, RequestType::Vendor, Recipient::Device),
                *command,
                value,
                index,
                payload,
                self.timeout,
            )?;
            if written != payload.len() {
                tracing::debug!("Short control write, {} of {} bytes", written, payload.len());
                return Err(BdmError::UnexpectedReply {
                    command: *command,
                    reply: vec![],
                });
            }
            // A completed data stage is the acknowledge.
            Ok(vec![*command])
        }
    }
}

impl Drop for TblcfUsbDevice {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(INTERFACE) {
            tracing::warn!("Failed to release TBLCF interface: {}", e);
        }
    }
}

/// Finds all connected TBLCF pods.
pub fn list_tblcf_devices() -> Vec<TblcfInfo> {
    rusb::Context::new()
        .and_then(|context| context.devices())
        .map_or(vec![], |devices| {
            devices
                .iter()
                .filter(is_tblcf_device)
                .enumerate()
                .map(|(index, device)| TblcfInfo {
                    index,
                    bus_number: device.bus_number(),
                    address: device.address(),
                })
                .collect()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_names_follow_the_index() {
        let info = TblcfInfo {
            index: 2,
            bus_number: 1,
            address: 7,
        };
        assert_eq!(info.device_name(), "/dev/tblcf2");
    }
}
