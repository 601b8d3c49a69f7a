//! Device names and the registry handing out exclusive sessions.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::clocker::BitBangWire;
use crate::config::BdmConfig;
use crate::device::Device;
use crate::error::BdmError;
use crate::pod::tblcf::TblcfUsbDevice;
use crate::pod::{ColdFirePe, Cpu32Pod, Interface, Pod, Tblcf};
use crate::port::{ParallelPort, CPU32_ICD, CPU32_PD, COLDFIRE_PE};

/// Path prefixes of the local devices, after `/dev/`.
const PREFIXES: [(&str, Interface); 4] = [
    ("bdmcpu32", Interface::Cpu32Pd),
    ("bdmicd", Interface::Cpu32Icd),
    ("bdmcf", Interface::ColdFirePe),
    ("tblcf", Interface::Tblcf),
];

/// A parsed device path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceName {
    /// A pod on this host: `/dev/bdmcpu32N`, `/dev/bdmicdN`, `/dev/bdmcfN`
    /// or `/dev/tblcfN`.
    Local { interface: Interface, index: usize },
    /// A pod served by a remote BDM server: `host:port/device`.
    Remote {
        host: String,
        port: u16,
        device: String,
    },
}

impl DeviceName {
    /// The physical resource an open device holds.
    ///
    /// All parallel port pods on the same port share one resource, so a
    /// CPU32 and a ColdFire session cannot drive the same port at once.
    pub fn resource(&self) -> String {
        match self {
            DeviceName::Local {
                interface: Interface::Tblcf,
                index,
            } => format!("tblcf{index}"),
            DeviceName::Local { index, .. } => format!("parport{index}"),
            DeviceName::Remote { .. } => self.to_string(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, DeviceName::Remote { .. })
    }
}

impl FromStr for DeviceName {
    type Err = BdmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BdmError::InvalidDeviceName(s.to_string());

        if let Some((host, rest)) = s.split_once(':') {
            let slash = rest.find('/').ok_or_else(invalid)?;
            let (port, device) = rest.split_at(slash);
            if host.is_empty() || device.len() < 2 {
                return Err(invalid());
            }
            return Ok(DeviceName::Remote {
                host: host.to_string(),
                port: port.parse().map_err(|_| invalid())?,
                device: device.to_string(),
            });
        }

        let name = s.strip_prefix("/dev/").ok_or_else(invalid)?;
        PREFIXES
            .iter()
            .find_map(|(prefix, interface)| {
                let digits = name.strip_prefix(prefix)?;
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                Some(DeviceName::Local {
                    interface: *interface,
                    index: digits.parse().ok()?,
                })
            })
            .ok_or_else(invalid)
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceName::Local { interface, index } => {
                let prefix = PREFIXES
                    .iter()
                    .find(|(_, i)| i == interface)
                    .map_or("bdm", |&(prefix, _)| prefix);
                write!(f, "/dev/{prefix}{index}")
            }
            DeviceName::Remote { host, port, device } => write!(f, "{host}:{port}{device}"),
        }
    }
}

type Opener = dyn Fn(&DeviceName, &BdmConfig) -> Result<Box<dyn Pod>, BdmError> + Send + Sync;

/// Hands out [`Device`]s, at most one per physical pod.
pub struct Registry {
    claimed: Arc<Mutex<HashSet<String>>>,
    opener: Box<Opener>,
    config: BdmConfig,
}

impl Registry {
    /// A registry opening real hardware.
    pub fn new(config: BdmConfig) -> Self {
        Self::with_opener(config, open_hardware)
    }

    /// A registry constructing its pods with `opener`.
    pub fn with_opener<F>(config: BdmConfig, opener: F) -> Self
    where
        F: Fn(&DeviceName, &BdmConfig) -> Result<Box<dyn Pod>, BdmError> + Send + Sync + 'static,
    {
        Registry {
            claimed: Arc::new(Mutex::new(HashSet::new())),
            opener: Box::new(opener),
            config,
        }
    }

    pub fn config(&self) -> &BdmConfig {
        &self.config
    }

    /// Open the device at `path` and bring up the link to its target.
    ///
    /// The device's resource stays claimed until the returned [`Device`] is
    /// dropped. If any step fails the claim and whatever was opened so far
    /// are released before the error is returned.
    pub fn open(&self, path: &str) -> Result<Device, BdmError> {
        let name: DeviceName = path.parse()?;
        if name.is_remote() {
            return Err(BdmError::Unsupported("remote BDM servers"));
        }

        let claim = self.claim(&name)?;

        let mut pod = (self.opener)(&name, &self.config)?;
        pod.set_debug(self.config.debug);
        let status = pod.init_hardware()?;

        tracing::debug!("Opened {} ({}), target status {:?}", name, pod.interface(), status);

        Ok(Device::new(name, pod, self.config.io_buffer_size, claim))
    }

    /// Whether the resource behind `path` is held by an open device.
    pub fn is_open(&self, path: &str) -> bool {
        path.parse::<DeviceName>()
            .is_ok_and(|name| self.lock().contains(&name.resource()))
    }

    fn claim(&self, name: &DeviceName) -> Result<Claim, BdmError> {
        let key = name.resource();
        if !self.lock().insert(key.clone()) {
            return Err(BdmError::DeviceBusy(name.to_string()));
        }
        tracing::trace!("Claimed {}", key);
        Ok(Claim {
            claimed: self.claimed.clone(),
            key,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Exclusive hold on a device resource, given back on drop.
#[derive(Debug)]
pub(crate) struct Claim {
    claimed: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        tracing::trace!("Released {}", self.key);
    }
}

/// Build the pod for a parallel port `interface` on an already opened port.
pub fn parallel_pod<P: ParallelPort + 'static>(
    interface: Interface,
    port: P,
    config: &BdmConfig,
) -> Result<Box<dyn Pod>, BdmError> {
    let pod: Box<dyn Pod> = match interface {
        Interface::Cpu32Pd => Box::new(Cpu32Pod::new(
            BitBangWire::new(port, CPU32_PD)?,
            interface,
            config,
        )),
        Interface::Cpu32Icd => Box::new(Cpu32Pod::new(
            BitBangWire::new(port, CPU32_ICD)?,
            interface,
            config,
        )),
        Interface::ColdFirePe => {
            Box::new(ColdFirePe::new(BitBangWire::new(port, COLDFIRE_PE)?, config))
        }
        Interface::Tblcf => return Err(BdmError::Unsupported("TBLCF pods on a parallel port")),
    };
    Ok(pod)
}

fn open_hardware(name: &DeviceName, config: &BdmConfig) -> Result<Box<dyn Pod>, BdmError> {
    let &DeviceName::Local { interface, index } = name else {
        return Err(BdmError::Unsupported("remote BDM servers"));
    };

    match interface {
        Interface::Tblcf => {
            let usb = TblcfUsbDevice::open_nth(index, config.usb_timeout())?;
            Ok(Box::new(Tblcf::new(usb, config)))
        }
        _ => open_parallel(interface, index, config),
    }
}

#[cfg(target_os = "linux")]
fn open_parallel(
    interface: Interface,
    index: usize,
    config: &BdmConfig,
) -> Result<Box<dyn Pod>, BdmError> {
    let index = u32::try_from(index).map_err(|_| BdmError::NotFound(format!("parport{index}")))?;
    let port = crate::port::ppdev::PpdevPort::open_index(index)?;
    parallel_pod(interface, port, config)
}

#[cfg(not(target_os = "linux"))]
fn open_parallel(
    _interface: Interface,
    _index: usize,
    _config: &BdmConfig,
) -> Result<Box<dyn Pod>, BdmError> {
    Err(BdmError::Unsupported("parallel port pods on this platform"))
}
