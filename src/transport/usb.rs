use std::time::Duration;

use rusb::{DeviceHandle, GlobalContext};
use tracing::{debug, info, warn};

use super::{BulkChannel, TransportError};

/// AX206 USB Vendor ID
pub const AX206_VID: u16 = 0x1908;
/// AX206 USB Product ID
pub const AX206_PID: u16 = 0x0102;

const INTERFACE: u8 = 0;

/// `usb0` / `dpf3` -> 0 / 3
pub fn parse_device_index(device: &str) -> Result<usize, TransportError> {
    let device = device.trim().to_ascii_lowercase();
    let digits = device
        .strip_prefix("usb")
        .or_else(|| device.strip_prefix("dpf"))
        .filter(|d| d.len() == 1);

    let index = digits.and_then(|d| d.parse::<usize>().ok());
    index.ok_or(TransportError::InvalidDevice(device))
}

#[derive(Debug)]
/// An exclusively owned, claimed AX206 device handle.
///
/// The interface is released when the link is dropped.
pub struct UsbLink {
    device: String,
    handle: DeviceHandle<GlobalContext>,
}

impl UsbLink {
    /// 按 VID/PID 枚举, 选择第 N 个匹配的设备并占用接口 0
    pub fn open(device: &str) -> Result<Self, TransportError> {
        let index = parse_device_index(device)?;

        let mut matching = Vec::new();
        for candidate in rusb::devices()?.iter() {
            let Ok(descriptor) = candidate.device_descriptor() else {
                continue;
            };
            if descriptor.vendor_id() == AX206_VID && descriptor.product_id() == AX206_PID {
                info!(
                    bus = candidate.bus_number(),
                    address = candidate.address(),
                    "dpf: found AX206 #{}",
                    matching.len() + 1
                );
                matching.push(candidate);
            }
        }

        let candidate = matching
            .into_iter()
            .nth(index)
            .ok_or_else(|| TransportError::DeviceNotFound(device.to_string()))?;

        let handle = candidate.open().map_err(|source| TransportError::Open {
            device: device.to_string(),
            source,
        })?;

        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!(error = %e, "dpf: kernel driver auto-detach unavailable");
        }

        handle.claim_interface(INTERFACE).map_err(|source| TransportError::Claim {
            device: device.to_string(),
            source,
        })?;

        Ok(Self {
            device: device.to_string(),
            handle,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl BulkChannel for UsbLink {
    fn write_bulk(&mut self, endpoint: u8, buf: &[u8], timeout: Duration) -> Result<usize, rusb::Error> {
        self.handle.write_bulk(endpoint, buf, timeout)
    }

    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, rusb::Error> {
        self.handle.read_bulk(endpoint, buf, timeout)
    }
}

impl Drop for UsbLink {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(INTERFACE) {
            warn!(device = %self.device, error = %e, "dpf: failed to release usb interface");
        }
    }
}
