//! Native USB transport backed by `rusb`.

use std::time::Duration;

use log::{debug, trace};
use rusb::{DeviceHandle, GlobalContext};

use crate::device;
use crate::error::{Error, Result};
use crate::transport::Transport;

const DIRECTION_IN: u8 = 0x80;
const ENDPOINT_NUMBER_MASK: u8 = 0x7f;

/// Open USB handle to a loader.
pub struct UsbTransport {
    handle: DeviceHandle<GlobalContext>,
    timeout: Duration,
}

impl UsbTransport {
    /// Open the supported device at `bus`/`address`.
    pub fn open(bus: u8, address: u8, timeout: Duration) -> Result<Self> {
        let devices = rusb::devices()?;
        for device in devices.iter() {
            if device.bus_number() != bus || device.address() != address {
                continue;
            }
            let descriptor = device.device_descriptor()?;
            if !device::is_supported(descriptor.vendor_id(), descriptor.product_id()) {
                break;
            }

            let handle = device
                .open()
                .map_err(|e| Error::DeviceOpenFailed(format!("{bus:03}:{address:03}: {e}")))?;
            debug!(
                "Opened {:04x}:{:04x} at {bus:03}:{address:03}",
                descriptor.vendor_id(),
                descriptor.product_id()
            );
            return Ok(Self { handle, timeout });
        }
        Err(Error::DeviceNotFound)
    }
}

impl std::fmt::Debug for UsbTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbTransport")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Transport for UsbTransport {
    fn kernel_driver_active(&mut self, interface: u8) -> Result<bool> {
        match self.handle.kernel_driver_active(interface) {
            Ok(active) => Ok(active),
            // Platforms without kernel driver support never have one bound
            Err(rusb::Error::NotSupported) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<()> {
        debug!("Detaching kernel driver from interface {interface}");
        Ok(self.handle.detach_kernel_driver(interface)?)
    }

    fn claim_interface(&mut self, interface: u8) -> Result<()> {
        Ok(self.handle.claim_interface(interface)?)
    }

    fn release_interface(&mut self, interface: u8) -> Result<()> {
        Ok(self.handle.release_interface(interface)?)
    }

    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<usize> {
        let address = endpoint & ENDPOINT_NUMBER_MASK;
        let written = self.handle.write_bulk(address, data, self.timeout)?;
        trace!("bulk OUT {address:#04x}: {written}/{} bytes", data.len());
        Ok(written)
    }

    fn bulk_read(&mut self, endpoint: u8, len: usize) -> Result<Vec<u8>> {
        let address = (endpoint & ENDPOINT_NUMBER_MASK) | DIRECTION_IN;
        let mut buf = vec![0u8; len];
        let read = self.handle.read_bulk(address, &mut buf, self.timeout)?;
        buf.truncate(read);
        trace!("bulk IN {address:#04x}: {read}/{len} bytes");
        Ok(buf)
    }
}
