//! Device discovery and classification.
//!
//! Rockchip SoCs in loader mode enumerate with vendor ID `0x2207` and a
//! per-family product ID. Only products in [`KNOWN_PRODUCTS`] are accepted;
//! the entry also decides which bulk endpoints carry the RKFT traffic.

use std::fmt;

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use log::{debug, trace};

/// Rockchip USB vendor ID.
pub const ROCKCHIP_VID: u16 = 0x2207;

/// Bulk endpoints used for RKFT traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceEndpoints {
    /// Endpoint the loader sends data and status on.
    pub read: u8,
    /// Endpoint command packets and payloads are written to.
    pub write: u8,
}

impl DeviceEndpoints {
    /// Endpoints shared by most loaders.
    pub const DEFAULT: Self = Self {
        read: 0x01,
        write: 0x02,
    };
}

/// A supported product.
#[derive(Debug, Clone, Copy)]
pub struct ProductInfo {
    /// USB product ID.
    pub product_id: u16,
    /// SoC family name, when known.
    pub chip: Option<&'static str>,
    /// Endpoint pair.
    pub endpoints: DeviceEndpoints,
}

const fn product(product_id: u16, chip: Option<&'static str>) -> ProductInfo {
    ProductInfo {
        product_id,
        chip,
        endpoints: DeviceEndpoints::DEFAULT,
    }
}

/// Product allowlist.
pub const KNOWN_PRODUCTS: &[ProductInfo] = &[
    product(0x290a, Some("RK2906")),
    product(0x292a, Some("RK2928")),
    product(0x292c, Some("RK3026/RK3028")),
    product(0x281a, None),
    product(0x300a, Some("RK3066")),
    product(0x0010, Some("RK3168")),
    product(0x300b, Some("RK3168")),
    product(0x310b, Some("RK3188")),
    product(0x310c, Some("RK3128")),
    product(0x320a, Some("RK3288")),
    product(0x320b, Some("RK3229")),
    ProductInfo {
        product_id: 0x330c,
        chip: Some("RK3399"),
        endpoints: DeviceEndpoints {
            read: 0x81,
            write: 0x01,
        },
    },
];

/// Look up a product in the allowlist.
pub fn product_info(product_id: u16) -> Option<&'static ProductInfo> {
    KNOWN_PRODUCTS.iter().find(|p| p.product_id == product_id)
}

/// Whether a VID/PID pair is an accepted loader.
#[must_use]
pub fn is_supported(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == ROCKCHIP_VID && product_info(product_id).is_some()
}

/// Endpoints for a product ID.
pub fn endpoints_for(product_id: u16) -> Result<DeviceEndpoints> {
    product_info(product_id)
        .map(|p| p.endpoints)
        .ok_or(Error::UnsupportedProduct(product_id))
}

/// An enumerated USB device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectedDevice {
    /// USB bus number.
    pub bus: u8,
    /// Device address on the bus.
    pub address: u8,
    /// USB vendor ID.
    pub vendor_id: u16,
    /// USB product ID.
    pub product_id: u16,
}

impl DetectedDevice {
    /// SoC family name, when known.
    pub fn chip_name(&self) -> Option<&'static str> {
        product_info(self.product_id).and_then(|p| p.chip)
    }

    /// Whether this device is an accepted loader.
    pub fn is_supported(&self) -> bool {
        is_supported(self.vendor_id, self.product_id)
    }
}

impl fmt::Display for DetectedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bus {:03} Device {:03}: ID {:04x}:{:04x}",
            self.bus, self.address, self.vendor_id, self.product_id
        )?;
        if let Some(chip) = self.chip_name() {
            write!(f, " {chip}")?;
        }
        Ok(())
    }
}

/// Find the supported device at `bus`/`address`.
pub fn find_device(devices: &[DetectedDevice], bus: u8, address: u8) -> Option<&DetectedDevice> {
    devices
        .iter()
        .find(|d| d.bus == bus && d.address == address && d.is_supported())
}

/// Keep only supported devices.
pub fn filter_supported(devices: impl IntoIterator<Item = DetectedDevice>) -> Vec<DetectedDevice> {
    devices.into_iter().filter(DetectedDevice::is_supported).collect()
}

/// Enumerate every USB device on the system.
#[cfg(feature = "native")]
pub fn detect_all_devices() -> Result<Vec<DetectedDevice>> {
    let mut result = Vec::new();

    for device in rusb::devices()?.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!(
                    "Skipping device {:03}:{:03}: {e}",
                    device.bus_number(),
                    device.address()
                );
                continue;
            },
        };

        let detected = DetectedDevice {
            bus: device.bus_number(),
            address: device.address(),
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
        };
        trace!("Found USB device: {detected}");
        result.push(detected);
    }

    Ok(result)
}

/// Enumerate supported loaders.
#[cfg(feature = "native")]
pub fn detect_devices() -> Result<Vec<DetectedDevice>> {
    Ok(filter_supported(detect_all_devices()?))
}

/// Format a list of devices for display.
pub fn format_device_list(devices: &[DetectedDevice]) -> Vec<String> {
    devices.iter().map(ToString::to_string).collect()
}
