//! USB transport abstraction.
//!
//! The protocol layer only needs a handful of bulk-transfer and interface
//! primitives, captured by the [`Transport`] trait:
//!
//! ```text
//! +------------------+     +------------------+
//! |  Session/Engine  |     |  Session/Engine  |
//! +--------+---------+     +--------+---------+
//!          |                        |
//!          v                        v
//! +--------+---------+     +--------+---------+
//! | Transport Trait  |     | Transport Trait  |
//! +--------+---------+     +--------+---------+
//!          |                        |
//!          v                        v
//! +--------+---------+     +--------+---------+
//! |   UsbTransport   |     |  MockTransport   |
//! |      (rusb)      |     | (in-memory flash)|
//! +------------------+     +------------------+
//!       Hardware                  Tests
//! ```

#[cfg(feature = "native")]
pub mod usb;

#[cfg(test)]
pub(crate) mod mock;

use crate::error::Result;

#[cfg(feature = "native")]
pub use usb::UsbTransport;

/// Interface number used by every Rockchip loader.
pub const INTERFACE: u8 = 0;

/// Bulk transport to a device in loader mode.
///
/// Calls block until completion or the implementation's timeout.
pub trait Transport {
    /// Whether a kernel driver is bound to `interface`.
    fn kernel_driver_active(&mut self, interface: u8) -> Result<bool>;

    /// Detach the kernel driver bound to `interface`.
    fn detach_kernel_driver(&mut self, interface: u8) -> Result<()>;

    /// Claim `interface` for exclusive use.
    fn claim_interface(&mut self, interface: u8) -> Result<()>;

    /// Release a previously claimed interface.
    fn release_interface(&mut self, interface: u8) -> Result<()>;

    /// Write `data` to a bulk OUT endpoint. Returns the number of bytes sent.
    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<usize>;

    /// Read up to `len` bytes from a bulk IN endpoint.
    ///
    /// The returned buffer may be shorter than `len`.
    fn bulk_read(&mut self, endpoint: u8, len: usize) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn kernel_driver_active(&mut self, interface: u8) -> Result<bool> {
        (**self).kernel_driver_active(interface)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<()> {
        (**self).detach_kernel_driver(interface)
    }

    fn claim_interface(&mut self, interface: u8) -> Result<()> {
        (**self).claim_interface(interface)
    }

    fn release_interface(&mut self, interface: u8) -> Result<()> {
        (**self).release_interface(interface)
    }

    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<usize> {
        (**self).bulk_write(endpoint, data)
    }

    fn bulk_read(&mut self, endpoint: u8, len: usize) -> Result<Vec<u8>> {
        (**self).bulk_read(endpoint, len)
    }
}
