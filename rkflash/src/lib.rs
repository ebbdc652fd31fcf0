//! # rkflash
//!
//! A library for flashing Rockchip SoCs in USB loader mode.
//!
//! This crate talks the RKFT bulk protocol spoken by Rockchip loaders,
//! including:
//!
//! - 31-byte command packet framing with a rolling command id
//! - Chunked LBA read/write/compare/erase transfers
//! - `CMDLINE:` partition table parsing
//! - `PARM` parameter images protected by the Rockchip CRC32
//!
//! ## Supported Chips
//!
//! RK2906, RK2928, RK3026/RK3028, RK3066, RK3168, RK3188, RK3128, RK3288,
//! RK3229 and RK3399 (see [`device::KNOWN_PRODUCTS`]).
//!
//! ## Features
//!
//! - `native` (default): USB access through `rusb`
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "native")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use rkflash::{Session, SessionOptions, device};
//!
//! // Pick the first loader on the system
//! let found = device::detect_devices()?;
//! let dev = found.first().ok_or("no device")?;
//!
//! let mut session = Session::open(dev.bus, dev.address, SessionOptions::default())?;
//! for partition in session.partitions()?.iter() {
//!     println!("{partition}");
//! }
//! session.backup_file("@boot", "boot.img".as_ref())?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "native"))]
//! # fn main() {}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod image;
pub mod partition;
pub mod protocol;
pub mod session;
pub mod transfer;
pub mod transport;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use transport::UsbTransport;
pub use {
    device::{DetectedDevice, DeviceEndpoints, ROCKCHIP_VID},
    error::{Error, Result},
    partition::{FlashInfo, Partition, PartitionTable, Region},
    protocol::{CommandCounter, CommandPacket, Opcode},
    session::{PARAMETER_TARGET, Session, SessionOptions, SessionState},
    transfer::{CompareReport, Phase, TransferStats},
    transport::Transport,
};
