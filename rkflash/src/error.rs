//! Error types for rkflash.

use std::io;
use thiserror::Error;

/// Result type for rkflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rkflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (image files, backup files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A bulk transfer or interface operation failed.
    #[error("USB transport error: {0}")]
    Transport(String),

    /// No allow-listed Rockchip device at the requested bus/address.
    #[error("Device not found or not in loader mode")]
    DeviceNotFound,

    /// The device was found but a handle could not be obtained.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),

    /// Product ID has no entry in the endpoint table.
    #[error("Unsupported product ID: {0:#06x}")]
    UnsupportedProduct(u16),

    /// The partition block contained no `CMDLINE:` line.
    #[error("No partition table found in parameter block")]
    NoPartitionTable,

    /// Partition name lookup miss.
    #[error("Unknown partition: {0}")]
    UnknownPartition(String),

    /// Parameter image failed magic, length or checksum validation.
    #[error("Invalid parameter image: {0}")]
    InvalidParameterImage(String),

    /// Encoded parameter image would not fit in the parameter block.
    #[error("Parameter image too large: {size} bytes (max {max})")]
    ParameterTooLarge {
        /// Encoded size.
        size: usize,
        /// Parameter block size.
        max: usize,
    },

    /// Flash contents differ from the local file.
    #[error("Verification failed: {count} chunk(s) differ, first at byte offset {first_offset:#010x}")]
    VerificationMismatch {
        /// Number of mismatching chunks.
        count: usize,
        /// Byte offset of the first mismatching chunk.
        first_offset: u64,
    },

    /// Device response was malformed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Byte region is not sector aligned or overflows the sector range.
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// Operation attempted on a closed session.
    #[error("Session is closed")]
    SessionClosed,
}

#[cfg(feature = "native")]
impl From<rusb::Error> for Error {
    fn from(err: rusb::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
