//! Parameter partition image format.
//!
//! The parameter partition holds a plain-text boot description (including
//! the `CMDLINE:` partition table) wrapped in a small envelope so the
//! loader can detect corruption.
//!
//! ## Format
//!
//! ```text
//! +--------+------------+------------------+-----------+
//! | "PARM" |  length    |   raw parameter  |   CRC32   |
//! +--------+------------+------------------+-----------+
//! |   4    |  4 (LE)    |    length bytes  |   4 (LE)  |
//! +--------+------------+------------------+-----------+
//! ```
//!
//! The CRC is the Rockchip CRC32 over the raw bytes only. The whole image
//! must fit in one parameter block ([`PARAMETER_BLOCK_SIZE`]).

use crate::error::{Error, Result};
use crate::protocol::crc::rkcrc32;
use byteorder::{ByteOrder, LittleEndian};
use log::debug;

/// Image magic.
pub const PARAMETER_MAGIC: [u8; 4] = *b"PARM";

/// Size of the partition-table / parameter block on flash.
pub const PARAMETER_BLOCK_SIZE: usize = 0x800;

/// Magic plus length word preceding the payload.
pub const HEADER_SIZE: usize = 8;

/// Envelope overhead: magic + length + CRC.
pub const ENVELOPE_SIZE: usize = 12;

/// Largest raw parameter that still fits in the block.
pub const MAX_PARAMETER_LEN: usize = PARAMETER_BLOCK_SIZE - ENVELOPE_SIZE;

/// Wrap raw parameter text into a parameter image.
pub fn encode(raw: &[u8]) -> Result<Vec<u8>> {
    let size = raw.len() + ENVELOPE_SIZE;
    if size > PARAMETER_BLOCK_SIZE {
        return Err(Error::ParameterTooLarge {
            size,
            max: PARAMETER_BLOCK_SIZE,
        });
    }

    let mut image = Vec::with_capacity(size);
    image.extend_from_slice(&PARAMETER_MAGIC);
    // Safe cast: bounded by PARAMETER_BLOCK_SIZE above
    #[allow(clippy::cast_possible_truncation)]
    let len = raw.len() as u32;
    let mut word = [0u8; 4];
    LittleEndian::write_u32(&mut word, len);
    image.extend_from_slice(&word);
    image.extend_from_slice(raw);
    LittleEndian::write_u32(&mut word, rkcrc32(raw));
    image.extend_from_slice(&word);

    Ok(image)
}

/// Validate a parameter image and return the raw parameter bytes.
///
/// Trailing bytes after the CRC (block padding) are ignored.
pub fn decode(image: &[u8]) -> Result<Vec<u8>> {
    if image.len() < ENVELOPE_SIZE {
        return Err(Error::InvalidParameterImage(format!(
            "image too short ({} bytes)",
            image.len()
        )));
    }
    if image[..4] != PARAMETER_MAGIC {
        return Err(Error::InvalidParameterImage("missing PARM magic".into()));
    }

    let len = LittleEndian::read_u32(&image[4..8]) as usize;
    let end = len
        .checked_add(ENVELOPE_SIZE)
        .filter(|&end| end <= image.len())
        .ok_or_else(|| {
            Error::InvalidParameterImage(format!(
                "declared length {len} exceeds image size {}",
                image.len()
            ))
        })?;

    let raw = &image[HEADER_SIZE..HEADER_SIZE + len];
    let stored = LittleEndian::read_u32(&image[HEADER_SIZE + len..end]);
    let actual = rkcrc32(raw);
    if stored != actual {
        return Err(Error::InvalidParameterImage(format!(
            "CRC mismatch: expected {stored:#010x}, got {actual:#010x}"
        )));
    }

    debug!("Parameter image verified: {len} bytes, CRC {stored:#010X}");
    Ok(raw.to_vec())
}
