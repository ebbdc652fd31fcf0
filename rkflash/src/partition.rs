//! Flash layout: flash information, partitions and byte regions.
//!
//! The loader reports the partition table as part of the parameter block,
//! on a line of the form:
//!
//! ```text
//! CMDLINE:console=ttyFIQ0 mtdparts=rk29xxnand:0x00002000@0x00004000(boot),-@0x00006000(system)
//! ```
//!
//! Each `size@offset(name)` entry is in sectors. A size of `-` means "up to
//! the end of flash".

use crate::error::{Error, Result};
use crate::image::parameter;
use crate::protocol::SECTOR_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};
use std::fmt;

/// Line prefix carrying the partition table.
pub const CMDLINE_PREFIX: &str = "CMDLINE:";

/// Length of the flash information response.
pub const FLASH_INFO_LEN: usize = 512;

const SECTOR_BYTES: u64 = SECTOR_SIZE as u64;

/// Flash information block returned by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlashInfo {
    /// Total flash capacity in sectors.
    pub flash_size_sectors: u32,
    /// Erase block size in sectors.
    pub block_size: u16,
    /// Page size in sectors.
    pub page_size: u8,
    /// ECC strength in bits.
    pub ecc_bits: u8,
    /// Access time setting.
    pub access_time: u8,
    /// Flash manufacturer id.
    pub manufacturer_id: u8,
    /// Chip select bitmap.
    pub chip_select: u8,
}

impl FlashInfo {
    /// Decode the loader's flash information response.
    ///
    /// Only the leading little-endian size word is mandatory; the geometry
    /// fields are filled in when the response is long enough.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::Protocol(format!(
                "flash info response too short ({} bytes)",
                data.len()
            )));
        }

        let mut info = Self {
            flash_size_sectors: LittleEndian::read_u32(&data[0..4]),
            ..Self::default()
        };
        if data.len() >= 11 {
            info.block_size = LittleEndian::read_u16(&data[4..6]);
            info.page_size = data[6];
            info.ecc_bits = data[7];
            info.access_time = data[8];
            info.manufacturer_id = data[9];
            info.chip_select = data[10];
        }
        Ok(info)
    }

    /// Capacity in bytes.
    pub fn size_bytes(&self) -> u64 {
        u64::from(self.flash_size_sectors) * SECTOR_BYTES
    }

    /// Capacity in GiB.
    #[allow(clippy::cast_precision_loss)]
    pub fn size_gib(&self) -> f64 {
        self.size_bytes() as f64 / (1u64 << 30) as f64
    }
}

/// A sector range on flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Start sector.
    pub offset: u32,
    /// Length in sectors.
    pub size: u32,
}

impl Region {
    /// Create a region from sector units.
    pub fn new(offset: u32, size: u32) -> Self {
        Self { offset, size }
    }

    /// Create a region from a byte offset and byte length.
    ///
    /// The offset must be sector aligned; the length is rounded up to a
    /// whole number of sectors.
    pub fn from_bytes(offset: u64, size: u64) -> Result<Self> {
        if offset % SECTOR_BYTES != 0 {
            return Err(Error::InvalidRegion(format!(
                "offset {offset:#x} is not a multiple of {SECTOR_SIZE}"
            )));
        }
        let offset = u32::try_from(offset / SECTOR_BYTES)
            .map_err(|_| Error::InvalidRegion(format!("offset {offset:#x} out of range")))?;
        let size = u32::try_from(size.div_ceil(SECTOR_BYTES))
            .map_err(|_| Error::InvalidRegion(format!("size {size:#x} out of range")))?;
        Ok(Self { offset, size })
    }

    /// Start offset in bytes.
    pub fn offset_bytes(&self) -> u64 {
        u64::from(self.offset) * SECTOR_BYTES
    }

    /// Length in bytes.
    pub fn size_bytes(&self) -> u64 {
        u64::from(self.size) * SECTOR_BYTES
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}@0x{:08X}", self.size, self.offset)
    }
}

/// A named partition.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Partition {
    /// Partition name as written in the table.
    pub name: String,
    /// Start sector.
    pub offset_sectors: u32,
    /// Length in sectors.
    pub size_sectors: u32,
}

impl Partition {
    /// Sector range covered by this partition.
    pub fn region(&self) -> Region {
        Region::new(self.offset_sectors, self.size_sectors)
    }

    /// Start offset in bytes.
    pub fn offset_bytes(&self) -> u64 {
        self.region().offset_bytes()
    }

    /// Length in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.region().size_bytes()
    }

    /// Length in whole MiB.
    pub fn size_mib(&self) -> u64 {
        self.size_bytes() >> 20
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<12} (0x{:08X} @ 0x{:08X}) {:4} MiB",
            self.name,
            self.size_sectors,
            self.offset_sectors,
            self.size_mib()
        )
    }
}

/// Strip the optional leading `@` from a user supplied partition name.
pub fn normalize_name(name: &str) -> &str {
    name.strip_prefix('@').unwrap_or(name)
}

/// Ordered partition table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    partitions: Vec<Partition>,
}

impl PartitionTable {
    /// Parse the partition table from a raw parameter block.
    ///
    /// The block is normally a `PARM` image; its payload is parsed. A block
    /// with a damaged envelope is parsed past the header, and a block without
    /// the magic is taken as plain text. Text after the first NUL byte is
    /// ignored.
    pub fn from_block(block: &[u8], flash_size_sectors: u32) -> Result<Self> {
        let decoded;
        let body: &[u8] = match parameter::decode(block) {
            Ok(raw) => {
                decoded = raw;
                &decoded
            },
            Err(e) if block.starts_with(&parameter::PARAMETER_MAGIC) => {
                debug!("Parsing parameter block without envelope check: {e}");
                block.get(parameter::HEADER_SIZE..).unwrap_or_default()
            },
            Err(_) => block,
        };

        let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
        let text = String::from_utf8_lossy(&body[..end]);
        Self::parse(&text, flash_size_sectors)
    }

    /// Parse the partition table from parameter text.
    pub fn parse(text: &str, flash_size_sectors: u32) -> Result<Self> {
        for line in text.lines() {
            debug!("{line}");
            if let Some(rest) = line.strip_prefix(CMDLINE_PREFIX) {
                let partitions = parse_cmdline(rest, flash_size_sectors)?;
                return Ok(Self { partitions });
            }
        }
        Err(Error::NoPartitionTable)
    }

    /// Look up a partition by name (leading `@` allowed, case sensitive).
    pub fn get(&self, name: &str) -> Result<&Partition> {
        let name = normalize_name(name);
        self.partitions
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::UnknownPartition(name.to_string()))
    }

    /// Partitions in table order.
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Iterate over partitions in table order.
    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter()
    }

    /// Number of partitions.
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Log the table, one partition per line.
    pub fn log(&self) {
        info!("Partitions:");
        for partition in &self.partitions {
            info!("\t{partition}");
        }
    }
}

/// Size token of a table entry.
enum SizeToken<'a> {
    /// `-`: rest of flash.
    Remaining,
    /// Hex digits without the `0x` prefix.
    Hex(&'a str),
}

/// Extract every `size@offset(name)` entry from the text after `CMDLINE:`.
fn parse_cmdline(line: &str, flash_size_sectors: u32) -> Result<Vec<Partition>> {
    let bytes = line.as_bytes();
    let mut partitions = Vec::new();
    // Matches may not start before the end of the previous one
    let mut floor = 0;
    let mut cursor = 0;

    while let Some(rel) = line[cursor..].find('@') {
        let at = cursor + rel;
        cursor = at + 1;

        let Some(size) = size_token_before(bytes, floor, at) else {
            continue;
        };
        let Some((offset_hex, name, end)) = offset_and_name_after(line, at + 1) else {
            continue;
        };

        let offset = parse_hex(offset_hex)?;
        let size_sectors = match size {
            SizeToken::Remaining => flash_size_sectors.checked_sub(offset).ok_or_else(|| {
                Error::Protocol(format!(
                    "partition {name} starts at 0x{offset:08X}, beyond flash size 0x{flash_size_sectors:08X}"
                ))
            })?,
            SizeToken::Hex(digits) => parse_hex(digits)?,
        };

        partitions.push(Partition {
            name: name.to_string(),
            offset_sectors: offset,
            size_sectors,
        });
        floor = end;
        cursor = end;
    }

    Ok(partitions)
}

/// Size token ending right before `at`, not reaching below `floor`.
fn size_token_before(bytes: &[u8], floor: usize, at: usize) -> Option<SizeToken<'_>> {
    if at > floor && bytes[at - 1] == b'-' {
        return Some(SizeToken::Remaining);
    }

    let mut start = at;
    while start > floor && bytes[start - 1].is_ascii_hexdigit() {
        start -= 1;
    }
    // Digits must be introduced by a lowercase `0x`
    if start == at || start < floor + 2 || bytes[start - 1] != b'x' || bytes[start - 2] != b'0' {
        return None;
    }
    std::str::from_utf8(&bytes[start..at]).ok().map(SizeToken::Hex)
}

/// `0x<hex>(<name>)` starting at `pos`; returns digits, name and end index.
fn offset_and_name_after(line: &str, pos: usize) -> Option<(&str, &str, usize)> {
    let rest = line.get(pos..)?.strip_prefix("0x")?;
    let digits_len = rest
        .bytes()
        .take_while(u8::is_ascii_hexdigit)
        .count();
    if digits_len == 0 {
        return None;
    }
    let digits = &rest[..digits_len];
    let after = rest[digits_len..].strip_prefix('(')?;
    let close = after.find(')')?;
    let name = &after[..close];

    // pos + "0x" + digits + "(" + name + ")"
    let end = pos + 2 + digits_len + 1 + close + 1;
    Some((digits, name, end))
}

fn parse_hex(digits: &str) -> Result<u32> {
    u32::from_str_radix(digits, 16)
        .map_err(|e| Error::Protocol(format!("invalid hex value 0x{digits}: {e}")))
}
