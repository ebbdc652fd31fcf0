//! RKFT command packets.
//!
//! Every request to a Rockchip loader is a fixed 31-byte command block
//! written to the bulk OUT endpoint, optionally followed by a data phase,
//! and always answered by a 13-byte status block on the bulk IN endpoint.
//!
//! ## Packet Format
//!
//! ```text
//! +--------+-----+----------+------+--------+--------+----------+------+------+
//! | "USBC" | CID | reserved | flag | opcode | offset | reserved | size | pad  |
//! +--------+-----+----------+------+--------+--------+----------+------+------+
//! |   4    |  1  |    7     |  1   |  4 BE  |  4 BE  |    2     |  1   |  7   |
//! +--------+-----+----------+------+--------+--------+----------+------+------+
//! ```
//!
//! Offsets and sizes are in 512-byte sectors.

use byteorder::{BigEndian, ByteOrder};

/// Length of a command packet in bytes.
pub const PACKET_LEN: usize = 31;

/// Length of the status block returned after every command.
pub const STATUS_LEN: usize = 13;

/// Packet signature.
pub const SIGNATURE: [u8; 4] = *b"USBC";

/// Size of a flash sector in bytes.
pub const SECTOR_SIZE: usize = 512;

const CID_POS: usize = 4;
const FLAG_POS: usize = 12;
const OPCODE_POS: usize = 13;
const OFFSET_POS: usize = 17;
const SIZE_POS: usize = 23;

/// RKFT opcodes used by the loader protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    /// Probe issued before every operation ("enter flash mode").
    TestUnitReady = 0x0006_0000,
    /// Read the 512-byte flash information block.
    ReadFlashInfo = 0x0006_1a00,
    /// Read sectors.
    ReadLba = 0x000a_1400,
    /// Write sectors.
    WriteLba = 0x000a_1500,
    /// Reboot the device out of loader mode.
    Reboot = 0x0006_ff00,
}

impl Opcode {
    /// Flag byte the loader expects with this opcode.
    pub fn flag(self) -> u8 {
        match self {
            Self::Reboot => 0x00,
            _ => 0x80,
        }
    }

    /// Look up an opcode by its wire value.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x0006_0000 => Some(Self::TestUnitReady),
            0x0006_1a00 => Some(Self::ReadFlashInfo),
            0x000a_1400 => Some(Self::ReadLba),
            0x000a_1500 => Some(Self::WriteLba),
            0x0006_ff00 => Some(Self::Reboot),
            _ => None,
        }
    }
}

/// Rolling command identifier.
///
/// Owned by a session; every packet built through it takes the next id,
/// wrapping after 255. Wrap-around collisions are not detected.
#[derive(Debug, Clone, Default)]
pub struct CommandCounter {
    next: u8,
}

impl CommandCounter {
    /// Create a counter whose first id is 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id that the next packet will carry.
    pub fn peek(&self) -> u8 {
        self.next
    }

    /// Take the next id.
    pub fn advance(&mut self) -> u8 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }
}

/// Build a command packet, drawing its id from `counter`.
pub fn build(
    counter: &mut CommandCounter,
    flag: u8,
    command: u32,
    offset_sectors: u32,
    size_sectors: u8,
) -> [u8; PACKET_LEN] {
    CommandPacket {
        id: counter.advance(),
        flag,
        opcode: command,
        offset: offset_sectors,
        size: size_sectors,
    }
    .encode()
}

/// Decoded view of a command packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPacket {
    /// Rolling command id.
    pub id: u8,
    /// Flag byte.
    pub flag: u8,
    /// Raw opcode.
    pub opcode: u32,
    /// Sector offset.
    pub offset: u32,
    /// Size in sectors.
    pub size: u8,
}

impl CommandPacket {
    /// Serialize to the 31-byte wire form.
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];
        buf[..4].copy_from_slice(&SIGNATURE);
        buf[CID_POS] = self.id;
        buf[FLAG_POS] = self.flag;
        BigEndian::write_u32(&mut buf[OPCODE_POS..OPCODE_POS + 4], self.opcode);
        BigEndian::write_u32(&mut buf[OFFSET_POS..OFFSET_POS + 4], self.offset);
        buf[SIZE_POS] = self.size;
        buf
    }

    /// Parse a wire packet. Returns `None` on wrong length or signature.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() != PACKET_LEN || data[..4] != SIGNATURE {
            return None;
        }
        Some(Self {
            id: data[CID_POS],
            flag: data[FLAG_POS],
            opcode: BigEndian::read_u32(&data[OPCODE_POS..OPCODE_POS + 4]),
            offset: BigEndian::read_u32(&data[OFFSET_POS..OFFSET_POS + 4]),
            size: data[SIZE_POS],
        })
    }

    /// Known opcode, if any.
    pub fn known_opcode(&self) -> Option<Opcode> {
        Opcode::from_u32(self.opcode)
    }
}
