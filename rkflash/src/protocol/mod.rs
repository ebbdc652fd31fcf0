//! RKFT protocol implementation.

pub mod command;
pub mod crc;

// Re-export common types
pub use command::{CommandCounter, CommandPacket, Opcode, PACKET_LEN, SECTOR_SIZE, STATUS_LEN};
