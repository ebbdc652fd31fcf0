//! In-memory loader used by unit tests.
//!
//! Interprets command packets against a flash byte array the way a real
//! loader does: LBA reads answer with data then a status block, LBA writes
//! expect one payload transfer followed by a status read.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::partition::FLASH_INFO_LEN;
use crate::protocol::{CommandPacket, Opcode, PACKET_LEN, SECTOR_SIZE, STATUS_LEN};
use crate::transport::Transport;

#[derive(Debug)]
pub(crate) struct MockTransport {
    pub flash: Vec<u8>,
    pub flash_info: Vec<u8>,
    /// Every command packet received, in order.
    pub packets: Vec<CommandPacket>,
    /// Every write payload received, in order.
    pub payloads: Vec<Vec<u8>>,
    pub kernel_driver: bool,
    pub detached: usize,
    pub claimed: usize,
    /// Shared so it can be inspected after the transport is dropped.
    pub released: Rc<Cell<usize>>,
    /// Length of the status blocks handed out.
    pub status_len: usize,
    /// Reject the command packet carrying this opcode.
    pub fail_on: Option<Opcode>,
    pending_write: Option<(usize, usize)>,
    responses: VecDeque<Vec<u8>>,
}

impl MockTransport {
    /// Device with `sectors` sectors of erased (zeroed) flash.
    pub fn new(sectors: usize) -> Self {
        let mut flash_info = vec![0u8; FLASH_INFO_LEN];
        let size = u32::try_from(sectors).unwrap_or(u32::MAX);
        flash_info[..4].copy_from_slice(&size.to_le_bytes());
        Self {
            flash: vec![0; sectors * SECTOR_SIZE],
            flash_info,
            packets: Vec::new(),
            payloads: Vec::new(),
            kernel_driver: false,
            detached: 0,
            claimed: 0,
            released: Rc::new(Cell::new(0)),
            status_len: STATUS_LEN,
            fail_on: None,
            pending_write: None,
            responses: VecDeque::new(),
        }
    }

    /// Device whose first sectors hold `block`.
    pub fn with_block(sectors: usize, block: &[u8]) -> Self {
        let mut mock = Self::new(sectors);
        mock.flash[..block.len()].copy_from_slice(block);
        mock
    }

    /// Packets carrying `opcode`.
    pub fn packets_for(&self, opcode: Opcode) -> Vec<CommandPacket> {
        self.packets
            .iter()
            .filter(|p| p.known_opcode() == Some(opcode))
            .copied()
            .collect()
    }

    fn status(&self, id: u8) -> Vec<u8> {
        let mut status = vec![0u8; self.status_len];
        let prefix = [b'U', b'S', b'B', b'S', id];
        let n = prefix.len().min(status.len());
        status[..n].copy_from_slice(&prefix[..n]);
        status
    }

    fn byte_range(&self, packet: &CommandPacket) -> (usize, usize) {
        let start = (packet.offset as usize * SECTOR_SIZE).min(self.flash.len());
        let end = (start + usize::from(packet.size) * SECTOR_SIZE).min(self.flash.len());
        (start, end)
    }
}

impl Transport for MockTransport {
    fn kernel_driver_active(&mut self, _interface: u8) -> Result<bool> {
        Ok(self.kernel_driver)
    }

    fn detach_kernel_driver(&mut self, _interface: u8) -> Result<()> {
        self.kernel_driver = false;
        self.detached += 1;
        Ok(())
    }

    fn claim_interface(&mut self, _interface: u8) -> Result<()> {
        self.claimed += 1;
        Ok(())
    }

    fn release_interface(&mut self, _interface: u8) -> Result<()> {
        self.released.set(self.released.get() + 1);
        Ok(())
    }

    fn bulk_write(&mut self, _endpoint: u8, data: &[u8]) -> Result<usize> {
        if let Some((start, len)) = self.pending_write.take() {
            if data.len() != len {
                return Err(Error::Transport(format!(
                    "expected {len} byte payload, got {}",
                    data.len()
                )));
            }
            let start = start.min(self.flash.len());
            let end = (start + len).min(self.flash.len());
            self.flash[start..end].copy_from_slice(&data[..end - start]);
            self.payloads.push(data.to_vec());
            let id = self.packets.last().map_or(0, |p| p.id);
            self.responses.push_back(self.status(id));
            return Ok(data.len());
        }

        if data.len() != PACKET_LEN {
            return Err(Error::Transport(format!("unexpected {} byte write", data.len())));
        }
        let packet = CommandPacket::parse(data)
            .ok_or_else(|| Error::Transport("bad command signature".into()))?;
        if packet.known_opcode().is_some() && packet.known_opcode() == self.fail_on {
            return Err(Error::Transport("pipe error".into()));
        }
        self.packets.push(packet);

        match packet.known_opcode() {
            Some(Opcode::ReadFlashInfo) => {
                self.responses.push_back(self.flash_info.clone());
                self.responses.push_back(self.status(packet.id));
            },
            Some(Opcode::ReadLba) => {
                let (start, end) = self.byte_range(&packet);
                self.responses.push_back(self.flash[start..end].to_vec());
                self.responses.push_back(self.status(packet.id));
            },
            Some(Opcode::WriteLba) => {
                let start = packet.offset as usize * SECTOR_SIZE;
                self.pending_write = Some((start, usize::from(packet.size) * SECTOR_SIZE));
            },
            _ => self.responses.push_back(self.status(packet.id)),
        }
        Ok(data.len())
    }

    fn bulk_read(&mut self, _endpoint: u8, len: usize) -> Result<Vec<u8>> {
        let mut response = self
            .responses
            .pop_front()
            .ok_or_else(|| Error::Transport("timeout".into()))?;
        response.truncate(len);
        Ok(response)
    }
}
