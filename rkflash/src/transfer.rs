//! Chunked block transfers over RKFT.
//!
//! Every flash operation walks a [`Region`] in fixed-size chunks. For each
//! chunk one command packet is sent, followed by the data phase and a
//! status read:
//!
//! ```text
//! read:   CMD(ReadLba, off, n)  -> DATA(n * 512) <- STATUS(13)
//! write:  CMD(WriteLba, off, n) -> DATA(n * 512) -> STATUS(13)
//! ```
//!
//! [`run_chunks`] owns the offset bookkeeping; the public operations only
//! decide what happens inside a chunk.

use std::io::{Read, Write};
use std::ops::ControlFlow;

use log::{debug, error, info, trace};

use crate::device::DeviceEndpoints;
use crate::error::{Error, Result};
use crate::partition::{FLASH_INFO_LEN, FlashInfo, Region};
use crate::protocol::command::{self, CommandCounter};
use crate::protocol::{Opcode, SECTOR_SIZE, STATUS_LEN};
use crate::transport::Transport;

/// Chunk size for data partitions.
pub const DATA_CHUNK_SIZE: usize = 0x4000;

/// Chunk size for the parameter block.
pub const PARAMETER_CHUNK_SIZE: usize = 0x800;

/// A progress line is logged whenever the offset is a multiple of this.
pub const PROGRESS_INTERVAL_SECTORS: u32 = 0x1000;

/// Fill byte used by erase.
pub const ERASED_BYTE: u8 = 0xFF;

/// What a transfer is doing, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Writing image data.
    Write,
    /// Reading flash into a file.
    Read,
    /// Comparing flash with a file.
    Compare,
    /// Filling with 0xFF.
    Erase,
}

impl Phase {
    /// Verb used in progress lines.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Write => "Writing",
            Self::Read | Self::Compare => "Reading",
            Self::Erase => "Erasing",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Write => "Writing",
            Self::Read => "Reading",
            Self::Compare => "Verifying",
            Self::Erase => "Erasing",
        })
    }
}

/// Progress callback: `(phase, done_bytes, total_bytes)`.
pub type ProgressFn = dyn FnMut(Phase, u64, u64);

/// One step of a chunked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Absolute start sector.
    pub offset: u32,
    /// Sectors in this chunk.
    pub sectors: u8,
}

impl Chunk {
    /// Absolute byte offset.
    pub fn byte_offset(&self) -> u64 {
        u64::from(self.offset) * SECTOR_SIZE as u64
    }

    /// Byte length.
    pub fn len(&self) -> usize {
        usize::from(self.sectors) * SECTOR_SIZE
    }

    /// Whether the chunk is empty.
    pub fn is_empty(&self) -> bool {
        self.sectors == 0
    }
}

/// Totals for a finished transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Chunks processed.
    pub chunks: usize,
    /// Sectors requested from or sent to the device.
    pub sectors: u64,
}

impl TransferStats {
    /// Bytes requested from or sent to the device.
    pub fn bytes(&self) -> u64 {
        self.sectors * SECTOR_SIZE as u64
    }
}

/// Outcome of a compare pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompareReport {
    /// Chunks compared.
    pub chunks: usize,
    /// Byte offsets of mismatching chunks, in order.
    pub mismatches: Vec<u64>,
}

impl CompareReport {
    /// Whether every compared chunk matched.
    pub fn is_match(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Turn mismatches into [`Error::VerificationMismatch`].
    pub fn into_result(self) -> Result<()> {
        match self.mismatches.first() {
            None => Ok(()),
            Some(&first_offset) => Err(Error::VerificationMismatch {
                count: self.mismatches.len(),
                first_offset,
            }),
        }
    }
}

/// Command channel to one device: transport, endpoints and command ids.
#[derive(Debug)]
pub struct Channel<T: Transport> {
    transport: T,
    endpoints: DeviceEndpoints,
    counter: CommandCounter,
}

impl<T: Transport> Channel<T> {
    /// Create a channel. The first command carries id 0.
    pub fn new(transport: T, endpoints: DeviceEndpoints) -> Self {
        Self {
            transport,
            endpoints,
            counter: CommandCounter::new(),
        }
    }

    /// Endpoint pair in use.
    pub fn endpoints(&self) -> DeviceEndpoints {
        self.endpoints
    }

    /// Id the next command will carry.
    pub fn next_command_id(&self) -> u8 {
        self.counter.peek()
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Send one command packet.
    pub fn send_command(&mut self, opcode: Opcode, offset: u32, sectors: u8) -> Result<()> {
        let packet = command::build(&mut self.counter, opcode.flag(), opcode as u32, offset, sectors);
        trace!("CMD {opcode:?} id={} offset={offset:#x} size={sectors}", packet[4]);
        self.write_all(&packet)
    }

    /// Write a data-phase payload.
    pub fn write_payload(&mut self, data: &[u8]) -> Result<()> {
        self.write_all(data)
    }

    /// Read a data-phase payload of at most `len` bytes.
    pub fn read_payload(&mut self, len: usize) -> Result<Vec<u8>> {
        self.transport.bulk_read(self.endpoints.read, len)
    }

    /// Read the status block closing every command.
    pub fn read_status(&mut self) -> Result<Vec<u8>> {
        let status = self.transport.bulk_read(self.endpoints.read, STATUS_LEN)?;
        if status.len() != STATUS_LEN {
            return Err(Error::Protocol(format!(
                "status block is {} bytes, expected {STATUS_LEN}",
                status.len()
            )));
        }
        Ok(status)
    }

    /// Command, payload read and status for `chunk`.
    pub fn read_sectors(&mut self, chunk: Chunk) -> Result<Vec<u8>> {
        self.send_command(Opcode::ReadLba, chunk.offset, chunk.sectors)?;
        let data = self.read_payload(chunk.len())?;
        if data.len() < chunk.len() {
            debug!(
                "Short read at 0x{:08X}: {}/{} bytes",
                chunk.offset,
                data.len(),
                chunk.len()
            );
        }
        self.read_status()?;
        Ok(data)
    }

    /// Command, zero-padded payload write and status for `chunk`.
    pub fn write_sectors(&mut self, chunk: Chunk, data: &[u8]) -> Result<()> {
        let mut buf = vec![0u8; chunk.len()];
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);

        self.send_command(Opcode::WriteLba, chunk.offset, chunk.sectors)?;
        self.write_payload(&buf)?;
        self.read_status()?;
        Ok(())
    }

    /// Issue the readiness probe.
    pub fn test_unit_ready(&mut self) -> Result<()> {
        self.send_command(Opcode::TestUnitReady, 0, 0)?;
        self.read_status()?;
        Ok(())
    }

    /// Read and decode the flash information block.
    pub fn read_flash_info(&mut self) -> Result<FlashInfo> {
        self.send_command(Opcode::ReadFlashInfo, 0, 0)?;
        let data = self.read_payload(FLASH_INFO_LEN)?;
        self.read_status()?;
        FlashInfo::decode(&data)
    }

    /// Ask the loader to reboot.
    pub fn reboot(&mut self) -> Result<()> {
        self.send_command(Opcode::Reboot, 0, 0)?;
        self.read_status()?;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let written = self.transport.bulk_write(self.endpoints.write, data)?;
        if written != data.len() {
            return Err(Error::Transport(format!(
                "short bulk write: {written}/{} bytes",
                data.len()
            )));
        }
        Ok(())
    }
}

/// Sectors per chunk for a chunk size in bytes.
fn chunk_sectors(chunk_size: usize) -> Result<u8> {
    if chunk_size == 0 || chunk_size % SECTOR_SIZE != 0 {
        return Err(Error::InvalidRegion(format!(
            "chunk size {chunk_size:#x} is not a positive multiple of {SECTOR_SIZE}"
        )));
    }
    u8::try_from(chunk_size / SECTOR_SIZE)
        .map_err(|_| Error::InvalidRegion(format!("chunk size {chunk_size:#x} too large")))
}

/// Walk `region` in chunks of `chunk_size` bytes, calling `step` for each.
///
/// `step` performs the chunk's I/O and may end the walk early by returning
/// [`ControlFlow::Break`].
pub fn run_chunks<T, P, F>(
    channel: &mut Channel<T>,
    region: Region,
    chunk_size: usize,
    phase: Phase,
    progress: &mut P,
    mut step: F,
) -> Result<TransferStats>
where
    T: Transport,
    P: FnMut(Phase, u64, u64) + ?Sized,
    F: FnMut(&mut Channel<T>, Chunk) -> Result<ControlFlow<()>>,
{
    let per_chunk = chunk_sectors(chunk_size)?;
    let total = region.size_bytes();
    let mut offset = region.offset;
    let mut remaining = region.size;
    let mut stats = TransferStats::default();

    while remaining > 0 {
        // Bounded by per_chunk
        #[allow(clippy::cast_possible_truncation)]
        let sectors = remaining.min(u32::from(per_chunk)) as u8;
        let chunk = Chunk { offset, sectors };

        if offset % PROGRESS_INTERVAL_SECTORS == 0 {
            info!("{} flash memory at offset 0x{offset:08X}", phase.verb());
        }

        if step(channel, chunk)?.is_break() {
            break;
        }

        stats.chunks += 1;
        stats.sectors += u64::from(sectors);
        progress(phase, stats.bytes().min(total), total);

        offset = offset.wrapping_add(u32::from(sectors));
        remaining -= u32::from(sectors);
    }

    Ok(stats)
}

/// Read up to `len` bytes from `source`, stopping early only at end of file.
fn read_chunk<R: Read + ?Sized>(source: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len);
    source.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Write `source` into `region`.
///
/// Each chunk is zero-padded to its full size. The loop stops early when
/// `source` is exhausted.
pub fn write_region<T, R, P>(
    channel: &mut Channel<T>,
    region: Region,
    chunk_size: usize,
    source: &mut R,
    progress: &mut P,
) -> Result<TransferStats>
where
    T: Transport,
    R: Read + ?Sized,
    P: FnMut(Phase, u64, u64) + ?Sized,
{
    run_chunks(channel, region, chunk_size, Phase::Write, progress, |channel, chunk| {
        let data = read_chunk(source, chunk.len())?;
        if data.is_empty() {
            return Ok(ControlFlow::Break(()));
        }
        channel.write_sectors(chunk, &data)?;
        Ok(ControlFlow::Continue(()))
    })
}

/// Read `region` into `sink`.
///
/// A short read at the tail of the region is written as received.
pub fn read_region<T, W, P>(
    channel: &mut Channel<T>,
    region: Region,
    chunk_size: usize,
    sink: &mut W,
    progress: &mut P,
) -> Result<TransferStats>
where
    T: Transport,
    W: Write + ?Sized,
    P: FnMut(Phase, u64, u64) + ?Sized,
{
    run_chunks(channel, region, chunk_size, Phase::Read, progress, |channel, chunk| {
        let data = channel.read_sectors(chunk)?;
        sink.write_all(&data)?;
        Ok(ControlFlow::Continue(()))
    })
}

/// Compare `region` with `source`.
///
/// Mismatches are logged and collected; they never stop the loop. The loop
/// ends once `source` is exhausted, even if the region is larger.
pub fn compare_region<T, R, P>(
    channel: &mut Channel<T>,
    region: Region,
    chunk_size: usize,
    source: &mut R,
    progress: &mut P,
) -> Result<CompareReport>
where
    T: Transport,
    R: Read + ?Sized,
    P: FnMut(Phase, u64, u64) + ?Sized,
{
    let mut report = CompareReport::default();

    run_chunks(channel, region, chunk_size, Phase::Compare, progress, |channel, chunk| {
        let expected = read_chunk(source, chunk.len())?;
        let mut actual = channel.read_sectors(chunk)?;

        if expected.len() != actual.len() {
            if expected.is_empty() {
                return Ok(ControlFlow::Break(()));
            }
            actual.truncate(expected.len());
        }

        report.chunks += 1;
        if expected != actual {
            error!(
                "Flash memory at 0x{:08X} is different from file!",
                chunk.offset
            );
            report.mismatches.push(chunk.byte_offset());
        }
        Ok(ControlFlow::Continue(()))
    })?;

    Ok(report)
}

/// Fill `region` with 0xFF through the write path.
pub fn erase_region<T, P>(
    channel: &mut Channel<T>,
    region: Region,
    chunk_size: usize,
    progress: &mut P,
) -> Result<TransferStats>
where
    T: Transport,
    P: FnMut(Phase, u64, u64) + ?Sized,
{
    let fill = vec![ERASED_BYTE; chunk_size];
    run_chunks(channel, region, chunk_size, Phase::Erase, progress, |channel, chunk| {
        channel.write_sectors(chunk, &fill[..chunk.len()])?;
        Ok(ControlFlow::Continue(()))
    })
}

/// Read `len` bytes starting at sector `offset` into memory.
pub fn read_block<T: Transport>(channel: &mut Channel<T>, offset: u32, len: usize) -> Result<Vec<u8>> {
    let region = Region::from_bytes(u64::from(offset) * SECTOR_SIZE as u64, len as u64)?;
    let mut buf = Vec::with_capacity(len);
    read_region(channel, region, len.max(SECTOR_SIZE), &mut buf, &mut |_, _, _| {})?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::transport::mock::MockTransport;

    fn channel(sectors: usize) -> Channel<MockTransport> {
        Channel::new(MockTransport::new(sectors), DeviceEndpoints::DEFAULT)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn noop() -> impl FnMut(Phase, u64, u64) {
        |_, _, _| {}
    }

    #[test]
    fn test_chunk_offsets_and_total() {
        let mut ch = channel(0x200);
        // 100 sectors: 32 + 32 + 32 + 4
        let region = Region::new(0x40, 100);
        let mut sink = Vec::new();
        let stats = read_region(&mut ch, region, DATA_CHUNK_SIZE, &mut sink, &mut noop()).unwrap();

        let packets = ch.transport().packets_for(Opcode::ReadLba);
        let offsets: Vec<u32> = packets.iter().map(|p| p.offset).collect();
        let sizes: Vec<u8> = packets.iter().map(|p| p.size).collect();
        assert_eq!(offsets, [0x40, 0x60, 0x80, 0xa0]);
        assert_eq!(sizes, [32, 32, 32, 4]);
        assert_eq!(stats.chunks, 4);
        assert_eq!(stats.bytes(), 100 * 512);
        assert_eq!(sink.len(), 100 * 512);
    }

    #[test]
    fn test_write_pads_and_stores() {
        let mut ch = channel(0x100);
        let data = pattern(DATA_CHUNK_SIZE + 700);
        let region = Region::new(0x10, 0x60);
        let stats = write_region(
            &mut ch,
            region,
            DATA_CHUNK_SIZE,
            &mut Cursor::new(&data),
            &mut noop(),
        )
        .unwrap();

        // Two chunks written, third skipped because the file ran out
        assert_eq!(stats.chunks, 2);
        let mock = ch.transport();
        assert_eq!(mock.payloads.len(), 2);
        assert!(mock.payloads.iter().all(|p| p.len() == DATA_CHUNK_SIZE));
        let start = 0x10 * 512;
        assert_eq!(&mock.flash[start..start + data.len()], &data[..]);
        assert!(mock.payloads[1][700..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_last_chunk_is_short() {
        let mut ch = channel(0x100);
        let data = pattern(40 * 512);
        let stats = write_region(
            &mut ch,
            Region::new(0, 40),
            DATA_CHUNK_SIZE,
            &mut Cursor::new(&data),
            &mut noop(),
        )
        .unwrap();
        let sizes: Vec<u8> = ch
            .transport()
            .packets_for(Opcode::WriteLba)
            .iter()
            .map(|p| p.size)
            .collect();
        assert_eq!(sizes, [32, 8]);
        assert_eq!(stats.bytes(), 40 * 512);
        assert_eq!(ch.transport().payloads[1].len(), 8 * 512);
    }

    #[test]
    fn test_compare_identical() {
        let data = pattern(70 * 512);
        let mut mock = MockTransport::new(0x100);
        mock.flash[..data.len()].copy_from_slice(&data);
        let mut ch = Channel::new(mock, DeviceEndpoints::DEFAULT);

        let report = compare_region(
            &mut ch,
            Region::new(0, 70),
            DATA_CHUNK_SIZE,
            &mut Cursor::new(&data),
            &mut noop(),
        )
        .unwrap();
        assert!(report.is_match());
        assert_eq!(report.chunks, 3);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_compare_single_flipped_byte() {
        let data = pattern(96 * 512);
        let mut mock = MockTransport::new(0x200);
        let base = 0x80 * 512;
        mock.flash[base..base + data.len()].copy_from_slice(&data);
        // Second chunk
        mock.flash[base + DATA_CHUNK_SIZE + 123] ^= 0xFF;
        let mut ch = Channel::new(mock, DeviceEndpoints::DEFAULT);

        let report = compare_region(
            &mut ch,
            Region::new(0x80, 96),
            DATA_CHUNK_SIZE,
            &mut Cursor::new(&data),
            &mut noop(),
        )
        .unwrap();
        let expected_offset = (0x80 + 32) as u64 * 512;
        // Chunks after the mismatch are still read and compared
        assert_eq!(report.chunks, 3);
        assert_eq!(ch.transport().packets_for(Opcode::ReadLba).len(), 3);
        assert_eq!(report.mismatches, vec![expected_offset]);
        match report.into_result() {
            Err(Error::VerificationMismatch {
                count,
                first_offset,
            }) => {
                assert_eq!(count, 1);
                assert_eq!(first_offset, expected_offset);
            },
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_compare_reports_every_mismatching_chunk() {
        let data = pattern(96 * 512);
        let mut mock = MockTransport::new(0x200);
        mock.flash[..data.len()].copy_from_slice(&data);
        mock.flash[7] ^= 0x01;
        mock.flash[2 * DATA_CHUNK_SIZE + 9] ^= 0x01;
        let mut ch = Channel::new(mock, DeviceEndpoints::DEFAULT);

        let report = compare_region(
            &mut ch,
            Region::new(0, 96),
            DATA_CHUNK_SIZE,
            &mut Cursor::new(&data),
            &mut noop(),
        )
        .unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.mismatches, vec![0, 64 * 512]);
        match report.into_result() {
            Err(Error::VerificationMismatch {
                count,
                first_offset,
            }) => {
                assert_eq!(count, 2);
                assert_eq!(first_offset, 0);
            },
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_compare_stops_when_file_exhausted() {
        // File shorter than the region: compare covers the file only
        let data = pattern(32 * 512 + 100);
        let mut mock = MockTransport::new(0x100);
        mock.flash[..data.len()].copy_from_slice(&data);
        let mut ch = Channel::new(mock, DeviceEndpoints::DEFAULT);

        let report = compare_region(
            &mut ch,
            Region::new(0, 0x80),
            DATA_CHUNK_SIZE,
            &mut Cursor::new(&data),
            &mut noop(),
        )
        .unwrap();
        assert!(report.is_match());
        assert_eq!(report.chunks, 2);
        // Third read was issued, then the empty file chunk ended the loop
        assert_eq!(ch.transport().packets_for(Opcode::ReadLba).len(), 3);
    }

    #[test]
    fn test_erase_fills_remainder() {
        let mut mock = MockTransport::new(0x100);
        mock.flash.iter_mut().for_each(|b| *b = 0x5A);
        let mut ch = Channel::new(mock, DeviceEndpoints::DEFAULT);

        let stats = erase_region(&mut ch, Region::new(4, 37), DATA_CHUNK_SIZE, &mut noop()).unwrap();
        assert_eq!(stats.chunks, 2);

        let mock = ch.transport();
        assert_eq!(mock.payloads[1].len(), 5 * 512);
        assert!(mock.payloads.iter().flatten().all(|&b| b == ERASED_BYTE));
        assert!(mock.flash[4 * 512..41 * 512].iter().all(|&b| b == ERASED_BYTE));
        assert!(mock.flash[..4 * 512].iter().all(|&b| b == 0x5A));
        assert!(mock.flash[41 * 512..].iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_short_tail_read_tolerated() {
        // Region extends past the end of the simulated flash
        let mut ch = channel(40);
        let mut sink = Vec::new();
        let stats = read_region(&mut ch, Region::new(0, 64), DATA_CHUNK_SIZE, &mut sink, &mut noop()).unwrap();
        assert_eq!(stats.chunks, 2);
        assert_eq!(sink.len(), 40 * 512);
    }

    #[test]
    fn test_bad_status_length_is_protocol_error() {
        let mut mock = MockTransport::new(0x10);
        mock.status_len = 12;
        let mut ch = Channel::new(mock, DeviceEndpoints::DEFAULT);
        assert!(matches!(ch.test_unit_ready(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_progress_reports_totals() {
        let mut ch = channel(0x100);
        let mut calls = Vec::new();
        let mut sink = Vec::new();
        read_region(
            &mut ch,
            Region::new(0, 40),
            DATA_CHUNK_SIZE,
            &mut sink,
            &mut |phase, done, total| calls.push((phase, done, total)),
        )
        .unwrap();
        assert_eq!(
            calls,
            vec![
                (Phase::Read, 32 * 512, 40 * 512),
                (Phase::Read, 40 * 512, 40 * 512)
            ]
        );
    }

    #[test]
    fn test_command_ids_continue_across_operations() {
        let mut ch = channel(0x100);
        ch.test_unit_ready().unwrap();
        erase_region(&mut ch, Region::new(0, 64), DATA_CHUNK_SIZE, &mut noop()).unwrap();
        ch.read_flash_info().unwrap();
        let ids: Vec<u8> = ch.transport().packets.iter().map(|p| p.id).collect();
        assert_eq!(ids, [0, 1, 2, 3]);
        assert_eq!(ch.next_command_id(), 4);
    }

    #[test]
    fn test_read_block() {
        let block = pattern(PARAMETER_CHUNK_SIZE);
        let mock = MockTransport::with_block(0x100, &block);
        let mut ch = Channel::new(mock, DeviceEndpoints::DEFAULT);
        assert_eq!(read_block(&mut ch, 0, PARAMETER_CHUNK_SIZE).unwrap(), block);
        let packets = ch.transport().packets_for(Opcode::ReadLba);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].size, 4);
    }

    #[test]
    fn test_invalid_chunk_size() {
        let mut ch = channel(0x10);
        assert!(matches!(
            erase_region(&mut ch, Region::new(0, 1), 100, &mut noop()),
            Err(Error::InvalidRegion(_))
        ));
    }
}
