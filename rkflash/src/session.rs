//! Device session.
//!
//! A [`Session`] owns one open transport to a loader and exposes the
//! top-level operations: list partitions, flash, compare, backup, erase and
//! reboot. Every operation starts with [`Session::init`], which claims the
//! interface and probes the loader.
//!
//! ```text
//! Closed --open--> Opened --init--> Initialized --op--> Initialized
//!                                        |
//!                                  close/reboot
//!                                        v
//!                                     Closed
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "native")]
//! # fn main() -> rkflash::Result<()> {
//! use std::fs::File;
//! use rkflash::{Session, SessionOptions};
//!
//! let mut session = Session::open(1, 5, SessionOptions::default())?;
//! let region = session.partitions()?.get("boot")?.region();
//! session.flash_image(region, &mut File::open("boot.img")?)?;
//! session.reboot()?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "native"))]
//! # fn main() {}
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{debug, error, info};

use crate::device::DeviceEndpoints;
use crate::error::{Error, Result};
use crate::image::parameter::{self, PARAMETER_BLOCK_SIZE};
use crate::partition::{FlashInfo, PartitionTable, Region};
use crate::protocol::SECTOR_SIZE;
use crate::transfer::{
    self, Channel, DATA_CHUNK_SIZE, PARAMETER_CHUNK_SIZE, Phase, ProgressFn,
};
use crate::transport::{INTERFACE, Transport};

/// Target name selecting the parameter block.
pub const PARAMETER_TARGET: &str = "@parameter";

/// Delay after the readiness probe.
pub const SETTLE_DELAY: Duration = Duration::from_millis(20);

/// Whether a user-supplied target refers to the parameter block.
pub fn is_parameter_target(target: &str) -> bool {
    target == PARAMETER_TARGET
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handle released.
    Closed,
    /// Handle open, interface not yet claimed.
    Opened,
    /// Interface claimed and loader probed.
    Initialized,
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// USB transfer timeout.
    pub timeout: Duration,
    /// Delay after the readiness probe.
    pub settle_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            settle_delay: SETTLE_DELAY,
        }
    }
}

impl SessionOptions {
    /// Set the transfer timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }
}

/// Open session to one loader.
pub struct Session<T: Transport> {
    channel: Option<Channel<T>>,
    state: SessionState,
    claimed: bool,
    options: SessionOptions,
    flash_info: Option<FlashInfo>,
    partitions: Option<PartitionTable>,
    progress: Box<ProgressFn>,
}

#[cfg(feature = "native")]
impl Session<crate::transport::UsbTransport> {
    /// Open the loader at `bus`/`address`.
    pub fn open(bus: u8, address: u8, options: SessionOptions) -> Result<Self> {
        let devices = crate::device::detect_all_devices()?;
        let device =
            crate::device::find_device(&devices, bus, address).ok_or(Error::DeviceNotFound)?;
        let endpoints = crate::device::endpoints_for(device.product_id)?;
        let transport = crate::transport::UsbTransport::open(bus, address, options.timeout)?;
        info!("Opened {device}");
        Ok(Self::new(transport, endpoints, options))
    }
}

impl<T: Transport> Session<T> {
    /// Wrap an already opened transport.
    pub fn new(transport: T, endpoints: DeviceEndpoints, options: SessionOptions) -> Self {
        Self {
            channel: Some(Channel::new(transport, endpoints)),
            state: SessionState::Opened,
            claimed: false,
            options,
            flash_info: None,
            partitions: None,
            progress: Box::new(|_, _, _| {}),
        }
    }

    /// Wrap an opened transport, choosing endpoints from the product ID.
    pub fn for_product(transport: T, product_id: u16, options: SessionOptions) -> Result<Self> {
        let endpoints = crate::device::endpoints_for(product_id)?;
        Ok(Self::new(transport, endpoints, options))
    }

    /// Install a progress callback `(phase, done_bytes, total_bytes)`.
    pub fn set_progress<F>(&mut self, progress: F)
    where
        F: FnMut(Phase, u64, u64) + 'static,
    {
        self.progress = Box::new(progress);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session options.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Transport, while the session is open.
    pub fn transport(&self) -> Option<&T> {
        self.channel.as_ref().map(Channel::transport)
    }

    /// Flash information from the last partition load, if any.
    pub fn cached_flash_info(&self) -> Option<FlashInfo> {
        self.flash_info
    }

    fn channel(&mut self) -> Result<&mut Channel<T>> {
        match self.state {
            SessionState::Closed => Err(Error::SessionClosed),
            _ => self.channel.as_mut().ok_or(Error::SessionClosed),
        }
    }

    /// Claim the interface and probe the loader.
    pub fn init(&mut self) -> Result<()> {
        let settle = self.options.settle_delay;
        let channel = self.channel()?;
        let transport = channel.transport_mut();
        if transport.kernel_driver_active(INTERFACE)? {
            transport.detach_kernel_driver(INTERFACE)?;
        }
        transport.claim_interface(INTERFACE)?;
        self.claimed = true;

        let channel = self.channel()?;
        channel.test_unit_ready()?;
        thread::sleep(settle);
        self.state = SessionState::Initialized;
        Ok(())
    }

    /// Read the flash information block.
    pub fn read_flash_info(&mut self) -> Result<FlashInfo> {
        self.init()?;
        info!("Reading flash information");
        let info = self.channel()?.read_flash_info()?;
        info!("Flash size: {:.2} GiB", info.size_gib());
        info!("Done!");
        self.flash_info = Some(info);
        Ok(info)
    }

    /// Read flash info and the partition block, parse and cache the table.
    pub fn load_partitions(&mut self) -> Result<&PartitionTable> {
        self.init()?;

        info!("Reading flash information");
        let channel = self.channel()?;
        let info = channel.read_flash_info()?;
        info!("Loading partition information");
        let block = transfer::read_block(channel, 0, PARAMETER_BLOCK_SIZE)?;

        let table = PartitionTable::from_block(&block, info.flash_size_sectors)?;
        table.log();
        info!("Done!");

        self.flash_info = Some(info);
        Ok(self.partitions.insert(table))
    }

    /// Cached partition table, loading it on first use.
    pub fn partitions(&mut self) -> Result<&PartitionTable> {
        if self.partitions.is_none() {
            self.load_partitions()?;
        }
        self.partitions.as_ref().ok_or(Error::NoPartitionTable)
    }

    /// Region of a named partition (leading `@` allowed).
    pub fn resolve(&mut self, name: &str) -> Result<Region> {
        Ok(self.partitions()?.get(name)?.region())
    }

    /// Write `source` into `region`, then verify it.
    pub fn flash_image<R: Read + Seek>(&mut self, region: Region, source: &mut R) -> Result<()> {
        self.init()?;
        info!("Writing image to partition {region}");
        self.with_channel(|channel, progress| {
            transfer::write_region(channel, region, DATA_CHUNK_SIZE, source, progress)
        })?;
        info!("Done!");

        source.rewind()?;
        self.compare(region, source)
    }

    /// Encode and write a parameter file at sector 0. Not verified.
    ///
    /// The cached partition table is dropped once the write succeeds.
    pub fn flash_parameter(&mut self, path: &Path) -> Result<()> {
        let raw = fs::read(path)?;
        let image = parameter::encode(&raw)?;

        self.init()?;
        info!("Writing parameter file {}", path.display());
        let region = parameter_region();
        self.with_channel(|channel, progress| {
            transfer::write_region(
                channel,
                region,
                PARAMETER_CHUNK_SIZE,
                &mut Cursor::new(image),
                progress,
            )
        })?;
        self.partitions = None;
        info!("Done!");
        Ok(())
    }

    /// Flash `path` to a partition or to [`PARAMETER_TARGET`].
    pub fn flash_file(&mut self, target: &str, path: &Path) -> Result<()> {
        if is_parameter_target(target) {
            return self.flash_parameter(path);
        }
        let region = self.resolve(target)?;
        info!("Flashing {} to {target}", path.display());
        let mut source = BufReader::new(File::open(path)?);
        self.flash_image(region, &mut source)
    }

    /// Compare `region` with `source`.
    ///
    /// Stops once `source` is exhausted. Mismatching chunks are reported as
    /// [`Error::VerificationMismatch`] after the whole pass.
    pub fn compare<R: Read>(&mut self, region: Region, source: &mut R) -> Result<()> {
        self.init()?;
        info!("Comparing partition {region}");
        let report = self.with_channel(|channel, progress| {
            transfer::compare_region(channel, region, DATA_CHUNK_SIZE, source, progress)
        })?;
        report.into_result()?;
        info!("Done!");
        Ok(())
    }

    /// Compare a named partition with `path`.
    pub fn compare_file(&mut self, target: &str, path: &Path) -> Result<()> {
        let region = self.resolve(target)?;
        let mut source = BufReader::new(File::open(path)?);
        self.compare(region, &mut source)
    }

    /// Dump `region` into `path`, then verify the file against flash.
    pub fn backup_partition(&mut self, region: Region, path: &Path) -> Result<()> {
        self.init()?;
        info!("Backup partition {region} to file {}", path.display());
        {
            let mut sink = BufWriter::new(File::create(path)?);
            self.with_channel(|channel, progress| {
                transfer::read_region(channel, region, DATA_CHUNK_SIZE, &mut sink, progress)
            })?;
            sink.flush()?;
        }
        info!("Done!");

        let mut source = BufReader::new(File::open(path)?);
        self.compare(region, &mut source)
    }

    /// Read and validate the parameter block, writing the raw text to `path`.
    ///
    /// An invalid image leaves no file behind.
    pub fn backup_parameter(&mut self, path: &Path) -> Result<()> {
        self.init()?;
        info!("Backing up parameter to file {}", path.display());
        let block = transfer::read_block(self.channel()?, 0, PARAMETER_BLOCK_SIZE)?;

        let raw = parameter::decode(&block).inspect_err(|e| {
            error!("Invalid parameter file! ({e})");
        })?;
        fs::write(path, raw)?;
        info!("Done!");
        Ok(())
    }

    /// Back up a partition or [`PARAMETER_TARGET`] to `path`.
    pub fn backup_file(&mut self, target: &str, path: &Path) -> Result<()> {
        if is_parameter_target(target) {
            return self.backup_parameter(path);
        }
        let region = self.resolve(target)?;
        self.backup_partition(region, path)
    }

    /// Fill `region` with 0xFF.
    pub fn erase_partition(&mut self, region: Region) -> Result<()> {
        self.init()?;
        info!("Erasing partition {region}");
        self.with_channel(|channel, progress| {
            transfer::erase_region(channel, region, DATA_CHUNK_SIZE, progress)
        })?;
        info!("Done!");
        Ok(())
    }

    /// Erase a named partition.
    pub fn erase(&mut self, target: &str) -> Result<()> {
        let region = self.resolve(target)?;
        self.erase_partition(region)
    }

    /// Reboot the device. The session is closed afterwards.
    pub fn reboot(&mut self) -> Result<()> {
        self.init()?;
        self.channel()?.reboot()?;
        info!("Rebooting device");
        info!("Done!");
        self.close();
        Ok(())
    }

    /// Release the interface and the handle. Safe to call repeatedly.
    pub fn close(&mut self) {
        let claimed = std::mem::take(&mut self.claimed);
        self.state = SessionState::Closed;
        self.partitions = None;

        if let Some(mut channel) = self.channel.take() {
            if claimed {
                if let Err(e) = channel.transport_mut().release_interface(INTERFACE) {
                    debug!("Failed to release interface: {e}");
                }
            }
            debug!("Session closed");
        }
    }

    fn with_channel<F, O>(&mut self, op: F) -> Result<O>
    where
        F: FnOnce(&mut Channel<T>, &mut ProgressFn) -> Result<O>,
    {
        if self.state == SessionState::Closed {
            return Err(Error::SessionClosed);
        }
        let channel = self.channel.as_mut().ok_or(Error::SessionClosed)?;
        op(channel, self.progress.as_mut())
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("options", &self.options)
            .field("flash_info", &self.flash_info)
            .field("partitions", &self.partitions)
            .finish_non_exhaustive()
    }
}

fn parameter_region() -> Region {
    // Bounded constant
    #[allow(clippy::cast_possible_truncation)]
    let sectors = (PARAMETER_BLOCK_SIZE / SECTOR_SIZE) as u32;
    Region::new(0, sectors)
}
