//! File-backed flash device
//!
//! Each region is one file in a directory, so slot contents and the record
//! survive process restarts. Used by the host agent to simulate a device.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::FlashLayout;
use crate::error::FlashDeviceError;
use crate::flash::{ERASED_BYTE, FlashDevice, check_bounds};
use crate::partition::{PartitionSlot, RecordCopy, Region};

/// Flash device stored as one file per region
#[derive(Debug, Clone)]
pub struct FileFlash {
    dir: PathBuf,
    slot_size: u64,
    record_sector_size: u64,
}

impl FileFlash {
    /// Open the device in `dir`, creating erased region files as needed
    pub fn open(dir: impl AsRef<Path>, layout: &FlashLayout) -> Result<Self, FlashDeviceError> {
        let flash = Self {
            dir: dir.as_ref().to_path_buf(),
            slot_size: layout.slot_size,
            record_sector_size: layout.record_sector_size,
        };
        fs::create_dir_all(&flash.dir)?;

        for region in Region::ALL {
            let path = flash.path(region);
            let capacity = flash.capacity(region);
            if path.exists() {
                let actual = fs::metadata(&path)?.len();
                if actual != capacity {
                    return Err(FlashDeviceError::Fault(format!(
                        "{} has {} bytes, layout expects {}",
                        path.display(),
                        actual,
                        capacity
                    )));
                }
            } else {
                debug!(region = %region, "Creating erased region file {}", path.display());
                flash.fill_erased(region)?;
            }
        }

        Ok(flash)
    }

    /// Directory holding the region files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, region: Region) -> PathBuf {
        let name = match region {
            Region::Slot(PartitionSlot::A) => "slot_a.bin",
            Region::Slot(PartitionSlot::B) => "slot_b.bin",
            Region::Record(RecordCopy::Primary) => "record_0.bin",
            Region::Record(RecordCopy::Secondary) => "record_1.bin",
        };
        self.dir.join(name)
    }

    fn fill_erased(&self, region: Region) -> Result<(), FlashDeviceError> {
        let capacity = usize::try_from(self.capacity(region))
            .map_err(|e| FlashDeviceError::Fault(e.to_string()))?;
        let mut file = File::create(self.path(region))?;
        file.write_all(&vec![ERASED_BYTE; capacity])?;
        file.sync_all()?;
        Ok(())
    }
}

impl FlashDevice for FileFlash {
    fn capacity(&self, region: Region) -> u64 {
        match region {
            Region::Slot(_) => self.slot_size,
            Region::Record(_) => self.record_sector_size,
        }
    }

    fn erase(&mut self, region: Region) -> Result<(), FlashDeviceError> {
        self.fill_erased(region)
    }

    fn write(&mut self, region: Region, offset: u64, data: &[u8]) -> Result<(), FlashDeviceError> {
        check_bounds(region, self.capacity(region), offset, data.len())?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.path(region))?;

        let mut cells = vec![0u8; data.len()];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut cells)?;
        for (cell, byte) in cells.iter_mut().zip(data) {
            *cell &= *byte;
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&cells)?;
        file.sync_data()?;
        Ok(())
    }

    fn read(&self, region: Region, offset: u64, buf: &mut [u8]) -> Result<(), FlashDeviceError> {
        check_bounds(region, self.capacity(region), offset, buf.len())?;
        let mut file = File::open(self.path(region))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }
}
