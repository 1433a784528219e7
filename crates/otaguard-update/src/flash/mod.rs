//! Flash storage arena
//!
//! [`FlashDevice`] is the raw programming interface over the four fixed
//! regions. [`SharedFlash`] serializes every access through a critical
//! section; [`FlashWriter`] builds the image write and slot switch primitives
//! on top of it.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::FlashDeviceError;
use crate::partition::Region;

pub mod file;
pub mod memory;
pub mod writer;

pub use file::FileFlash;
pub use memory::{FlashOp, MemoryFlash};
pub use writer::FlashWriter;

/// Erased flash reads back as this value
pub const ERASED_BYTE: u8 = 0xFF;

/// Raw flash programming interface
///
/// Erase sets a whole region to [`ERASED_BYTE`]. Writes may only clear bits,
/// so a region must be erased before it is reprogrammed.
pub trait FlashDevice: Send {
    /// Size of a region in bytes
    fn capacity(&self, region: Region) -> u64;

    /// Erase a whole region
    fn erase(&mut self, region: Region) -> Result<(), FlashDeviceError>;

    /// Program `data` at `offset` within a region
    fn write(&mut self, region: Region, offset: u64, data: &[u8]) -> Result<(), FlashDeviceError>;

    /// Read `buf.len()` bytes at `offset` within a region
    fn read(&self, region: Region, offset: u64, buf: &mut [u8]) -> Result<(), FlashDeviceError>;
}

/// Check that an access lies within a region
pub(crate) fn check_bounds(
    region: Region,
    capacity: u64,
    offset: u64,
    len: usize,
) -> Result<(), FlashDeviceError> {
    let len = len as u64;
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(FlashDeviceError::OutOfBounds {
            region,
            offset,
            len,
        }),
    }
}

/// Flash device shared between the boot path and the update cycle
///
/// Every access goes through [`SharedFlash::critical_section`], which holds
/// the device lock for the whole closure. Closures are synchronous, so no
/// task can be suspended while holding the device.
#[derive(Debug)]
pub struct SharedFlash<D> {
    device: Arc<Mutex<D>>,
}

impl<D> Clone for SharedFlash<D> {
    fn clone(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
        }
    }
}

impl<D: FlashDevice> SharedFlash<D> {
    /// Wrap a device
    pub fn new(device: D) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
        }
    }

    /// Run `f` with exclusive access to the device
    pub fn critical_section<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        let mut device = self.device.lock();
        f(&mut device)
    }

    /// Capacity of a region
    pub fn capacity(&self, region: Region) -> u64 {
        self.critical_section(|device| device.capacity(region))
    }
}
