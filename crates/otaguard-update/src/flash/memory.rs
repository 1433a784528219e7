//! In-memory flash device with NOR semantics and fault injection

use crate::error::FlashDeviceError;
use crate::flash::{ERASED_BYTE, FlashDevice, check_bounds};
use crate::partition::{PartitionSlot, RecordCopy, Region};

/// Operation recorded by [`MemoryFlash`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    /// Region erased
    Erase(Region),
    /// Bytes programmed
    Write {
        /// Target region
        region: Region,
        /// Start offset
        offset: u64,
        /// Bytes requested
        len: u64,
    },
}

/// RAM-backed flash device
///
/// Programming ANDs data into the existing contents, so writing over
/// unerased bytes corrupts them the way real NOR flash does. Every erase and
/// write is logged, and faults can be injected per region or as a power cut
/// after a byte budget.
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    slot_a: Vec<u8>,
    slot_b: Vec<u8>,
    record_primary: Vec<u8>,
    record_secondary: Vec<u8>,
    ops: Vec<FlashOp>,
    fail_erase: Option<Region>,
    fail_write: Option<Region>,
    power_budget: Option<u64>,
    powered: bool,
}

impl MemoryFlash {
    /// Create an erased device
    pub fn new(slot_size: usize, record_sector_size: usize) -> Self {
        Self {
            slot_a: vec![ERASED_BYTE; slot_size],
            slot_b: vec![ERASED_BYTE; slot_size],
            record_primary: vec![ERASED_BYTE; record_sector_size],
            record_secondary: vec![ERASED_BYTE; record_sector_size],
            ops: Vec::new(),
            fail_erase: None,
            fail_write: None,
            power_budget: None,
            powered: true,
        }
    }

    fn region(&self, region: Region) -> &Vec<u8> {
        match region {
            Region::Slot(PartitionSlot::A) => &self.slot_a,
            Region::Slot(PartitionSlot::B) => &self.slot_b,
            Region::Record(RecordCopy::Primary) => &self.record_primary,
            Region::Record(RecordCopy::Secondary) => &self.record_secondary,
        }
    }

    fn region_mut(&mut self, region: Region) -> &mut Vec<u8> {
        match region {
            Region::Slot(PartitionSlot::A) => &mut self.slot_a,
            Region::Slot(PartitionSlot::B) => &mut self.slot_b,
            Region::Record(RecordCopy::Primary) => &mut self.record_primary,
            Region::Record(RecordCopy::Secondary) => &mut self.record_secondary,
        }
    }

    /// Contents of a region
    pub fn contents(&self, region: Region) -> &[u8] {
        self.region(region)
    }

    /// Operations issued so far
    pub fn ops(&self) -> &[FlashOp] {
        &self.ops
    }

    /// Forget the operation log
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Check whether any erase or write touched `region`
    pub fn touched(&self, region: Region) -> bool {
        self.ops.iter().any(|op| match op {
            FlashOp::Erase(r) => *r == region,
            FlashOp::Write { region: r, .. } => *r == region,
        })
    }

    /// Make every erase of `region` fail
    pub fn fail_erase_of(&mut self, region: Region) {
        self.fail_erase = Some(region);
    }

    /// Make every write to `region` fail
    pub fn fail_write_of(&mut self, region: Region) {
        self.fail_write = Some(region);
    }

    /// Lose power once `bytes` more bytes have been programmed
    ///
    /// The write that exhausts the budget is applied partially; after that
    /// every operation fails until [`MemoryFlash::restore_power`].
    pub fn cut_power_after(&mut self, bytes: u64) {
        self.power_budget = Some(bytes);
    }

    /// Power the device back on and clear injected faults
    pub fn restore_power(&mut self) {
        self.powered = true;
        self.power_budget = None;
        self.fail_erase = None;
        self.fail_write = None;
    }

    fn ensure_powered(&self) -> Result<(), FlashDeviceError> {
        if self.powered {
            Ok(())
        } else {
            Err(FlashDeviceError::Fault("power lost".to_string()))
        }
    }
}

impl FlashDevice for MemoryFlash {
    fn capacity(&self, region: Region) -> u64 {
        self.region(region).len() as u64
    }

    fn erase(&mut self, region: Region) -> Result<(), FlashDeviceError> {
        self.ensure_powered()?;
        self.ops.push(FlashOp::Erase(region));
        if self.fail_erase == Some(region) {
            return Err(FlashDeviceError::Fault(format!("erase of {} failed", region)));
        }
        self.region_mut(region).fill(ERASED_BYTE);
        Ok(())
    }

    fn write(&mut self, region: Region, offset: u64, data: &[u8]) -> Result<(), FlashDeviceError> {
        self.ensure_powered()?;
        check_bounds(region, self.capacity(region), offset, data.len())?;
        self.ops.push(FlashOp::Write {
            region,
            offset,
            len: data.len() as u64,
        });
        if self.fail_write == Some(region) {
            return Err(FlashDeviceError::Fault(format!("program of {} failed", region)));
        }

        let requested = data.len() as u64;
        let allowed = match self.power_budget {
            Some(budget) => budget.min(requested),
            None => requested,
        };
        if let Some(budget) = self.power_budget.as_mut() {
            *budget = budget.saturating_sub(allowed);
        }

        let start = usize::try_from(offset).map_err(|_| FlashDeviceError::OutOfBounds {
            region,
            offset,
            len: requested,
        })?;
        let count = usize::try_from(allowed).unwrap_or(data.len());
        let target = self.region_mut(region);
        for (cell, byte) in target.iter_mut().skip(start).zip(data.iter().take(count)) {
            *cell &= *byte;
        }

        if allowed < requested {
            self.powered = false;
            return Err(FlashDeviceError::Fault("power lost".to_string()));
        }
        Ok(())
    }

    fn read(&self, region: Region, offset: u64, buf: &mut [u8]) -> Result<(), FlashDeviceError> {
        self.ensure_powered()?;
        let out_of_bounds = || FlashDeviceError::OutOfBounds {
            region,
            offset,
            len: buf.len() as u64,
        };
        check_bounds(region, self.capacity(region), offset, buf.len())?;
        let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(buf.len()).ok_or_else(out_of_bounds)?;
        let source = self.region(region).get(start..end).ok_or_else(out_of_bounds)?;
        buf.copy_from_slice(source);
        Ok(())
    }
}
