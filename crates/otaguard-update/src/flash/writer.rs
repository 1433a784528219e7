//! Partition writing and slot switching
//!
//! The writer only ever erases the inactive slot, and only accepts a
//! [`VerifiedImage`]. Switching is a single record commit.

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::OtaConfig;
use crate::error::FlashError;
use crate::flash::{FlashDevice, SharedFlash};
use crate::partition::{PartitionSlot, Region};
use crate::record::{PersistentUpdateRecord, RecordStore};
use crate::verify::{Sha256Digest, VerifiedImage};
use crate::version::FirmwareVersion;

/// Writes verified images and flips the active slot
#[derive(Debug, Clone)]
pub struct FlashWriter<D> {
    flash: SharedFlash<D>,
    records: RecordStore<D>,
    write_chunk: usize,
    max_boot_attempts: u32,
}

impl<D: FlashDevice> FlashWriter<D> {
    /// Create a writer over the shared flash
    pub fn new(flash: SharedFlash<D>, config: &OtaConfig) -> Self {
        Self {
            records: RecordStore::new(flash.clone()),
            flash,
            write_chunk: config.flash.write_chunk.max(1),
            max_boot_attempts: config.max_boot_attempts,
        }
    }

    /// Record store used for switches
    pub fn records(&self) -> &RecordStore<D> {
        &self.records
    }

    /// Erase the inactive slot and program `image` into it
    ///
    /// Refuses while the active image awaits confirmation, because the
    /// inactive slot then holds the last known-good image. Returns the slot
    /// written. The record is not modified.
    pub fn write_to_inactive_slot(&self, image: &VerifiedImage) -> Result<PartitionSlot, FlashError> {
        let record = self.records.current()?;
        if record.is_pending() {
            return Err(FlashError::PendingConfirmation {
                active: record.active_slot,
                inactive: record.inactive_slot(),
            });
        }

        let slot = record.inactive_slot();
        let region = Region::Slot(slot);
        info!(
            slot = %slot,
            version = %image.version(),
            bytes = image.len(),
            "Writing firmware to inactive slot"
        );

        self.flash.critical_section(|device| {
            let capacity = device.capacity(region);
            if image.len() > capacity {
                return Err(FlashError::ImageTooLarge {
                    size: image.len(),
                    capacity,
                });
            }

            device
                .erase(region)
                .map_err(|source| FlashError::Erase { region, source })?;

            let mut offset = 0u64;
            for chunk in image.data().chunks(self.write_chunk) {
                device
                    .write(region, offset, chunk)
                    .map_err(|source| FlashError::Write {
                        region,
                        offset,
                        source,
                    })?;
                offset = offset.saturating_add(chunk.len() as u64);
            }

            let written = readback_digest(device, region, image.len(), self.write_chunk)?;
            if !written.ct_eq(&image.digest()) {
                warn!(slot = %slot, "Slot read-back does not match the verified image");
                return Err(FlashError::ReadbackMismatch { slot });
            }
            Ok(())
        })?;

        info!(slot = %slot, digest = %image.digest(), "Firmware written and read back");
        Ok(slot)
    }

    /// Make `target` the active slot holding `version`
    ///
    /// One record commit: the switch either happens entirely or not at all.
    /// The new image starts unconfirmed with a zero boot count.
    pub fn commit_switch(
        &self,
        target: PartitionSlot,
        version: FirmwareVersion,
    ) -> Result<PersistentUpdateRecord, FlashError> {
        let max_boot_attempts = self.max_boot_attempts;
        let record = self.records.update(|record| {
            if record.active_slot == target {
                return Err(FlashError::TargetIsActive(target));
            }
            if record.is_pending() {
                return Err(FlashError::PendingConfirmation {
                    active: record.active_slot,
                    inactive: record.inactive_slot(),
                });
            }
            record.active_slot = target;
            record.active_version = version;
            record.confirmed = false;
            record.boot_attempt_count = 0;
            record.max_boot_attempts = max_boot_attempts;
            Ok(())
        })?;

        info!(slot = %target, version = %version, "Switched active slot");
        Ok(record)
    }

    /// Return to the slot holding the last known-good image
    ///
    /// The abandoned version is remembered so the same release is not
    /// installed again.
    pub fn rollback_switch(&self) -> Result<PersistentUpdateRecord, FlashError> {
        let record = self.records.update(|record| {
            record.rejected_version = Some(record.active_version);
            record.active_slot = record.inactive_slot();
            record.active_version = record.last_known_good;
            record.confirmed = true;
            record.boot_attempt_count = 0;
            Ok::<(), FlashError>(())
        })?;

        warn!(
            slot = %record.active_slot,
            version = %record.active_version,
            "Rolled back to last known-good slot"
        );
        Ok(record)
    }
}

fn readback_digest<D: FlashDevice>(
    device: &D,
    region: Region,
    len: u64,
    chunk: usize,
) -> Result<Sha256Digest, FlashError> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk];
    let mut offset = 0u64;

    while offset < len {
        let take = usize::try_from(len.saturating_sub(offset))
            .unwrap_or(chunk)
            .min(chunk);
        let part = buf.get_mut(..take).unwrap_or_default();
        device
            .read(region, offset, part)
            .map_err(|source| FlashError::Read { region, source })?;
        hasher.update(&*part);
        offset = offset.saturating_add(take as u64);
    }

    Ok(Sha256Digest::from_bytes(hasher.finalize().into()))
}
