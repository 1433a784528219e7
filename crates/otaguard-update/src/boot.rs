//! Boot bookkeeping
//!
//! [`boot_sequence`] is the first thing run on every boot: it counts the boot
//! in the persistent record, then lets the [`RollbackController`] decide
//! whether the active image may keep running.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::OtaConfig;
use crate::error::{OtaError, StorageError};
use crate::flash::{FlashDevice, SharedFlash};
use crate::partition::PartitionSlot;
use crate::record::{PersistentUpdateRecord, RecordStore};
use crate::rollback::{BootDecision, RollbackController};
use crate::version::FirmwareVersion;

/// Why a reboot is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebootReason {
    /// A new image was written and switched to
    UpdateInstalled {
        /// Newly active slot
        slot: PartitionSlot,
        /// Newly active version
        version: FirmwareVersion,
    },
    /// The failing image was abandoned
    RolledBack {
        /// Restored slot
        slot: PartitionSlot,
        /// Restored version
        version: FirmwareVersion,
    },
}

impl std::fmt::Display for RebootReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebootReason::UpdateInstalled { slot, version } => {
                write!(f, "update {} installed in slot {}", version, slot)
            }
            RebootReason::RolledBack { slot, version } => {
                write!(f, "rolled back to {} in slot {}", version, slot)
            }
        }
    }
}

/// Device control seam
pub trait SystemControl: Send + Sync {
    /// Ask the platform to restart the device
    fn request_reboot(&self, reason: RebootReason);
}

/// Tracks boot attempts and confirms successful boots
#[derive(Debug, Clone)]
pub struct BootManager<D> {
    records: RecordStore<D>,
    config: OtaConfig,
}

impl<D: FlashDevice> BootManager<D> {
    /// Create a boot manager over the shared flash
    pub fn new(flash: SharedFlash<D>, config: &OtaConfig) -> Self {
        Self {
            records: RecordStore::new(flash),
            config: config.clone(),
        }
    }

    /// Count this boot
    ///
    /// Creates the record with factory defaults on first boot. The increment
    /// is persisted before this returns.
    pub fn on_boot(&self) -> Result<PersistentUpdateRecord, StorageError> {
        self.records.load_or_init(&self.config)?;
        let record = self.records.update(|record| {
            record.boot_attempt_count = record.boot_attempt_count.saturating_add(1);
            Ok::<(), StorageError>(())
        })?;

        info!(
            slot = %record.active_slot,
            version = %record.active_version,
            attempt = record.boot_attempt_count,
            confirmed = record.confirmed,
            "Boot counted"
        );
        Ok(record)
    }

    /// Mark the running image as good
    ///
    /// Resets the boot count and records the active version as last
    /// known-good. Writes nothing when already confirmed.
    pub fn confirm_boot_success(&self) -> Result<PersistentUpdateRecord, StorageError> {
        let current = self.records.current()?;
        if current.confirmed
            && current.boot_attempt_count == 0
            && current.last_known_good == current.active_version
        {
            debug!("Boot already confirmed");
            return Ok(current);
        }

        let record = self.records.update(|record| {
            record.boot_attempt_count = 0;
            record.last_known_good = record.active_version;
            record.confirmed = true;
            Ok::<(), StorageError>(())
        })?;

        info!(
            slot = %record.active_slot,
            version = %record.active_version,
            "Boot confirmed"
        );
        Ok(record)
    }

    /// Current persistent record
    pub fn record(&self) -> Result<PersistentUpdateRecord, StorageError> {
        self.records.current()
    }
}

/// Result of the boot sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootReport {
    /// Record after counting this boot
    pub record: PersistentUpdateRecord,
    /// Rollback decision
    pub decision: BootDecision,
}

impl BootReport {
    /// Whether the active image may start application logic
    pub fn may_continue(&self) -> bool {
        !matches!(self.decision, BootDecision::RolledBack { .. })
    }
}

/// Count the boot and run the rollback check
///
/// Runs regardless of the auto-update toggle.
pub fn boot_sequence<D: FlashDevice>(
    boot: &BootManager<D>,
    rollback: &RollbackController<D>,
    system: &dyn SystemControl,
) -> Result<BootReport, OtaError> {
    let record = boot.on_boot()?;
    let decision = rollback.check_at_boot(&record, system)?;
    Ok(BootReport { record, decision })
}
