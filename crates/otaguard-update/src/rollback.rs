//! Boot-time rollback
//!
//! Runs before any application logic and needs no network access. It only
//! acts on an image that was switched to and never confirmed.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::boot::{RebootReason, SystemControl};
use crate::config::OtaConfig;
use crate::error::{BootFailure, FlashError};
use crate::flash::{FlashDevice, FlashWriter};
use crate::record::PersistentUpdateRecord;

/// Outcome of the boot-time rollback check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootDecision {
    /// Keep running the active image
    Continue,
    /// Active slot reverted; a reboot has been requested
    RolledBack {
        /// Failure that triggered the revert
        failed: BootFailure,
        /// Record after the revert
        restored: PersistentUpdateRecord,
    },
    /// The image failed but rollback is disabled
    FailureIgnored(BootFailure),
}

/// Detects repeated boot failure and reverts to the last known-good slot
#[derive(Debug, Clone)]
pub struct RollbackController<D> {
    writer: FlashWriter<D>,
    enabled: bool,
}

impl<D: FlashDevice> RollbackController<D> {
    /// Create a controller using `writer`'s switch primitive
    pub fn new(writer: FlashWriter<D>, config: &OtaConfig) -> Self {
        Self {
            writer,
            enabled: config.rollback,
        }
    }

    /// Whether rollback is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Boot failure described by `record`, if any
    pub fn evaluate(record: &PersistentUpdateRecord) -> Option<BootFailure> {
        (record.is_pending() && record.boot_attempt_count > record.max_boot_attempts).then(|| {
            BootFailure {
                slot: record.active_slot,
                version: record.active_version,
                attempts: record.boot_attempt_count,
                max_attempts: record.max_boot_attempts,
            }
        })
    }

    /// Check the record read at boot and roll back if the image is unbootable
    pub fn check_at_boot(
        &self,
        record: &PersistentUpdateRecord,
        system: &dyn SystemControl,
    ) -> Result<BootDecision, FlashError> {
        let Some(failure) = Self::evaluate(record) else {
            if record.confirmed && record.boot_attempt_count > record.max_boot_attempts {
                warn!(
                    attempts = record.boot_attempt_count,
                    version = %record.active_version,
                    "Confirmed image has an elevated boot count, not rolling back"
                );
            }
            return Ok(BootDecision::Continue);
        };

        if !self.enabled {
            error!(%failure, "Rollback disabled, keeping failing image");
            return Ok(BootDecision::FailureIgnored(failure));
        }

        error!(%failure, "Rolling back");
        let restored = self.writer.rollback_switch()?;
        info!(
            slot = %restored.active_slot,
            version = %restored.active_version,
            "Requesting reboot into last known-good image"
        );
        system.request_reboot(RebootReason::RolledBack {
            slot: restored.active_slot,
            version: restored.active_version,
        });

        Ok(BootDecision::RolledBack {
            failed: failure,
            restored,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlashLayout;
    use crate::flash::{MemoryFlash, SharedFlash};
    use crate::partition::PartitionSlot;
    use crate::version::FirmwareVersion;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSystem {
        reboots: Mutex<Vec<RebootReason>>,
    }

    impl SystemControl for RecordingSystem {
        fn request_reboot(&self, reason: RebootReason) {
            self.reboots.lock().push(reason);
        }
    }

    fn pending_record() -> PersistentUpdateRecord {
        PersistentUpdateRecord {
            active_slot: PartitionSlot::B,
            last_known_good: FirmwareVersion::new(1, 0, 0),
            active_version: FirmwareVersion::new(1, 1, 0),
            confirmed: false,
            boot_attempt_count: 3,
            max_boot_attempts: 2,
            sequence: 4,
            rejected_version: None,
        }
    }

    fn controller(
        config: &OtaConfig,
    ) -> Result<RollbackController<MemoryFlash>, crate::error::StorageError> {
        let flash = SharedFlash::new(MemoryFlash::new(64, 64));
        let writer = FlashWriter::new(flash, config);
        writer.records().load_or_init(config)?;
        Ok(RollbackController::new(writer, config))
    }

    fn config() -> OtaConfig {
        OtaConfig::default()
            .with_max_boot_attempts(2)
            .with_flash_layout(FlashLayout {
                slot_size: 64,
                record_sector_size: 64,
                write_chunk: 16,
            })
    }

    #[test]
    fn test_evaluate_threshold() {
        let mut record = pending_record();
        record.boot_attempt_count = 2;
        assert_eq!(RollbackController::<MemoryFlash>::evaluate(&record), None);

        record.boot_attempt_count = 3;
        let failure = RollbackController::<MemoryFlash>::evaluate(&record);
        assert_eq!(failure.map(|f| f.attempts), Some(3));

        record.confirmed = true;
        assert_eq!(RollbackController::<MemoryFlash>::evaluate(&record), None);
    }

    #[test]
    fn test_healthy_record_continues() -> Result<(), Box<dyn std::error::Error>> {
        let controller = controller(&config())?;
        let system = RecordingSystem::default();
        let mut record = pending_record();
        record.boot_attempt_count = 1;

        assert_eq!(controller.check_at_boot(&record, &system)?, BootDecision::Continue);
        assert!(system.reboots.lock().is_empty());
        Ok(())
    }

    #[test]
    fn test_disabled_rollback_only_reports() -> Result<(), Box<dyn std::error::Error>> {
        let controller = controller(&config().with_rollback(false))?;
        let system = RecordingSystem::default();

        let decision = controller.check_at_boot(&pending_record(), &system)?;
        assert!(matches!(decision, BootDecision::FailureIgnored(_)));
        assert!(system.reboots.lock().is_empty());
        Ok(())
    }
}
