//! Host simulation of the device: file-backed flash and a reboot latch

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use otaguard_update::prelude::*;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::AgentError;

/// Records reboot requests instead of restarting the host
#[derive(Debug, Default)]
pub struct HostSystem {
    pending: Mutex<Option<RebootReason>>,
}

impl HostSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the pending reboot request, if any
    pub fn take_reboot(&self) -> Option<RebootReason> {
        self.pending.lock().take()
    }
}

impl SystemControl for HostSystem {
    fn request_reboot(&self, reason: RebootReason) {
        warn!(%reason, "Reboot requested");
        *self.pending.lock() = Some(reason);
    }
}

/// The simulated device the agent drives
pub struct HostDevice {
    pub config: OtaConfig,
    pub flash: SharedFlash<FileFlash>,
    pub system: Arc<HostSystem>,
}

impl HostDevice {
    pub fn open(config: OtaConfig, flash_dir: &Path) -> Result<Self> {
        let device = FileFlash::open(flash_dir, &config.flash)
            .map_err(|e| AgentError::FlashUnavailable(e.to_string()))?;
        info!(dir = %flash_dir.display(), "Flash opened");
        Ok(Self {
            config,
            flash: SharedFlash::new(device),
            system: HostSystem::new(),
        })
    }

    pub fn boot_manager(&self) -> BootManager<FileFlash> {
        BootManager::new(self.flash.clone(), &self.config)
    }

    /// Count a boot and run the rollback check
    pub fn boot(&self) -> Result<BootReport, OtaError> {
        let rollback = RollbackController::new(
            FlashWriter::new(self.flash.clone(), &self.config),
            &self.config,
        );
        boot_sequence(&self.boot_manager(), &rollback, self.system.as_ref())
    }

    /// Boot until the active image may run, following rollback reboots
    pub fn boot_until_stable(&self) -> Result<BootReport, OtaError> {
        loop {
            let report = self.boot()?;
            if report.may_continue() {
                return Ok(report);
            }
            if let Some(reason) = self.system.take_reboot() {
                info!(%reason, "Simulating restart");
            }
        }
    }

    pub fn scheduler(&self) -> Result<UpdateScheduler<FileFlash>> {
        let scheduler = UpdateScheduler::new(
            &self.config,
            self.flash.clone(),
            Arc::new(ReleaseClient::new(&self.config)?),
            Arc::new(Downloader::new(&self.config)?),
            self.system.clone(),
        )?;
        Ok(scheduler)
    }

    /// Current persistent record
    pub fn record(&self) -> Result<PersistentUpdateRecord> {
        match RecordStore::new(self.flash.clone()).current() {
            Ok(record) => Ok(record),
            Err(StorageError::NoValidRecord) => Err(AgentError::NoRecord.into()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otaguard_update::{FirmwareVersion, FlashLayout, ReleaseSourceConfig};
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn config() -> OtaConfig {
        OtaConfig::new(
            ReleaseSourceConfig::new("acme", "sensor-firmware"),
            FirmwareVersion::new(1, 0, 0),
        )
        .with_max_boot_attempts(1)
        .with_flash_layout(FlashLayout {
            slot_size: 1024,
            record_sector_size: 64,
            write_chunk: 256,
        })
    }

    #[test]
    fn record_survives_reopening() -> TestResult {
        let dir = TempDir::new()?;
        {
            let device = HostDevice::open(config(), dir.path())?;
            assert!(device.record().is_err());
            device.boot()?;
            device.boot_manager().confirm_boot_success()?;
        }

        let reopened = HostDevice::open(config(), dir.path())?;
        let record = reopened.record()?;
        assert!(record.confirmed);
        assert_eq!(record.boot_attempt_count, 0);
        assert_eq!(record.active_slot, PartitionSlot::A);
        Ok(())
    }

    #[test]
    fn boot_until_stable_follows_rollback() -> TestResult {
        let dir = TempDir::new()?;
        let device = HostDevice::open(config(), dir.path())?;
        device.boot()?;

        let writer = FlashWriter::new(device.flash.clone(), &device.config);
        writer.commit_switch(PartitionSlot::B, FirmwareVersion::new(1, 1, 0))?;
        device.boot()?;

        let report = device.boot_until_stable()?;
        assert!(report.may_continue());
        assert_eq!(report.record.active_slot, PartitionSlot::A);
        assert!(device.system.take_reboot().is_none());
        Ok(())
    }

    #[test]
    fn reboot_latch_is_taken_once() {
        let system = HostSystem::default();
        system.request_reboot(RebootReason::RolledBack {
            slot: PartitionSlot::A,
            version: FirmwareVersion::new(1, 0, 0),
        });
        assert!(system.take_reboot().is_some());
        assert!(system.take_reboot().is_none());
    }
}
