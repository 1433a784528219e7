//! Shared fixtures for update integration tests

#![allow(dead_code, reason = "each test binary uses a subset of the fixtures")]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use otaguard_update::prelude::*;
use otaguard_update::{AssetSink, Sha256Digest};
use parking_lot::Mutex;

pub const SLOT_SIZE: usize = 4096;
pub const RECORD_SECTOR_SIZE: usize = 64;

/// Configuration sized for the in-memory device
pub fn test_config() -> OtaConfig {
    OtaConfig::new(
        ReleaseSourceConfig::new("acme", "sensor-firmware"),
        FirmwareVersion::new(1, 0, 0),
    )
    .with_retry_backoff(Duration::from_secs(2))
    .with_flash_layout(FlashLayout {
        slot_size: SLOT_SIZE as u64,
        record_sector_size: RECORD_SECTOR_SIZE as u64,
        write_chunk: 512,
    })
}

pub fn memory_flash() -> SharedFlash<MemoryFlash> {
    SharedFlash::new(MemoryFlash::new(SLOT_SIZE, RECORD_SECTOR_SIZE))
}

/// Firmware image with a recognizable pattern
pub fn firmware_image(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_add((i % 251) as u8))
        .collect()
}

/// Release metadata publishing `image` as `version`
pub fn release_for(version: FirmwareVersion, image: &[u8]) -> ReleaseMetadata {
    ReleaseMetadata {
        version,
        tag: format!("v{}", version),
        asset_name: "firmware.bin".to_string(),
        asset_location: "https://example.invalid/firmware.bin".to_string(),
        asset_size: image.len() as u64,
        checksum: Some(Sha256Digest::compute(image)),
        signature: None,
    }
}

/// Release source returning scripted answers
pub struct ScriptedRelease {
    release: Mutex<Option<ReleaseMetadata>>,
    delay: Duration,
    calls: AtomicU32,
}

impl ScriptedRelease {
    pub fn publishing(release: ReleaseMetadata) -> Arc<Self> {
        Arc::new(Self {
            release: Mutex::new(Some(release)),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            release: Mutex::new(None),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        })
    }

    pub fn slow(release: ReleaseMetadata, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            release: Mutex::new(Some(release)),
            delay,
            calls: AtomicU32::new(0),
        })
    }

    pub fn publish(&self, release: ReleaseMetadata) {
        *self.release.lock() = Some(release);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseSource for ScriptedRelease {
    async fn fetch_latest_release(&self) -> Result<ReleaseMetadata, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.release
            .lock()
            .clone()
            .ok_or(ApiError::Status { status: 503 })
    }
}

/// What the scripted fetcher does on one attempt
#[derive(Debug, Clone)]
pub enum FetchStep {
    Serve(Vec<u8>),
    TimeOut,
    Refuse,
}

/// Asset fetcher replaying a script; the last step repeats
pub struct ScriptedFetcher {
    steps: Mutex<VecDeque<FetchStep>>,
    last: Mutex<Option<FetchStep>>,
    calls: AtomicU32,
}

impl ScriptedFetcher {
    pub fn new(steps: impl IntoIterator<Item = FetchStep>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        })
    }

    pub fn serving(image: Vec<u8>) -> Arc<Self> {
        Self::new([FetchStep::Serve(image)])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Option<FetchStep> {
        let next = self.steps.lock().pop_front();
        match next {
            Some(step) => {
                *self.last.lock() = Some(step.clone());
                Some(step)
            }
            None => self.last.lock().clone(),
        }
    }
}

#[async_trait]
impl AssetFetcher for ScriptedFetcher {
    async fn fetch_asset(
        &self,
        _location: &str,
        expected_size: u64,
        sink: &mut dyn AssetSink,
    ) -> Result<u64, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sink.reset();
        match self.next_step() {
            Some(FetchStep::Serve(image)) => {
                sink.write_chunk(&image)?;
                let received = sink.received();
                if expected_size > 0 && received != expected_size {
                    return Err(DownloadError::SizeMismatch {
                        expected: expected_size,
                        actual: received,
                    });
                }
                Ok(received)
            }
            Some(FetchStep::TimeOut) => Err(DownloadError::Timeout {
                timeout: Duration::from_secs(10),
            }),
            Some(FetchStep::Refuse) | None => {
                Err(DownloadError::Connection("connection refused".to_string()))
            }
        }
    }
}

/// System seam recording reboot requests
#[derive(Default)]
pub struct RecordingSystem {
    reboots: Mutex<Vec<RebootReason>>,
}

impl RecordingSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reboots(&self) -> Vec<RebootReason> {
        self.reboots.lock().clone()
    }
}

impl SystemControl for RecordingSystem {
    fn request_reboot(&self, reason: RebootReason) {
        self.reboots.lock().push(reason);
    }
}

/// A simulated device: flash plus the boot-time components
pub struct TestDevice {
    pub config: OtaConfig,
    pub flash: SharedFlash<MemoryFlash>,
    pub system: Arc<RecordingSystem>,
}

impl TestDevice {
    pub fn new(config: OtaConfig) -> Self {
        Self {
            config,
            flash: memory_flash(),
            system: RecordingSystem::new(),
        }
    }

    pub fn boot_manager(&self) -> BootManager<MemoryFlash> {
        BootManager::new(self.flash.clone(), &self.config)
    }

    pub fn rollback_controller(&self) -> RollbackController<MemoryFlash> {
        RollbackController::new(FlashWriter::new(self.flash.clone(), &self.config), &self.config)
    }

    /// Power-on: count the boot and run the rollback check
    pub fn boot(&self) -> Result<BootReport, OtaError> {
        boot_sequence(
            &self.boot_manager(),
            &self.rollback_controller(),
            self.system.as_ref(),
        )
    }

    pub fn scheduler(
        &self,
        release: Arc<dyn ReleaseSource>,
        fetcher: Arc<dyn AssetFetcher>,
    ) -> Result<UpdateScheduler<MemoryFlash>, ConfigError> {
        UpdateScheduler::new(
            &self.config,
            self.flash.clone(),
            release,
            fetcher,
            self.system.clone(),
        )
    }

    pub fn record(&self) -> Result<PersistentUpdateRecord, StorageError> {
        RecordStore::new(self.flash.clone()).current()
    }

    pub fn slot_contents(&self, slot: PartitionSlot) -> Vec<u8> {
        self.flash
            .critical_section(|dev| dev.contents(otaguard_update::Region::Slot(slot)).to_vec())
    }

    pub fn slot_touched(&self, slot: PartitionSlot) -> bool {
        self.flash
            .critical_section(|dev| dev.touched(otaguard_update::Region::Slot(slot)))
    }

    pub fn clear_ops(&self) {
        self.flash.critical_section(|dev| dev.clear_ops());
    }
}

/// States visited by a run of transitions, starting with the first `from`
pub fn visited(history: &[StateTransition]) -> Vec<UpdateState> {
    let mut states: Vec<UpdateState> = history.first().map(|t| t.from).into_iter().collect();
    states.extend(history.iter().map(|t| t.to));
    states
}
