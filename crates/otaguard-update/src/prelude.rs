//! Convenience re-exports for common update types

pub use crate::boot::{BootManager, BootReport, RebootReason, SystemControl, boot_sequence};
pub use crate::config::{FlashLayout, OtaConfig, ReleaseSourceConfig};
pub use crate::download::{AssetFetcher, AssetSink, Downloader, ImageBuffer};
pub use crate::error::{
    ApiError, BootFailure, ConfigError, DownloadError, FlashError, OtaError, StorageError,
    VerificationError,
};
pub use crate::flash::{FileFlash, FlashDevice, FlashWriter, MemoryFlash, SharedFlash};
pub use crate::partition::{PartitionSlot, SlotStatus};
pub use crate::record::{PersistentUpdateRecord, RecordStore};
pub use crate::release::{ReleaseClient, ReleaseMetadata, ReleaseSource};
pub use crate::rollback::{BootDecision, RollbackController};
pub use crate::scheduler::{CycleOutcome, StateTransition, UpdateScheduler, UpdateState};
pub use crate::timer::{TimerHandle, UpdateTimer};
pub use crate::verify::{ImageVerifier, VerifiedImage};
pub use crate::version::FirmwareVersion;
