//! Self-updating firmware core
//!
//! This crate keeps a network-connected device up to date without ever
//! leaving it unbootable:
//! - Periodic release checks against a remote release source
//! - Bounded, timed-out asset downloads
//! - SHA-256 and optional Ed25519 verification before anything is written
//! - A/B partitions: only the inactive slot is ever erased
//! - Power-loss safe slot switching through a dual-copy persistent record
//! - Boot counting and automatic rollback of images that never confirm
//!
//! # Architecture
//!
//! - [`version`]: firmware version parsing and ordering
//! - [`release`]: release source client
//! - [`download`]: asset downloader
//! - [`verify`]: image verification
//! - [`flash`]: flash arena, devices and the partition writer
//! - [`record`]: persistent update record
//! - [`boot`]: boot counting and confirmation
//! - [`rollback`]: boot-time rollback
//! - [`timer`]: cancellable update timer
//! - [`scheduler`]: update state machine
//! - [`config`]: agent configuration
//! - [`error`]: error types
//!
//! # Safety
//!
//! The flash writer only accepts a [`verify::VerifiedImage`], which only the
//! [`verify::ImageVerifier`] can produce. The previous image is kept until the
//! new one has been confirmed.
//!
//! # Example
//!
//! ```ignore
//! use otaguard_update::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(system: Arc<dyn SystemControl>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = OtaConfig::new(
//!     ReleaseSourceConfig::new("acme", "sensor-firmware"),
//!     FirmwareVersion::new(1, 0, 0),
//! );
//! let flash = SharedFlash::new(FileFlash::open("/var/lib/otaguard", &config.flash)?);
//!
//! let writer = FlashWriter::new(flash.clone(), &config);
//! let boot = BootManager::new(flash.clone(), &config);
//! let rollback = RollbackController::new(writer, &config);
//! let report = boot_sequence(&boot, &rollback, system.as_ref())?;
//!
//! if report.may_continue() {
//!     let scheduler = UpdateScheduler::new(
//!         &config,
//!         flash,
//!         Arc::new(ReleaseClient::new(&config)?),
//!         Arc::new(Downloader::new(&config)?),
//!         system,
//!     )?;
//!     let (timer, _handle) = UpdateTimer::new(config.check_interval);
//!     scheduler.run(timer).await;
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod boot;
pub mod config;
pub mod download;
pub mod error;
pub mod flash;
pub mod partition;
pub mod prelude;
pub mod record;
pub mod release;
pub mod rollback;
pub mod scheduler;
pub mod timer;
pub mod verify;
pub mod version;

pub use boot::{BootManager, BootReport, RebootReason, SystemControl, boot_sequence};
pub use config::{FlashLayout, OtaConfig, ReleaseSourceConfig};
pub use download::{AssetFetcher, AssetSink, Downloader, ImageBuffer};
pub use error::{
    ApiError, BootFailure, ConfigError, DownloadError, FlashDeviceError, FlashError, OtaError,
    StorageError, VerificationError, VersionError,
};
pub use flash::{FileFlash, FlashDevice, FlashOp, FlashWriter, MemoryFlash, SharedFlash};
pub use partition::{PartitionSlot, RecordCopy, Region, SlotStatus};
pub use record::{PersistentUpdateRecord, RecordState, RecordStore};
pub use release::{ReleaseClient, ReleaseMetadata, ReleaseSource, parse_release};
pub use rollback::{BootDecision, RollbackController};
pub use scheduler::{
    CycleGuard, CycleOutcome, RunExit, SkipReason, StateTransition, TransitionReason,
    UpdateScheduler, UpdateState, next_state,
};
pub use timer::{TimerHandle, Tick, UpdateTimer};
pub use verify::{ExpectedImage, ImageVerifier, Sha256Digest, VerifiedImage};
pub use version::{FirmwareVersion, compare, is_newer};
