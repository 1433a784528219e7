//! Error types for OTA update operations
//!
//! Each component reports its own error family. [`OtaError`] wraps all of them
//! for callers that drive a whole cycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::partition::{PartitionSlot, Region};
use crate::version::FirmwareVersion;

/// Errors raised while querying the release source
#[derive(Error, Debug)]
pub enum ApiError {
    /// Request could not be sent or the connection failed
    #[error("Release request failed: {0}")]
    Transport(String),

    /// Release endpoint answered with a non-success status
    #[error("Release endpoint returned status {status}")]
    Status {
        /// HTTP status code
        status: u16,
    },

    /// Response body is not the expected JSON document
    #[error("Malformed release response: {0}")]
    Malformed(String),

    /// A required field is absent
    #[error("Release is missing required field: {0}")]
    MissingField(&'static str),

    /// The release tag is not a usable firmware version
    #[error("Invalid version tag '{tag}': {source}")]
    InvalidVersion {
        /// Raw tag as published
        tag: String,
        /// Parse failure
        #[source]
        source: VersionError,
    },

    /// Published checksum or signature could not be decoded
    #[error("Invalid integrity data: {0}")]
    InvalidIntegrityData(String),
}

/// Errors raised by a single download attempt
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Attempt exceeded the connection timeout
    #[error("Download timed out after {timeout:?}")]
    Timeout {
        /// Configured bound for one attempt
        timeout: Duration,
    },

    /// Connection or transfer failure
    #[error("Download connection failed: {0}")]
    Connection(String),

    /// Asset endpoint answered with a non-success status
    #[error("Asset endpoint returned status {status}")]
    Status {
        /// HTTP status code
        status: u16,
    },

    /// Received byte count differs from the published asset size
    #[error("Download size mismatch: expected {expected} bytes, received {actual}")]
    SizeMismatch {
        /// Size announced by the release metadata
        expected: u64,
        /// Bytes actually received
        actual: u64,
    },

    /// Asset does not fit into a partition slot
    #[error("Asset exceeds slot capacity of {limit} bytes")]
    TooLarge {
        /// Slot capacity
        limit: u64,
    },
}

/// Errors raised while verifying a downloaded image
#[derive(Error, Debug)]
pub enum VerificationError {
    /// Image is empty
    #[error("Image is empty")]
    Empty,

    /// Image size differs from the release metadata
    #[error("Image size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Size announced by the release metadata
        expected: u64,
        /// Size of the received image
        actual: u64,
    },

    /// No checksum was published but one is required
    #[error("No checksum available for image")]
    MissingChecksum,

    /// Recomputed digest differs from the published one
    #[error("Checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Published digest (hex)
        expected: String,
        /// Recomputed digest (hex)
        actual: String,
    },

    /// A signing key is configured but the release carries no signature
    #[error("Image signature required but missing")]
    MissingSignature,

    /// Signature does not verify against the configured key
    #[error("Image signature invalid: {0}")]
    InvalidSignature(String),
}

/// Low-level failure reported by a flash device
#[derive(Error, Debug)]
pub enum FlashDeviceError {
    /// Access falls outside the region
    #[error("Access out of bounds in {region}: offset {offset}, length {len}")]
    OutOfBounds {
        /// Region accessed
        region: Region,
        /// Start offset
        offset: u64,
        /// Access length
        len: u64,
    },

    /// Backing store I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hardware fault (erase/program failure, power loss)
    #[error("Device fault: {0}")]
    Fault(String),
}

/// Errors raised while reading or committing the persistent update record
#[derive(Error, Debug)]
pub enum StorageError {
    /// Device access failed
    #[error("Record region access failed: {0}")]
    Device(#[from] FlashDeviceError),

    /// Neither record copy holds a valid record
    #[error("No valid update record found")]
    NoValidRecord,

    /// Record read back after commit does not match what was written
    #[error("Record commit verification failed")]
    CommitVerification,
}

/// Errors raised while writing partitions or switching slots
#[derive(Error, Debug)]
pub enum FlashError {
    /// The active image has not been confirmed; the inactive slot holds the last known-good image
    #[error("Active slot {active} awaits boot confirmation; slot {inactive} is protected")]
    PendingConfirmation {
        /// Currently active slot
        active: PartitionSlot,
        /// Slot holding the last known-good image
        inactive: PartitionSlot,
    },

    /// Image larger than the partition slot
    #[error("Image of {size} bytes exceeds slot capacity of {capacity} bytes")]
    ImageTooLarge {
        /// Image size
        size: u64,
        /// Slot capacity
        capacity: u64,
    },

    /// Erase failed
    #[error("Erase of {region} failed: {source}")]
    Erase {
        /// Region being erased
        region: Region,
        /// Device failure
        #[source]
        source: FlashDeviceError,
    },

    /// Programming failed
    #[error("Write to {region} at offset {offset} failed: {source}")]
    Write {
        /// Region being written
        region: Region,
        /// Offset of the failed chunk
        offset: u64,
        /// Device failure
        #[source]
        source: FlashDeviceError,
    },

    /// Read-back failed
    #[error("Read of {region} failed: {source}")]
    Read {
        /// Region being read
        region: Region,
        /// Device failure
        #[source]
        source: FlashDeviceError,
    },

    /// Slot contents do not hash to the verified digest after writing
    #[error("Read-back of slot {slot} does not match the verified image")]
    ReadbackMismatch {
        /// Slot written
        slot: PartitionSlot,
    },

    /// Switch target is already the active slot
    #[error("Slot {0} is already active")]
    TargetIsActive(PartitionSlot),

    /// Record update failed
    #[error("Record update failed: {0}")]
    Record(#[from] StorageError),
}

/// Repeated failed boots of a newly switched image
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error(
    "Image {version} in slot {slot} failed to confirm after {attempts} boots (limit {max_attempts})"
)]
pub struct BootFailure {
    /// Slot holding the failing image
    pub slot: PartitionSlot,
    /// Version of the failing image
    pub version: FirmwareVersion,
    /// Boot attempts counted since the switch
    pub attempts: u32,
    /// Configured limit
    pub max_attempts: u32,
}

/// Errors raised while parsing a firmware version
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// Input is empty
    #[error("Version string is empty")]
    Empty,

    /// A component is not a number
    #[error("Invalid version component '{0}'")]
    InvalidComponent(String),

    /// More than three numeric components
    #[error("Too many version components")]
    TooManyComponents,

    /// Component does not fit the one-byte persisted field
    #[error("Version component {0} exceeds 255")]
    OutOfRange(u64),
}

/// Invalid configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A value violates its constraints
    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Constraint description
        reason: String,
    },

    /// HTTP client could not be constructed
    #[error("HTTP client setup failed: {0}")]
    HttpClient(String),
}

/// Any failure of the update core
#[derive(Error, Debug)]
pub enum OtaError {
    /// Release query failed
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Download failed
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Verification failed
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// Flash write or switch failed
    #[error(transparent)]
    Flash(#[from] FlashError),

    /// Record storage failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Image failed to boot
    #[error(transparent)]
    Boot(#[from] BootFailure),

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),
}
