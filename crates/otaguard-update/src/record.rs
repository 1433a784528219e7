//! Persistent update record
//!
//! The record is the single source of truth for which slot is active. It is
//! stored twice, one copy per record sector, and written with a
//! write-then-commit sequence:
//!
//! 1. the new record gets `sequence + 1` and is written into the copy that
//!    does NOT hold the current record
//! 2. the written copy is read back and validated
//!
//! On load the valid copy with the newer sequence wins. A write torn by power
//! loss fails its CRC, so the previous copy stays authoritative.
//!
//! # Layout (little endian)
//!
//! | offset | size | field |
//! |-------:|-----:|-------|
//! | 0 | 4 | magic `OTAR` |
//! | 4 | 1 | layout version |
//! | 5 | 1 | active slot |
//! | 6 | 3 | last known-good version |
//! | 9 | 3 | active version |
//! | 12 | 1 | confirmed |
//! | 13 | 3 | rejected version (zero when none) |
//! | 16 | 4 | boot attempt count |
//! | 20 | 4 | max boot attempts |
//! | 24 | 4 | sequence |
//! | 28 | 4 | CRC-32 over bytes 0..28 |

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::OtaConfig;
use crate::error::StorageError;
use crate::flash::{ERASED_BYTE, FlashDevice, SharedFlash};
use crate::partition::{PartitionSlot, RecordCopy, Region, SlotStatus};
use crate::version::{FirmwareVersion, is_newer};

/// Encoded record size in bytes
pub const RECORD_LEN: usize = 32;

const MAGIC: [u8; 4] = *b"OTAR";
const LAYOUT_VERSION: u8 = 1;

/// Durable update state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentUpdateRecord {
    /// Slot the device boots from
    pub active_slot: PartitionSlot,

    /// Last version confirmed to boot
    pub last_known_good: FirmwareVersion,

    /// Version written to the active slot
    pub active_version: FirmwareVersion,

    /// Whether the active image has been confirmed
    pub confirmed: bool,

    /// Boots since the last switch or confirmation
    pub boot_attempt_count: u32,

    /// Unconfirmed boots tolerated before rollback
    pub max_boot_attempts: u32,

    /// Commit sequence number
    pub sequence: u32,

    /// Newest version that was rolled back; releases up to it are not reinstalled
    pub rejected_version: Option<FirmwareVersion>,
}

impl PersistentUpdateRecord {
    /// Record written at first boot
    pub fn factory_default(config: &OtaConfig) -> Self {
        Self {
            active_slot: PartitionSlot::A,
            last_known_good: config.current_version,
            active_version: config.current_version,
            confirmed: true,
            boot_attempt_count: 0,
            max_boot_attempts: config.max_boot_attempts,
            sequence: 0,
            rejected_version: None,
        }
    }

    /// Whether `version` was rolled back before and must not be installed again
    pub fn is_rejected(&self, version: &FirmwareVersion) -> bool {
        self.rejected_version
            .is_some_and(|rejected| !is_newer(version, &rejected))
    }

    /// Slot that is not active
    pub fn inactive_slot(&self) -> PartitionSlot {
        self.active_slot.other()
    }

    /// Whether a switched image still awaits confirmation
    pub fn is_pending(&self) -> bool {
        !self.confirmed
    }

    /// Status of both slots, derived from this record
    ///
    /// Exactly one entry reports `active`.
    pub fn slots(&self) -> [SlotStatus; 2] {
        let active = SlotStatus {
            slot: self.active_slot,
            active: true,
            version: Some(self.active_version),
            confirmed: self.confirmed,
        };
        // While pending, the inactive slot still holds the last known-good image
        let inactive = SlotStatus {
            slot: self.inactive_slot(),
            active: false,
            version: self.is_pending().then_some(self.last_known_good),
            confirmed: self.is_pending(),
        };
        match self.active_slot {
            PartitionSlot::A => [active, inactive],
            PartitionSlot::B => [inactive, active],
        }
    }

    /// Encode into the persisted layout
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(RECORD_LEN);
        bytes.extend_from_slice(&MAGIC);
        bytes.push(LAYOUT_VERSION);
        bytes.push(self.active_slot.to_byte());
        bytes.extend_from_slice(&self.last_known_good.to_bytes());
        bytes.extend_from_slice(&self.active_version.to_bytes());
        bytes.push(u8::from(self.confirmed));
        bytes.extend_from_slice(
            &self
                .rejected_version
                .map_or([0u8; 3], FirmwareVersion::to_bytes),
        );
        bytes.extend_from_slice(&self.boot_attempt_count.to_le_bytes());
        bytes.extend_from_slice(&self.max_boot_attempts.to_le_bytes());
        bytes.extend_from_slice(&self.sequence.to_le_bytes());
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Decode one record copy
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.iter().all(|b| *b == ERASED_BYTE) {
            return Err(DecodeError::Blank);
        }
        let (body, crc) = bytes
            .get(..RECORD_LEN)
            .and_then(|record| record.split_last_chunk::<4>())
            .ok_or(DecodeError::Truncated)?;
        if crc32fast::hash(body) != u32::from_le_bytes(*crc) {
            return Err(DecodeError::Crc);
        }

        let (magic, rest) = body.split_first_chunk::<4>().ok_or(DecodeError::Truncated)?;
        if *magic != MAGIC {
            return Err(DecodeError::Magic);
        }
        let (&[layout, slot], rest) = rest.split_first_chunk::<2>().ok_or(DecodeError::Truncated)?;
        if layout != LAYOUT_VERSION {
            return Err(DecodeError::Layout(layout));
        }
        let active_slot = PartitionSlot::from_byte(slot).ok_or(DecodeError::Field("active slot"))?;
        let (last_known_good, rest) = rest.split_first_chunk::<3>().ok_or(DecodeError::Truncated)?;
        let (active_version, rest) = rest.split_first_chunk::<3>().ok_or(DecodeError::Truncated)?;
        let (&[confirmed], rest) = rest.split_first_chunk::<1>().ok_or(DecodeError::Truncated)?;
        let (rejected, rest) = rest.split_first_chunk::<3>().ok_or(DecodeError::Truncated)?;
        let confirmed = match confirmed {
            0 => false,
            1 => true,
            _ => return Err(DecodeError::Field("confirmed")),
        };
        let (count, rest) = rest.split_first_chunk::<4>().ok_or(DecodeError::Truncated)?;
        let (max, rest) = rest.split_first_chunk::<4>().ok_or(DecodeError::Truncated)?;
        let (sequence, _) = rest.split_first_chunk::<4>().ok_or(DecodeError::Truncated)?;

        Ok(Self {
            active_slot,
            last_known_good: FirmwareVersion::from_bytes(*last_known_good),
            active_version: FirmwareVersion::from_bytes(*active_version),
            confirmed,
            boot_attempt_count: u32::from_le_bytes(*count),
            max_boot_attempts: u32::from_le_bytes(*max),
            sequence: u32::from_le_bytes(*sequence),
            rejected_version: (*rejected != [0u8; 3]).then(|| FirmwareVersion::from_bytes(*rejected)),
        })
    }
}

/// Reason a record copy was rejected
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Sector is erased
    #[error("record sector is erased")]
    Blank,
    /// Fewer bytes than one record
    #[error("record is truncated")]
    Truncated,
    /// Integrity check failed
    #[error("record CRC mismatch")]
    Crc,
    /// Wrong magic
    #[error("record magic mismatch")]
    Magic,
    /// Unknown layout version
    #[error("unsupported record layout {0}")]
    Layout(u8),
    /// Field holds an impossible value
    #[error("invalid record field: {0}")]
    Field(&'static str),
}

/// Result of reading both record copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Both copies erased: first boot
    Blank,
    /// Authoritative record and the copy holding it
    Valid(PersistentUpdateRecord, RecordCopy),
    /// Neither copy holds a valid record
    Corrupt,
}

/// Whether sequence `a` was committed after `b`, tolerating wrap-around
pub fn sequence_is_newer(a: u32, b: u32) -> bool {
    let distance = a.wrapping_sub(b);
    distance != 0 && distance < 0x8000_0000
}

fn read_copy<D: FlashDevice>(
    device: &D,
    copy: RecordCopy,
) -> Result<Result<PersistentUpdateRecord, DecodeError>, StorageError> {
    let mut bytes = [0u8; RECORD_LEN];
    device.read(Region::Record(copy), 0, &mut bytes)?;
    Ok(PersistentUpdateRecord::decode(&bytes))
}

fn load_from<D: FlashDevice>(device: &D) -> Result<RecordState, StorageError> {
    let primary = read_copy(device, RecordCopy::Primary)?;
    let secondary = read_copy(device, RecordCopy::Secondary)?;

    let state = match (primary, secondary) {
        (Ok(p), Ok(s)) if sequence_is_newer(s.sequence, p.sequence) => {
            RecordState::Valid(s, RecordCopy::Secondary)
        }
        (Ok(p), Ok(_)) => RecordState::Valid(p, RecordCopy::Primary),
        (Ok(p), Err(reason)) => {
            if reason != DecodeError::Blank {
                warn!(%reason, "Secondary record copy rejected, using primary");
            }
            RecordState::Valid(p, RecordCopy::Primary)
        }
        (Err(reason), Ok(s)) => {
            if reason != DecodeError::Blank {
                warn!(%reason, "Primary record copy rejected, using secondary");
            }
            RecordState::Valid(s, RecordCopy::Secondary)
        }
        (Err(DecodeError::Blank), Err(DecodeError::Blank)) => RecordState::Blank,
        (Err(primary), Err(secondary)) => {
            error!(%primary, %secondary, "No valid update record copy");
            RecordState::Corrupt
        }
    };
    Ok(state)
}

fn commit_to<D: FlashDevice>(
    device: &mut D,
    current: Option<(PersistentUpdateRecord, RecordCopy)>,
    mut record: PersistentUpdateRecord,
) -> Result<PersistentUpdateRecord, StorageError> {
    let target = match current {
        Some((current, copy)) => {
            record.sequence = current.sequence.wrapping_add(1);
            copy.other()
        }
        None => RecordCopy::Primary,
    };
    let region = Region::Record(target);
    let encoded = record.encode();

    device.erase(region)?;
    device.write(region, 0, &encoded)?;

    match read_copy(device, target)? {
        Ok(written) if written == record => {
            debug!(
                sequence = record.sequence,
                copy = ?target,
                slot = %record.active_slot,
                "Update record committed"
            );
            Ok(record)
        }
        _ => Err(StorageError::CommitVerification),
    }
}

/// Reads and atomically commits the persistent update record
///
/// The record is never cached: every call reads the flash.
#[derive(Debug, Clone)]
pub struct RecordStore<D> {
    flash: SharedFlash<D>,
}

impl<D: FlashDevice> RecordStore<D> {
    /// Create a store over the shared flash
    pub fn new(flash: SharedFlash<D>) -> Self {
        Self { flash }
    }

    /// Read both copies
    pub fn load(&self) -> Result<RecordState, StorageError> {
        self.flash.critical_section(|device| load_from(device))
    }

    /// Current record; fails when none has been written
    pub fn current(&self) -> Result<PersistentUpdateRecord, StorageError> {
        match self.load()? {
            RecordState::Valid(record, _) => Ok(record),
            RecordState::Blank | RecordState::Corrupt => Err(StorageError::NoValidRecord),
        }
    }

    /// Current record, writing factory defaults when none is valid
    pub fn load_or_init(&self, config: &OtaConfig) -> Result<PersistentUpdateRecord, StorageError> {
        self.flash.critical_section(|device| match load_from(device)? {
            RecordState::Valid(record, _) => Ok(record),
            state => {
                if state == RecordState::Corrupt {
                    error!("Update record unreadable, restoring factory defaults");
                } else {
                    debug!("No update record found, writing factory defaults");
                }
                commit_to(device, None, PersistentUpdateRecord::factory_default(config))
            }
        })
    }

    /// Apply `change` to the current record and commit the result
    ///
    /// Load, change and commit happen in one critical section. Nothing is
    /// written when `change` fails.
    pub fn update<E>(
        &self,
        change: impl FnOnce(&mut PersistentUpdateRecord) -> Result<(), E>,
    ) -> Result<PersistentUpdateRecord, E>
    where
        E: From<StorageError>,
    {
        self.flash.critical_section(|device| {
            let (current, copy) = match load_from(device)? {
                RecordState::Valid(record, copy) => (record, copy),
                RecordState::Blank | RecordState::Corrupt => {
                    return Err(StorageError::NoValidRecord.into());
                }
            };
            let mut next = current;
            change(&mut next)?;
            Ok(commit_to(device, Some((current, copy)), next)?)
        })
    }
}
