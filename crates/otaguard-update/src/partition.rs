//! A/B partition slots and flash regions
//!
//! Storage is an arena of four fixed regions: two firmware slots and two copies
//! of the persistent update record. Regions are addressed by identifier, never
//! by pointer. Which slot is active is not stored here; it is derived from the
//! single `active_slot` field of the persistent record.

use serde::{Deserialize, Serialize};

use crate::version::FirmwareVersion;

/// Firmware partition slot identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionSlot {
    /// Slot A (factory image)
    A,
    /// Slot B
    B,
}

impl PartitionSlot {
    /// Get the other slot
    pub fn other(self) -> Self {
        match self {
            PartitionSlot::A => PartitionSlot::B,
            PartitionSlot::B => PartitionSlot::A,
        }
    }

    /// Persisted one-byte identifier
    pub fn to_byte(self) -> u8 {
        match self {
            PartitionSlot::A => 0,
            PartitionSlot::B => 1,
        }
    }

    /// Decode the persisted identifier
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PartitionSlot::A),
            1 => Some(PartitionSlot::B),
            _ => None,
        }
    }
}

impl std::fmt::Display for PartitionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionSlot::A => write!(f, "A"),
            PartitionSlot::B => write!(f, "B"),
        }
    }
}

/// One of the two copies of the persistent update record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordCopy {
    /// First record sector
    Primary,
    /// Second record sector
    Secondary,
}

impl RecordCopy {
    /// Get the other copy
    pub fn other(self) -> Self {
        match self {
            RecordCopy::Primary => RecordCopy::Secondary,
            RecordCopy::Secondary => RecordCopy::Primary,
        }
    }
}

/// Addressable flash region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    /// Firmware image slot
    Slot(PartitionSlot),
    /// Persistent record sector
    Record(RecordCopy),
}

impl Region {
    /// All regions of the arena
    pub const ALL: [Region; 4] = [
        Region::Slot(PartitionSlot::A),
        Region::Slot(PartitionSlot::B),
        Region::Record(RecordCopy::Primary),
        Region::Record(RecordCopy::Secondary),
    ];
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Region::Slot(slot) => write!(f, "slot {}", slot),
            Region::Record(RecordCopy::Primary) => write!(f, "record sector 0"),
            Region::Record(RecordCopy::Secondary) => write!(f, "record sector 1"),
        }
    }
}

/// Derived view of one slot, as reported by the persistent record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStatus {
    /// Slot identifier
    pub slot: PartitionSlot,

    /// Whether the device boots from this slot
    pub active: bool,

    /// Version known to be stored in this slot, if tracked
    pub version: Option<FirmwareVersion>,

    /// Whether the image in this slot has been confirmed good
    pub confirmed: bool,
}

impl SlotStatus {
    /// Check if this slot may be erased for a new image
    pub fn can_update(&self) -> bool {
        !self.active
    }
}
