//! WAL record types.
//!
//! Each record is framed with a fixed header followed by a variable payload.
//! Version 1 layout:
//!
//! ```text
//! +----------+----------+----------+----------+----------+----------+
//! | magic    | type     | flags    | reserved | length   | crc32c   |
//! | 4 bytes  | 1 byte   | 1 byte   | 2 bytes  | 4 bytes  | 4 bytes  |
//! +----------+----------+----------+----------+----------+----------+
//! | payload                                                         |
//! | length bytes                                                    |
//! +-----------------------------------------------------------------+
//! ```
//!
//! Version 2 appends a 4-byte `rec_offset` field to the header: the file
//! offset the writer observed for this record, verified on decode unless the
//! segment is compacted (see [`crate::codec`]).

use crate::error::WalError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Magic bytes opening every record frame: "WREC".
pub const RECORD_MAGIC: [u8; 4] = *b"WREC";

/// Maximum record payload size (16 MiB).
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Byte-exact location of a record within the log.
///
/// Ordering is lexicographic over `(index, file_offset, length)`, which makes
/// pointers comparable across segments. `length` is zero until the record has
/// been fully read, then patched with the total encoded size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalPointer {
    /// Absolute segment index.
    pub index: u64,
    /// Byte offset of the record frame within the segment.
    pub file_offset: u32,
    /// Total encoded size of the record, header included.
    pub length: u32,
}

impl WalPointer {
    /// Creates a pointer at the start of a record, length not yet known.
    pub fn new(index: u64, file_offset: u32) -> Self {
        Self {
            index,
            file_offset,
            length: 0,
        }
    }

    /// Returns this pointer with the encoded length filled in.
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    /// Offset of the first byte past this record.
    pub fn next_offset(&self) -> u64 {
        self.file_offset as u64 + self.length as u64
    }
}

impl std::fmt::Display for WalPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}+{}]", self.index, self.file_offset, self.length)
    }
}

/// Type tag of a WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordType {
    /// Logical key/value update.
    DataUpdate = 1,
    /// Logical key deletion.
    DataDelete = 2,
    /// Physical page-level delta.
    PageDelta = 3,
    /// Checkpoint marker.
    Checkpoint = 4,
}

impl RecordType {
    /// Parses a type tag. Unknown tags are reported with the record offset so
    /// forward-incompatible segments fail with a precise location instead of
    /// being mistaken for filtered records.
    pub fn from_tag(tag: u8, offset: u64) -> Result<Self, WalError> {
        match tag {
            1 => Ok(RecordType::DataUpdate),
            2 => Ok(RecordType::DataDelete),
            3 => Ok(RecordType::PageDelta),
            4 => Ok(RecordType::Checkpoint),
            _ => Err(WalError::UnknownRecordType { offset, tag }),
        }
    }
}

/// A decoded WAL record: frame metadata plus the raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub rec_type: RecordType,
    pub flags: u8,
    pub payload: Bytes,
}

impl WalRecord {
    pub fn new(rec_type: RecordType, payload: Bytes) -> Self {
        Self {
            rec_type,
            flags: 0,
            payload,
        }
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Deserializes the typed entry carried in the payload.
    pub fn entry(&self) -> Result<WalEntry, WalError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Typed WAL entry with deserialized payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalEntry {
    Update {
        key: String,
        value: serde_json::Value,
        version: u64,
    },
    Delete {
        key: String,
        version: u64,
    },
    PageDelta {
        page_id: u64,
        offset: u32,
        bytes: Vec<u8>,
    },
    Checkpoint {
        timestamp: i64,
    },
}

impl WalEntry {
    /// Returns the record type for this entry.
    pub fn record_type(&self) -> RecordType {
        match self {
            WalEntry::Update { .. } => RecordType::DataUpdate,
            WalEntry::Delete { .. } => RecordType::DataDelete,
            WalEntry::PageDelta { .. } => RecordType::PageDelta,
            WalEntry::Checkpoint { .. } => RecordType::Checkpoint,
        }
    }

    /// Returns the key if this entry is a data mutation.
    pub fn key(&self) -> Option<&str> {
        match self {
            WalEntry::Update { key, .. } | WalEntry::Delete { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Serializes this entry into a framed record payload.
    pub fn to_record(&self) -> Result<WalRecord, WalError> {
        let payload = serde_json::to_vec(self)?;
        Ok(WalRecord::new(self.record_type(), Bytes::from(payload)))
    }
}
