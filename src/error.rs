//! WAL read error types.

use thiserror::Error;

/// Errors that can occur while reading the WAL.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("segment not found: {0}")]
    SegmentNotFound(u64),

    #[error("invalid segment header: {reason}")]
    InvalidSegmentHeader { reason: String },

    #[error("unsupported record serializer version: {0}")]
    UnsupportedSerializer(u32),

    #[error("invalid record header at offset {offset}: {reason}")]
    InvalidHeader { offset: u64, reason: String },

    #[error("unknown record type {tag} at offset {offset}")]
    UnknownRecordType { offset: u64, tag: u8 },

    #[error("record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("record corrupted at offset {offset}: CRC mismatch (expected {expected:#x}, got {actual:#x})")]
    CorruptedRecord {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("segment {segment} truncated mid-record at offset {offset}: sealed segment must not end inside a record")]
    TruncatedSegment { segment: u64, offset: u64 },

    #[error("start pointer references segment {requested} but earliest available is {earliest}")]
    OffsetTooOld { requested: u64, earliest: u64 },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WalError {
    /// Returns whether the caller may retry after re-resolving the segment.
    ///
    /// Only [`WalError::SegmentNotFound`] qualifies: the segment may have been
    /// rotated away between listing and opening.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalError::SegmentNotFound(_))
    }
}
