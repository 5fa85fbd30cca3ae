//! # wal-replay
//!
//! Read side of a segmented write-ahead log: a lazy, forward-only iterator
//! that reconstructs the ordered record stream across segment files (or
//! in-memory buffers) for crash recovery.
//!
//! This crate provides:
//! - Versioned record framing with per-record checksums
//! - Segment headers selecting the serializer version per segment
//! - Resumption from an arbitrary `(segment, offset)` pointer, including
//!   filter-based resumption inside compacted segments
//! - Tail-truncation handling that distinguishes a live segment still being
//!   appended to from a corrupted sealed segment
//!
//! Writing, rotation and retention live elsewhere; the segment-advance policy
//! is supplied through the [`SegmentProvider`] trait.

pub mod buffer;
pub mod codec;
pub mod error;
pub mod iter;
pub mod record;
pub mod segment;

pub use buffer::ReadBuffer;
pub use codec::{CodecVersion, RecordCodec, RecordFilter, StartSeekingFilter};
pub use error::WalError;
pub use iter::{
    BufferSegments, DirectorySegments, SegmentProvider, SegmentReadHandle, WalIterator,
};
pub use record::{RecordType, WalEntry, WalPointer, WalRecord};
pub use segment::{
    BufferSegmentDescriptor, FileSegmentDescriptor, SegmentDescriptor, SegmentHeader,
    SegmentSource,
};

/// Segment header size in bytes (magic + serializer version + flags).
pub const SEGMENT_HEADER_SIZE: usize = 12;

/// Initial capacity of the shared record read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Latest record serializer version.
pub const LATEST_SERIALIZER_VERSION: u32 = 2;
