//! Segment headers, sources and descriptors.
//!
//! A segment is one append-only unit of the log. It opens with a fixed
//! header:
//!
//! ```text
//! +----------+--------------------+----------+
//! | magic    | serializer version | flags    |
//! | 4 bytes  | 4 bytes            | 4 bytes  |
//! +----------+--------------------+----------+
//! ```
//!
//! Flag bit 0 marks a compacted segment: one rewritten to drop record
//! classes, whose byte offsets no longer match the original log.

use crate::error::WalError;
use crate::SEGMENT_HEADER_SIZE;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Magic bytes opening every segment: "WSEG".
pub const SEGMENT_MAGIC: [u8; 4] = *b"WSEG";

const FLAG_COMPACTED: u32 = 1 << 0;

/// Segment file name format: NNNNNNNNNNNNNNNN.wal (16 hex digits).
pub fn segment_filename(index: u64) -> String {
    format!("{:016x}.wal", index)
}

/// Parses a segment index from a file name.
pub fn parse_segment_filename(name: &str) -> Option<u64> {
    let name = name.strip_suffix(".wal")?;
    if name.len() != 16 {
        return None;
    }
    u64::from_str_radix(name, 16).ok()
}

/// Fixed per-segment header, read once before any record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Record serializer version used for the whole segment.
    pub serializer_version: u32,
    /// Whether the segment was rewritten by compaction.
    pub compacted: bool,
}

impl SegmentHeader {
    pub fn new(serializer_version: u32, compacted: bool) -> Self {
        Self {
            serializer_version,
            compacted,
        }
    }

    /// Encodes the header into its fixed on-disk form.
    pub fn encode(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut out = [0u8; SEGMENT_HEADER_SIZE];
        out[0..4].copy_from_slice(&SEGMENT_MAGIC);
        out[4..8].copy_from_slice(&self.serializer_version.to_be_bytes());
        let flags = if self.compacted { FLAG_COMPACTED } else { 0 };
        out[8..12].copy_from_slice(&flags.to_be_bytes());
        out
    }

    /// Reads the header from a freshly opened segment source.
    ///
    /// Returns `Ok(None)` when fewer bytes than a header are available. That
    /// is the expected state of a segment created but not yet written to:
    /// the caller should stop or retry later, not fail.
    pub fn read_from(source: &mut dyn SegmentSource) -> Result<Option<Self>, WalError> {
        let mut raw = [0u8; SEGMENT_HEADER_SIZE];
        let mut filled = 0;
        while filled < SEGMENT_HEADER_SIZE {
            match source.read(&mut raw[filled..])? {
                0 => return Ok(None),
                n => filled += n,
            }
        }

        let magic: [u8; 4] = [raw[0], raw[1], raw[2], raw[3]];
        if magic != SEGMENT_MAGIC {
            return Err(WalError::InvalidSegmentHeader {
                reason: format!("invalid magic: {:?}", magic),
            });
        }

        let serializer_version = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let flags = u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]);

        Ok(Some(Self {
            serializer_version,
            compacted: flags & FLAG_COMPACTED != 0,
        }))
    }
}

/// Byte-addressable read access to one open segment.
///
/// A read returning zero bytes means "no more data available right now",
/// which at a live segment's tail is distinct from corruption. Implementors
/// release their resource on drop.
pub trait SegmentSource: std::fmt::Debug {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, std::io::Error>;

    fn seek(&mut self, offset: u64) -> Result<(), std::io::Error>;

    fn position(&self) -> u64;
}

/// Segment source backed by a read-only file.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    pos: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, std::io::Error> {
        let file = File::open(path)?;
        Ok(Self { file, pos: 0 })
    }
}

impl SegmentSource for FileSource {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, std::io::Error> {
        let n = self.file.read(dst)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, offset: u64) -> Result<(), std::io::Error> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.pos = offset;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }
}

/// Segment source backed by an in-memory buffer.
#[derive(Debug)]
pub struct BufferSource {
    data: bytes::Bytes,
    pos: usize,
}

impl BufferSource {
    pub fn new(data: bytes::Bytes) -> Self {
        Self { data, pos: 0 }
    }
}

impl SegmentSource for BufferSource {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, std::io::Error> {
        let remaining = self.data.len().saturating_sub(self.pos);
        let n = remaining.min(dst.len());
        dst[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn seek(&mut self, offset: u64) -> Result<(), std::io::Error> {
        if offset > self.data.len() as u64 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "seek past end of buffer",
            ));
        }
        self.pos = offset as usize;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }
}

/// Locates one segment and opens it for reading.
///
/// Supplied by the segment-advance policy; this crate never decides how
/// segments are named or found beyond the bundled providers.
pub trait SegmentDescriptor {
    /// Absolute segment index.
    fn index(&self) -> u64;

    /// Whether a writer may still be appending to this segment.
    fn work_dir(&self) -> bool;

    /// Opens the segment as a read-only source.
    fn open_read_only(&self) -> Result<Box<dyn SegmentSource>, WalError>;
}

/// Descriptor for a segment file on disk.
#[derive(Debug, Clone)]
pub struct FileSegmentDescriptor {
    index: u64,
    path: PathBuf,
    work_dir: bool,
}

impl FileSegmentDescriptor {
    pub fn new(index: u64, path: PathBuf, work_dir: bool) -> Self {
        Self {
            index,
            path,
            work_dir,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns this descriptor with the live/sealed classification replaced.
    pub fn with_work_dir(mut self, work_dir: bool) -> Self {
        self.work_dir = work_dir;
        self
    }
}

impl SegmentDescriptor for FileSegmentDescriptor {
    fn index(&self) -> u64 {
        self.index
    }

    fn work_dir(&self) -> bool {
        self.work_dir
    }

    fn open_read_only(&self) -> Result<Box<dyn SegmentSource>, WalError> {
        match FileSource::open(&self.path) {
            Ok(src) => Ok(Box::new(src)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(WalError::SegmentNotFound(self.index))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Descriptor for an in-memory segment.
#[derive(Debug, Clone)]
pub struct BufferSegmentDescriptor {
    index: u64,
    data: bytes::Bytes,
    work_dir: bool,
}

impl BufferSegmentDescriptor {
    pub fn new(index: u64, data: bytes::Bytes, work_dir: bool) -> Self {
        Self {
            index,
            data,
            work_dir,
        }
    }
}

impl SegmentDescriptor for BufferSegmentDescriptor {
    fn index(&self) -> u64 {
        self.index
    }

    fn work_dir(&self) -> bool {
        self.work_dir
    }

    fn open_read_only(&self) -> Result<Box<dyn SegmentSource>, WalError> {
        Ok(Box::new(BufferSource::new(self.data.clone())))
    }
}

/// Lists all segment files in a directory as `(index, path)`, sorted ascending.
pub fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>, WalError> {
    let mut segments = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(index) = parse_segment_filename(&name) {
            segments.push((index, entry.path()));
        }
    }

    segments.sort_by_key(|(index, _)| *index);
    Ok(segments)
}
