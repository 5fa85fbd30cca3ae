//! Sequential WAL record iteration across segments.
//!
//! [`WalIterator`] drives the traversal: it asks a [`SegmentProvider`] for
//! segments one at a time, opens a read handle per segment, decodes records
//! through the shared read buffer, and yields `(pointer, record)` pairs in
//! strict log order. The provider encodes all placement policy (directory
//! scanning, archive-then-live ordering); the iterator only consumes it.

use crate::buffer::ReadBuffer;
use crate::codec::{CodecVersion, ReadOutcome, RecordCodec, RecordFilter, StartSeekingFilter};
use crate::error::WalError;
use crate::record::{WalPointer, WalRecord};
use crate::segment::{
    list_segments, BufferSegmentDescriptor, FileSegmentDescriptor, SegmentDescriptor,
    SegmentHeader, SegmentSource,
};
use crate::DEFAULT_READ_BUFFER_SIZE;
use bytes::Bytes;
use std::collections::VecDeque;
use std::path::Path;

/// One open segment: its source cursor, the codec chosen by the segment
/// header, and positional bookkeeping.
///
/// At most one handle is open per iterator; dropping it releases the source.
pub struct SegmentReadHandle {
    index: u64,
    work_dir: bool,
    codec: RecordCodec,
    source: Box<dyn SegmentSource>,
    offset: u64,
}

impl SegmentReadHandle {
    /// Opens a segment and prepares it for record reads.
    ///
    /// Returns `Ok(None)` when the segment has no header yet (created but
    /// not written). The start pointer applies only when its index matches
    /// this segment: a plain segment is seeked directly, a compacted one
    /// gets a [`StartSeekingFilter`] instead since its byte offsets do not
    /// correspond to the original log. Every failure path here drops the
    /// source before propagating, so no descriptor is ever leaked.
    pub fn open(
        desc: &dyn SegmentDescriptor,
        start: Option<WalPointer>,
    ) -> Result<Option<Self>, WalError> {
        let mut source = desc.open_read_only()?;

        let header = match SegmentHeader::read_from(source.as_mut())? {
            Some(header) => header,
            None => return Ok(None),
        };

        let version = CodecVersion::from_u32(header.serializer_version)?;
        let mut codec = RecordCodec::new(version);
        if header.compacted {
            codec.skip_position_check(true);
        }

        let mut offset = source.position();
        if let Some(start) = start {
            if start.index == desc.index() {
                if header.compacted {
                    if start.file_offset != 0 {
                        codec.set_filter(Box::new(StartSeekingFilter::new(start)));
                    }
                } else {
                    // Never seek into the segment header.
                    let target = (start.file_offset as u64).max(offset);
                    source.seek(target)?;
                    offset = target;
                }
            }
        }

        Ok(Some(Self {
            index: desc.index(),
            work_dir: desc.work_dir(),
            codec,
            source,
            offset,
        }))
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Whether a writer may still be appending to this segment. Governs how
    /// a tail-reached condition is classified.
    pub fn work_dir(&self) -> bool {
        self.work_dir
    }

    /// Offset of the next record to read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_next(&mut self, buf: &mut ReadBuffer) -> Result<ReadOutcome, WalError> {
        let ptr = WalPointer::new(self.index, self.offset as u32);
        let outcome = self.codec.read_record(self.source.as_mut(), buf, ptr)?;
        if let ReadOutcome::Record(p, _) | ReadOutcome::Filtered(p) = &outcome {
            self.offset = p.next_offset();
        }
        Ok(outcome)
    }
}

/// Segment-advance hook: yields the descriptor following `prev`, or `None`
/// at the end of the log. `prev` is the handle just exhausted (already at
/// its end) or `None` before the first segment.
pub trait SegmentProvider {
    fn next_segment(
        &mut self,
        prev: Option<&SegmentReadHandle>,
    ) -> Result<Option<Box<dyn SegmentDescriptor>>, WalError>;
}

/// Lazy, forward-only iterator over `(pointer, record)` pairs.
///
/// Termination is sticky: once the provider runs out of segments, a live
/// tail is reached, or an error is surfaced, further calls yield `None`.
/// Corruption and I/O failures come out as `Err` items; catching up to a
/// live writer is an ordinary end of the sequence.
pub struct WalIterator<P: SegmentProvider> {
    provider: P,
    current: Option<SegmentReadHandle>,
    buf: ReadBuffer,
    start: Option<WalPointer>,
    filter: Option<Box<dyn RecordFilter>>,
    /// Pointer of the record yielded by the previous `next()` call, promoted
    /// into `last_read` when iteration advances past it.
    pending: Option<WalPointer>,
    last_read: Option<WalPointer>,
    done: bool,
}

impl<P: SegmentProvider> WalIterator<P> {
    pub fn new(provider: P) -> Self {
        Self::with_start(provider, None)
    }

    /// Starts replay at `start`; records before it are skipped in the
    /// segment the pointer targets.
    pub fn with_start(provider: P, start: Option<WalPointer>) -> Self {
        Self {
            provider,
            current: None,
            buf: ReadBuffer::with_capacity(DEFAULT_READ_BUFFER_SIZE),
            start,
            filter: None,
            pending: None,
            last_read: None,
            done: false,
        }
    }

    /// Sets the initial read buffer capacity.
    pub fn with_read_buffer(mut self, capacity: usize) -> Self {
        self.buf = ReadBuffer::with_capacity(capacity);
        self
    }

    /// Installs a record-skip filter applied across all segments. Rejected
    /// records are decoded (the cursor moves past them) but never yielded.
    pub fn with_filter(mut self, filter: Box<dyn RecordFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Pointer of the last record consumed, including filtered records and
    /// the record most recently handed to the caller once iteration has
    /// moved past it. Callers use this to resume a later replay.
    pub fn last_read(&self) -> Option<WalPointer> {
        self.last_read
    }

    /// Releases the current segment handle and the read buffer. Idempotent;
    /// also invoked on natural termination and on error.
    pub fn close(&mut self) {
        self.done = true;
        self.current = None;
        self.buf.release();
    }

    fn open_next(
        &mut self,
        prev: Option<SegmentReadHandle>,
    ) -> Result<Option<SegmentReadHandle>, WalError> {
        let desc = self.provider.next_segment(prev.as_ref())?;
        drop(prev);

        let Some(desc) = desc else {
            return Ok(None);
        };

        tracing::debug!(segment = desc.index(), "switching to next WAL segment");

        match SegmentReadHandle::open(desc.as_ref(), self.start)? {
            Some(handle) => Ok(Some(handle)),
            None => {
                // Segment exists but has no header yet: the writer has not
                // caught up. Stop here; the caller may retry later.
                tracing::debug!(segment = desc.index(), "segment has no header yet");
                Ok(None)
            }
        }
    }

    fn advance(&mut self) -> Result<Option<(WalPointer, WalRecord)>, WalError> {
        loop {
            if self.current.is_none() {
                match self.open_next(None)? {
                    Some(handle) => self.current = Some(handle),
                    None => return Ok(None),
                }
            }

            let outcome = match self.current.as_mut() {
                Some(handle) => handle.read_next(&mut self.buf)?,
                None => return Ok(None),
            };

            match outcome {
                ReadOutcome::Record(ptr, record) => {
                    if let Some(filter) = self.filter.as_mut() {
                        if !filter.accept(record.rec_type, &ptr) {
                            self.last_read = Some(ptr);
                            continue;
                        }
                    }
                    return Ok(Some((ptr, record)));
                }
                ReadOutcome::Filtered(ptr) => {
                    self.last_read = Some(ptr);
                }
                ReadOutcome::SegmentExhausted => {
                    let prev = self.current.take();
                    match self.open_next(prev)? {
                        Some(handle) => self.current = Some(handle),
                        None => return Ok(None),
                    }
                }
                ReadOutcome::TailReached => {
                    let Some(handle) = self.current.take() else {
                        return Ok(None);
                    };
                    if handle.work_dir() {
                        tracing::warn!(
                            segment = handle.index(),
                            offset = handle.offset(),
                            "WAL tail reached in live segment, stopping replay"
                        );
                        return Ok(None);
                    }
                    return Err(WalError::TruncatedSegment {
                        segment: handle.index(),
                        offset: handle.offset(),
                    });
                }
            }
        }
    }
}

impl<P: SegmentProvider> Iterator for WalIterator<P> {
    type Item = Result<(WalPointer, WalRecord), WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if let Some(ptr) = self.pending.take() {
            self.last_read = Some(ptr);
        }

        match self.advance() {
            Ok(Some((ptr, record))) => {
                self.pending = Some(ptr);
                Some(Ok((ptr, record)))
            }
            Ok(None) => {
                self.close();
                None
            }
            Err(e) => {
                self.close();
                Some(Err(e))
            }
        }
    }
}

impl WalIterator<BufferSegments> {
    /// Iterates a single sealed in-memory segment with index 0.
    pub fn over_buffer(data: Bytes) -> Self {
        Self::new(BufferSegments::single(0, data, false))
    }
}

/// Provider over a fixed queue of in-memory segments.
#[derive(Default)]
pub struct BufferSegments {
    queue: VecDeque<BufferSegmentDescriptor>,
}

impl BufferSegments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: u64, data: Bytes, work_dir: bool) {
        self.queue
            .push_back(BufferSegmentDescriptor::new(index, data, work_dir));
    }

    pub fn single(index: u64, data: Bytes, work_dir: bool) -> Self {
        let mut segments = Self::new();
        segments.push(index, data, work_dir);
        segments
    }
}

impl SegmentProvider for BufferSegments {
    fn next_segment(
        &mut self,
        _prev: Option<&SegmentReadHandle>,
    ) -> Result<Option<Box<dyn SegmentDescriptor>>, WalError> {
        Ok(self
            .queue
            .pop_front()
            .map(|desc| Box::new(desc) as Box<dyn SegmentDescriptor>))
    }
}

/// Provider scanning a log directory for segment files, ascending by index.
///
/// By default the highest-index segment is treated as the live one (a writer
/// may still be appending to it); [`DirectorySegments::sealed`] marks every
/// segment as finalized, e.g. for reading a copied-out archive.
#[derive(Debug)]
pub struct DirectorySegments {
    queue: VecDeque<FileSegmentDescriptor>,
}

impl DirectorySegments {
    /// Scans `dir` and queues segments from `start` (or the earliest) on.
    ///
    /// A start pointer whose segment index predates the earliest file fails
    /// with [`WalError::OffsetTooOld`]: those records are gone and silently
    /// replaying from a later point would be a correctness hazard.
    pub fn open(dir: impl AsRef<Path>, start: Option<WalPointer>) -> Result<Self, WalError> {
        let mut entries = list_segments(dir.as_ref())?;

        if let Some(start) = start {
            if let Some(&(earliest, _)) = entries.first() {
                if start.index < earliest {
                    return Err(WalError::OffsetTooOld {
                        requested: start.index,
                        earliest,
                    });
                }
            }
            entries.retain(|(index, _)| *index >= start.index);
        }

        let live = entries.last().map(|(index, _)| *index);
        let queue = entries
            .into_iter()
            .map(|(index, path)| FileSegmentDescriptor::new(index, path, Some(index) == live))
            .collect();

        Ok(Self { queue })
    }

    /// Treats every queued segment as sealed, so a torn tail anywhere is
    /// reported as corruption.
    pub fn sealed(mut self) -> Self {
        self.queue = self
            .queue
            .into_iter()
            .map(|desc| desc.with_work_dir(false))
            .collect();
        self
    }
}

impl SegmentProvider for DirectorySegments {
    fn next_segment(
        &mut self,
        _prev: Option<&SegmentReadHandle>,
    ) -> Result<Option<Box<dyn SegmentDescriptor>>, WalError> {
        Ok(self
            .queue
            .pop_front()
            .map(|desc| Box::new(desc) as Box<dyn SegmentDescriptor>))
    }
}
