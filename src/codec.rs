//! Versioned record codec.
//!
//! One codec instance serves one segment; the segment header fixes the
//! version for the segment's whole lifetime. Decoding reports its outcome as
//! an explicit status instead of driving control flow through errors: a
//! short read at the tail, clean exhaustion and a filtered record are all
//! ordinary [`ReadOutcome`] values, while corruption and I/O failures are
//! [`WalError`]s.

use crate::buffer::{ReadBuffer, Staging};
use crate::error::WalError;
use crate::record::{RecordType, WalPointer, WalRecord, MAX_RECORD_SIZE, RECORD_MAGIC};
use crate::segment::SegmentSource;
use bytes::{BufMut, Bytes, BytesMut};

/// Record header size for serializer version 1.
pub const V1_RECORD_HEADER_SIZE: usize = 16;

/// Record header size for serializer version 2 (adds the position check).
pub const V2_RECORD_HEADER_SIZE: usize = 20;

/// Record serializer version, selected per segment by its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecVersion {
    /// Original framing: magic, type, flags, length, crc32c.
    V1,
    /// V1 plus the writer-recorded file offset, verified on decode.
    V2,
}

impl CodecVersion {
    pub fn from_u32(version: u32) -> Result<Self, WalError> {
        match version {
            1 => Ok(CodecVersion::V1),
            2 => Ok(CodecVersion::V2),
            other => Err(WalError::UnsupportedSerializer(other)),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            CodecVersion::V1 => 1,
            CodecVersion::V2 => 2,
        }
    }

    pub fn header_size(self) -> usize {
        match self {
            CodecVersion::V1 => V1_RECORD_HEADER_SIZE,
            CodecVersion::V2 => V2_RECORD_HEADER_SIZE,
        }
    }
}

/// Outcome of one decode step.
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    /// A record was read; the pointer carries the final encoded length.
    Record(WalPointer, WalRecord),
    /// A record was read but rejected by the filter. The cursor advanced
    /// past it; only the pointer is reported for bookkeeping.
    Filtered(WalPointer),
    /// Clean end of segment: no bytes, or zero padding, at a record boundary.
    SegmentExhausted,
    /// Available data ends inside a record. Whether that is benign depends
    /// on whether the segment is still being written to.
    TailReached,
}

/// Decides whether a decoded record is surfaced. Rejected records are still
/// fully decoded so the cursor advances past them.
pub trait RecordFilter {
    fn accept(&mut self, rec_type: RecordType, ptr: &WalPointer) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeekState {
    Seeking,
    Passing,
}

/// Drops every record before a start offset, then passes everything on.
///
/// Used for resumption inside compacted segments, where byte offsets no
/// longer correspond to the original log and direct seeking is invalid.
pub struct StartSeekingFilter {
    start_offset: u32,
    state: SeekState,
}

impl StartSeekingFilter {
    pub fn new(start: WalPointer) -> Self {
        Self {
            start_offset: start.file_offset,
            state: SeekState::Seeking,
        }
    }
}

impl RecordFilter for StartSeekingFilter {
    fn accept(&mut self, _rec_type: RecordType, ptr: &WalPointer) -> bool {
        if self.state == SeekState::Seeking && ptr.file_offset >= self.start_offset {
            self.state = SeekState::Passing;
        }
        self.state == SeekState::Passing
    }
}

/// Encodes and decodes framed records for one serializer version.
pub struct RecordCodec {
    version: CodecVersion,
    filter: Option<Box<dyn RecordFilter>>,
    skip_position_check: bool,
}

impl RecordCodec {
    pub fn new(version: CodecVersion) -> Self {
        Self {
            version,
            filter: None,
            skip_position_check: false,
        }
    }

    pub fn version(&self) -> CodecVersion {
        self.version
    }

    /// Installs a record-skip filter for this segment.
    pub fn set_filter(&mut self, filter: Box<dyn RecordFilter>) {
        self.filter = Some(filter);
    }

    /// Disables verification of the writer-recorded offset (v2). Compacted
    /// segments require this: their physical offsets diverge from the ones
    /// recorded at write time.
    pub fn skip_position_check(&mut self, skip: bool) {
        self.skip_position_check = skip;
    }

    /// Total encoded size of a record under this version.
    pub fn encoded_size(&self, record: &WalRecord) -> usize {
        self.version.header_size() + record.payload_len()
    }

    /// Frames `record` as written at `file_offset` into `out`.
    pub fn encode(
        &self,
        record: &WalRecord,
        file_offset: u32,
        out: &mut BytesMut,
    ) -> Result<(), WalError> {
        if record.payload_len() > MAX_RECORD_SIZE {
            return Err(WalError::RecordTooLarge {
                size: record.payload_len(),
                max: MAX_RECORD_SIZE,
            });
        }

        out.reserve(self.encoded_size(record));
        out.put_slice(&RECORD_MAGIC);
        out.put_u8(record.rec_type as u8);
        out.put_u8(record.flags);
        out.put_u16(0);
        out.put_u32(record.payload_len() as u32);
        out.put_u32(crc32c::crc32c(&record.payload));
        if self.version == CodecVersion::V2 {
            out.put_u32(file_offset);
        }
        out.put_slice(&record.payload);

        Ok(())
    }

    /// Decodes the record starting at `ptr` from `source`, staging bytes in
    /// `buf`. Never reads past the failure point: a short read leaves the
    /// outcome as [`ReadOutcome::TailReached`] without consuming further.
    pub(crate) fn read_record(
        &mut self,
        source: &mut dyn SegmentSource,
        buf: &mut ReadBuffer,
        ptr: WalPointer,
    ) -> Result<ReadOutcome, WalError> {
        buf.clear();

        let header_size = self.version.header_size();
        match buf.fill_to(source, header_size)? {
            Staging::Empty => return Ok(ReadOutcome::SegmentExhausted),
            Staging::Partial(_) => {
                // A few trailing zero bytes are end-of-segment padding, any
                // other partial header is a torn write.
                if buf.as_slice().iter().all(|&b| b == 0) {
                    return Ok(ReadOutcome::SegmentExhausted);
                }
                return Ok(ReadOutcome::TailReached);
            }
            Staging::Full => {}
        }

        let head = buf.as_slice();
        let offset = ptr.file_offset as u64;

        let magic: [u8; 4] = [head[0], head[1], head[2], head[3]];
        if magic != RECORD_MAGIC {
            if magic == [0, 0, 0, 0] {
                return Ok(ReadOutcome::SegmentExhausted);
            }
            return Err(WalError::InvalidHeader {
                offset,
                reason: format!("invalid magic: {:?}", magic),
            });
        }

        let rec_type = RecordType::from_tag(head[4], offset)?;
        let flags = head[5];
        let payload_len =
            u32::from_be_bytes([head[8], head[9], head[10], head[11]]) as usize;
        let crc_expected = u32::from_be_bytes([head[12], head[13], head[14], head[15]]);

        if payload_len > MAX_RECORD_SIZE {
            return Err(WalError::RecordTooLarge {
                size: payload_len,
                max: MAX_RECORD_SIZE,
            });
        }

        if self.version == CodecVersion::V2 && !self.skip_position_check {
            let recorded =
                u32::from_be_bytes([head[16], head[17], head[18], head[19]]);
            if recorded != ptr.file_offset {
                return Err(WalError::InvalidHeader {
                    offset,
                    reason: format!(
                        "position mismatch: record written at {}, read at {}",
                        recorded, ptr.file_offset
                    ),
                });
            }
        }

        let total = header_size + payload_len;
        match buf.fill_to(source, total)? {
            Staging::Full => {}
            _ => return Ok(ReadOutcome::TailReached),
        }

        let payload = &buf.as_slice()[header_size..total];
        let crc_actual = crc32c::crc32c(payload);
        if crc_actual != crc_expected {
            return Err(WalError::CorruptedRecord {
                offset,
                expected: crc_expected,
                actual: crc_actual,
            });
        }

        let ptr = ptr.with_length(total as u32);

        if let Some(filter) = self.filter.as_mut() {
            if !filter.accept(rec_type, &ptr) {
                return Ok(ReadOutcome::Filtered(ptr));
            }
        }

        let record = WalRecord {
            rec_type,
            flags,
            payload: Bytes::copy_from_slice(payload),
        };

        Ok(ReadOutcome::Record(ptr, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::BufferSource;
    use proptest::prelude::*;

    fn encode_one(version: CodecVersion, record: &WalRecord, file_offset: u32) -> Bytes {
        let codec = RecordCodec::new(version);
        let mut out = BytesMut::new();
        codec.encode(record, file_offset, &mut out).unwrap();
        out.freeze()
    }

    fn decode_one(
        codec: &mut RecordCodec,
        data: Bytes,
        ptr: WalPointer,
    ) -> Result<ReadOutcome, WalError> {
        let mut source = BufferSource::new(data);
        let mut buf = ReadBuffer::with_capacity(64);
        codec.read_record(&mut source, &mut buf, ptr)
    }

    fn sample_record() -> WalRecord {
        WalRecord::new(
            RecordType::DataUpdate,
            Bytes::from_static(br#"{"type":"update","key":"k","value":1,"version":3}"#),
        )
    }

    #[test]
    fn test_roundtrip_v1() {
        let record = sample_record();
        let data = encode_one(CodecVersion::V1, &record, 12);

        let mut codec = RecordCodec::new(CodecVersion::V1);
        let outcome = decode_one(&mut codec, data.clone(), WalPointer::new(0, 12)).unwrap();
        match outcome {
            ReadOutcome::Record(ptr, decoded) => {
                assert_eq!(decoded, record);
                assert_eq!(ptr.length as usize, data.len());
                assert_eq!(ptr.length as usize, codec.encoded_size(&record));
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_v2_checks_position() {
        let record = sample_record();
        let data = encode_one(CodecVersion::V2, &record, 12);

        let mut codec = RecordCodec::new(CodecVersion::V2);
        let outcome = decode_one(&mut codec, data.clone(), WalPointer::new(0, 12)).unwrap();
        assert!(matches!(outcome, ReadOutcome::Record(_, _)));

        // Reading the same bytes at the wrong offset trips the check.
        let err = decode_one(&mut codec, data.clone(), WalPointer::new(0, 40)).unwrap_err();
        assert!(matches!(err, WalError::InvalidHeader { .. }));

        // Compacted segments skip it.
        codec.skip_position_check(true);
        let outcome = decode_one(&mut codec, data, WalPointer::new(0, 40)).unwrap();
        assert!(matches!(outcome, ReadOutcome::Record(_, _)));
    }

    #[test]
    fn test_crc_mismatch() {
        let record = sample_record();
        let mut data = BytesMut::from(&encode_one(CodecVersion::V1, &record, 0)[..]);
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        let mut codec = RecordCodec::new(CodecVersion::V1);
        let err = decode_one(&mut codec, data.freeze(), WalPointer::new(0, 0)).unwrap_err();
        assert!(matches!(err, WalError::CorruptedRecord { .. }));
    }

    #[test]
    fn test_exhausted_and_padding() {
        let mut codec = RecordCodec::new(CodecVersion::V1);

        let outcome = decode_one(&mut codec, Bytes::new(), WalPointer::new(0, 0)).unwrap();
        assert!(matches!(outcome, ReadOutcome::SegmentExhausted));

        // Zero padding after the last record, shorter or longer than a header.
        let outcome =
            decode_one(&mut codec, Bytes::from(vec![0u8; 6]), WalPointer::new(0, 0)).unwrap();
        assert!(matches!(outcome, ReadOutcome::SegmentExhausted));

        let outcome =
            decode_one(&mut codec, Bytes::from(vec![0u8; 64]), WalPointer::new(0, 0)).unwrap();
        assert!(matches!(outcome, ReadOutcome::SegmentExhausted));
    }

    #[test]
    fn test_tail_reached_mid_header_and_mid_payload() {
        let record = sample_record();
        let data = encode_one(CodecVersion::V1, &record, 0);

        let mut codec = RecordCodec::new(CodecVersion::V1);

        // Torn inside the header.
        let outcome =
            decode_one(&mut codec, data.slice(..7), WalPointer::new(0, 0)).unwrap();
        assert!(matches!(outcome, ReadOutcome::TailReached));

        // Torn inside the payload.
        let cut = V1_RECORD_HEADER_SIZE + record.payload_len() / 2;
        let outcome =
            decode_one(&mut codec, data.slice(..cut), WalPointer::new(0, 0)).unwrap();
        assert!(matches!(outcome, ReadOutcome::TailReached));
    }

    #[test]
    fn test_unknown_record_type() {
        let record = sample_record();
        let mut data = BytesMut::from(&encode_one(CodecVersion::V1, &record, 0)[..]);
        data[4] = 99;

        let mut codec = RecordCodec::new(CodecVersion::V1);
        let err = decode_one(&mut codec, data.freeze(), WalPointer::new(0, 0)).unwrap_err();
        assert!(matches!(err, WalError::UnknownRecordType { tag: 99, .. }));
    }

    #[test]
    fn test_invalid_magic() {
        let record = sample_record();
        let mut data = BytesMut::from(&encode_one(CodecVersion::V1, &record, 0)[..]);
        data[0] = b'X';

        let mut codec = RecordCodec::new(CodecVersion::V1);
        let err = decode_one(&mut codec, data.freeze(), WalPointer::new(0, 0)).unwrap_err();
        assert!(matches!(err, WalError::InvalidHeader { .. }));
    }

    #[test]
    fn test_oversized_length_field() {
        let record = sample_record();
        let mut data = BytesMut::from(&encode_one(CodecVersion::V1, &record, 0)[..]);
        data[8..12].copy_from_slice(&((MAX_RECORD_SIZE as u32) + 1).to_be_bytes());

        let mut codec = RecordCodec::new(CodecVersion::V1);
        let err = decode_one(&mut codec, data.freeze(), WalPointer::new(0, 0)).unwrap_err();
        assert!(matches!(err, WalError::RecordTooLarge { .. }));
    }

    #[test]
    fn test_filter_rejects_but_advances() {
        struct DropDeltas;
        impl RecordFilter for DropDeltas {
            fn accept(&mut self, rec_type: RecordType, _ptr: &WalPointer) -> bool {
                rec_type != RecordType::PageDelta
            }
        }

        let delta = WalRecord::new(RecordType::PageDelta, Bytes::from_static(b"{}"));
        let data = encode_one(CodecVersion::V1, &delta, 0);

        let mut codec = RecordCodec::new(CodecVersion::V1);
        codec.set_filter(Box::new(DropDeltas));

        let outcome = decode_one(&mut codec, data.clone(), WalPointer::new(0, 0)).unwrap();
        match outcome {
            ReadOutcome::Filtered(ptr) => assert_eq!(ptr.length as usize, data.len()),
            other => panic!("expected filtered, got {:?}", other),
        }
    }

    #[test]
    fn test_start_seeking_filter_state_machine() {
        let mut filter = StartSeekingFilter::new(WalPointer::new(0, 100));

        assert!(!filter.accept(RecordType::DataUpdate, &WalPointer::new(0, 12)));
        assert!(!filter.accept(RecordType::DataUpdate, &WalPointer::new(0, 60)));
        assert!(filter.accept(RecordType::DataUpdate, &WalPointer::new(0, 100)));
        // Once passing, stays passing even for smaller offsets.
        assert!(filter.accept(RecordType::DataUpdate, &WalPointer::new(0, 12)));
    }

    #[test]
    fn test_unsupported_version() {
        assert!(matches!(
            CodecVersion::from_u32(9),
            Err(WalError::UnsupportedSerializer(9))
        ));
        assert_eq!(CodecVersion::from_u32(1).unwrap(), CodecVersion::V1);
        assert_eq!(CodecVersion::from_u32(2).unwrap(), CodecVersion::V2);
        assert_eq!(
            CodecVersion::from_u32(crate::LATEST_SERIALIZER_VERSION)
                .unwrap()
                .as_u32(),
            crate::LATEST_SERIALIZER_VERSION
        );
    }

    proptest! {
        #[test]
        fn prop_roundtrip_any_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
            tag in 1u8..=4,
            offset in 0u32..1_000_000,
        ) {
            let rec_type = RecordType::from_tag(tag, 0).unwrap();
            let record = WalRecord::new(rec_type, Bytes::from(payload));
            let data = encode_one(CodecVersion::V2, &record, offset);

            let mut codec = RecordCodec::new(CodecVersion::V2);
            let outcome =
                decode_one(&mut codec, data.clone(), WalPointer::new(0, offset)).unwrap();
            match outcome {
                ReadOutcome::Record(ptr, decoded) => {
                    prop_assert_eq!(decoded, record);
                    prop_assert_eq!(ptr.length as usize, data.len());
                }
                other => prop_assert!(false, "unexpected outcome: {:?}", other),
            }
        }
    }
}
