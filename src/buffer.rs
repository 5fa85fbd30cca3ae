//! Reusable read buffer for staging record bytes.

use crate::segment::SegmentSource;
use bytes::BytesMut;

/// Result of staging bytes from a segment source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Staging {
    /// The buffer holds at least the requested number of bytes.
    Full,
    /// The source ran out of available bytes mid-request.
    Partial(usize),
    /// No bytes were available at all.
    Empty,
}

/// Growable byte buffer reused across record reads.
///
/// Owned by exactly one iterator instance. Capacity grows monotonically to
/// fit the largest record seen and is kept across [`ReadBuffer::clear`] so
/// steady-state reads allocate nothing.
#[derive(Debug)]
pub struct ReadBuffer {
    buf: BytesMut,
}

impl ReadBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Reads from `source` until the buffer holds `target` bytes in total.
    ///
    /// A source returning zero bytes means "no more data available right
    /// now", not an error; the caller classifies what a short read means.
    pub(crate) fn fill_to(
        &mut self,
        source: &mut dyn SegmentSource,
        target: usize,
    ) -> Result<Staging, std::io::Error> {
        while self.buf.len() < target {
            let staged = self.buf.len();
            self.buf.resize(target, 0);
            match source.read(&mut self.buf[staged..]) {
                Ok(0) => {
                    self.buf.truncate(staged);
                    return Ok(if staged == 0 {
                        Staging::Empty
                    } else {
                        Staging::Partial(staged)
                    });
                }
                Ok(n) => self.buf.truncate(staged + n),
                Err(e) => {
                    self.buf.truncate(staged);
                    return Err(e);
                }
            }
        }
        Ok(Staging::Full)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Discards staged bytes, keeping capacity for the next record.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Releases the backing allocation. Used on iterator close.
    pub fn release(&mut self) {
        self.buf = BytesMut::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::BufferSource;
    use bytes::Bytes;

    #[test]
    fn test_fill_full() {
        let mut src = BufferSource::new(Bytes::from_static(b"abcdefgh"));
        let mut buf = ReadBuffer::with_capacity(4);

        assert_eq!(buf.fill_to(&mut src, 5).unwrap(), Staging::Full);
        assert_eq!(buf.as_slice(), b"abcde");

        // Staging more extends the same buffer.
        assert_eq!(buf.fill_to(&mut src, 8).unwrap(), Staging::Full);
        assert_eq!(buf.as_slice(), b"abcdefgh");
    }

    #[test]
    fn test_fill_partial_and_empty() {
        let mut src = BufferSource::new(Bytes::from_static(b"abc"));
        let mut buf = ReadBuffer::with_capacity(16);

        assert_eq!(buf.fill_to(&mut src, 10).unwrap(), Staging::Partial(3));
        assert_eq!(buf.as_slice(), b"abc");

        buf.clear();
        assert_eq!(buf.fill_to(&mut src, 1).unwrap(), Staging::Empty);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_capacity_kept_across_clear() {
        let mut src = BufferSource::new(Bytes::from(vec![7u8; 1024]));
        let mut buf = ReadBuffer::with_capacity(8);

        buf.fill_to(&mut src, 1024).unwrap();
        let grown = buf.capacity();
        assert!(grown >= 1024);

        buf.clear();
        assert_eq!(buf.capacity(), grown);

        buf.release();
        assert_eq!(buf.len(), 0);
    }
}
