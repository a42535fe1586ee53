//! Fixed-capacity byte region with a read offset
//!
//! A Chunk is the unit of transfer between the producer and the consumer.
//! It never grows beyond the limit it was handed out with, and its content can
//! be forwarded as a whole any number of times without being consumed.

use std::io;

use crate::error::BufferError;

/// Owned byte region with a write limit and a read offset
///
/// Invariant: `off <= buf.len() <= limit <= buf.capacity()`.
///
/// `limit` is the number of bytes the Chunk accepts. For slotted buffers it is
/// the element size; for pooled buffers it is exactly the length of the write
/// the Chunk was acquired for, while the backing capacity is rounded up to the
/// bucket size. `charge` is the number of bytes the owning allocator accounted
/// for this Chunk and must give back when it is released.
#[derive(Debug)]
pub struct Chunk {
    buf: Vec<u8>,
    limit: usize,
    off: usize,
    charge: usize,
}

impl Chunk {
    /// Wrap an existing allocation, accepting up to `limit` bytes
    ///
    /// # Panics
    /// Panics if `limit` exceeds the capacity of `buf`.
    #[must_use]
    pub fn new(mut buf: Vec<u8>, limit: usize) -> Self {
        assert!(
            limit <= buf.capacity(),
            "framebuf: chunk limit {limit} exceeds capacity {}",
            buf.capacity()
        );
        buf.clear();
        Self {
            buf,
            limit,
            off: 0,
            charge: 0,
        }
    }

    /// Allocate a fresh Chunk of exactly `limit` bytes
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self::new(Vec::with_capacity(limit), limit)
    }

    pub(crate) fn with_charge(mut self, charge: usize) -> Self {
        self.charge = charge;
        self
    }

    pub(crate) fn charge(&self) -> usize {
        self.charge
    }

    /// Number of unread bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len() - self.off
    }

    /// Whether all written bytes have been read
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of bytes the Chunk accepts in total
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Size of the backing allocation
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Number of bytes that can still be written
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.limit - self.buf.len()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Forget content and read position, keeping the allocation
    pub fn reset(&mut self) {
        self.buf.clear();
        self.off = 0;
    }

    pub(crate) fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Append as much of `p` as fits, returning the number of bytes stored
    ///
    /// A short count means the payload did not fit; the fitting prefix is kept.
    pub fn write(&mut self, p: &[u8]) -> usize {
        let n = p.len().min(self.remaining());
        #[allow(clippy::indexing_slicing)]
        self.buf.extend_from_slice(&p[..n]);
        n
    }

    /// Copy unread bytes into `p` and advance the read offset
    ///
    /// Returns `Ok(0)` for an empty `p`, and `EndOfStream` if nothing is left
    /// to read.
    ///
    /// # Errors
    /// Returns `BufferError::EndOfStream` when the Chunk is drained.
    pub fn read(&mut self, p: &mut [u8]) -> Result<usize, BufferError> {
        if self.is_empty() {
            if p.is_empty() {
                return Ok(0);
            }
            return Err(BufferError::EndOfStream);
        }
        let unread = self.bytes();
        let n = unread.len().min(p.len());
        #[allow(clippy::indexing_slicing)]
        p[..n].copy_from_slice(&unread[..n]);
        self.off += n;
        Ok(n)
    }

    /// The unread remainder
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        #[allow(clippy::indexing_slicing)]
        &self.buf[self.off..]
    }

    /// Everything written so far, regardless of the read offset
    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.buf
    }

    /// Write the whole content to `w`, without consuming it
    ///
    /// Repeated calls write the same data again.
    ///
    /// # Errors
    /// Returns `BufferError::Io` if the sink fails or accepts fewer bytes.
    pub fn write_to<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, BufferError> {
        w.write_all(&self.buf)?;
        Ok(self.buf.len())
    }
}
