//! Bounded frame buffer between one producer and one consumer
//!
//! ```text
//!   Writer                                         Reader
//!  ┌──────┐  fill / flush   ┌─────────────┐  next  ┌──────┐  drained
//!  │ head │ ──────────────► │ ready queue │ ─────► │ tail │ ─────────┐
//!  └──────┘                 └─────────────┘        └──────┘          │
//!     ▲                            │ steal (oldest first)            │
//!     │                            ▼                                 │
//!     └──────────────────────── Allocator ◄──────────────────────────┘
//! ```
//!
//! The producer owns the [`Writer`], the consumer owns the [`Reader`]. Each
//! half takes `&mut self`, so neither side can be driven from two places at
//! once; the two halves may run on different threads.
//!
//! When the consumer falls behind, the oldest ready Chunk is discarded to make
//! room and the write that caused it reports [`Written::dropped`]. The reader
//! sees a gap and nothing else.

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::alloc::{Allocator, Unpooled};
use crate::chunk::Chunk;
use crate::config::{Backend, BufferConfig};
use crate::error::BufferError;
use crate::handle::Handle;
use crate::pool::BytePool;
use crate::slot::SlotAllocator;

/// State reachable from both halves
struct Shared {
    alloc: Arc<dyn Allocator>,
    ready: Receiver<Chunk>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Both halves are gone: hand back whatever was never read
        while let Ok(chunk) = self.ready.try_recv() {
            self.alloc.release(chunk);
        }
    }
}

/// Result of a successful write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Written {
    /// Number of bytes accepted
    pub len: usize,
    /// Whether an older unread Chunk was discarded to make room
    pub dropped: bool,
}

/// Producer half of a buffer
///
/// Bytes are gathered in a head Chunk that becomes visible to the reader when
/// it is full or flushed. Dropping the writer closes it.
pub struct Writer {
    shared: Arc<Shared>,
    /// `None` once closed
    ready: Option<Sender<Chunk>>,
    head: Option<Chunk>,
    max: usize,
    timeout: Duration,
    stalled: bool,
    drops: u64,
}

impl Writer {
    /// Write `p` as part of the current frame
    ///
    /// May wait up to the buffer timeout for a free Chunk or for room in the
    /// ready queue; if none appears, the oldest ready Chunk is discarded and
    /// the result reports `dropped`. An empty `p` is accepted without effect.
    ///
    /// # Errors
    /// - `Closed` after [`Writer::close`]
    /// - `TooLong` if `p` exceeds the per-write maximum; nothing is written
    /// - `TooLongForPool` if `p` can never fit the pool budget
    /// - `Stall` if no Chunk could be obtained even by discarding; the writer
    ///   refuses all further writes
    pub fn write(&mut self, p: &[u8]) -> Result<Written, BufferError> {
        if self.stalled {
            return Err(BufferError::Stall);
        }
        if self.ready.is_none() {
            return Err(BufferError::Closed);
        }
        if p.len() > self.max {
            return Err(BufferError::TooLong {
                len: p.len(),
                max: self.max,
            });
        }
        if p.is_empty() {
            return Ok(Written::default());
        }

        let result = self.write_frame(p);
        match &result {
            Ok(written) if written.dropped => {
                self.drops += 1;
                log::debug!("writer dropped an unread chunk: {self:?}");
            }
            Err(BufferError::Stall) => {
                self.stalled = true;
                log::error!("writer stalled, no chunk could be reclaimed: {self:?}");
            }
            _ => {}
        }
        result
    }

    fn write_frame(&mut self, p: &[u8]) -> Result<Written, BufferError> {
        let mut dropped = self.shared.alloc.steal(&self.shared.ready, p.len())?;

        // `p` fits an empty Chunk (checked by the caller), so rolling the head
        // over once is always enough.
        let mut head = match self.head.take() {
            Some(head) if head.remaining() >= p.len() => head,
            Some(full) => {
                dropped |= self.enqueue(full)?;
                let (head, stolen) = self.acquire(p.len())?;
                dropped |= stolen;
                head
            }
            None => {
                let (head, stolen) = self.acquire(p.len())?;
                dropped |= stolen;
                head
            }
        };

        let len = head.write(p);
        debug_assert_eq!(len, p.len(), "head chunk shorter than the write");
        if head.is_full() {
            dropped |= self.enqueue(head)?;
        } else {
            self.head = Some(head);
        }
        Ok(Written { len, dropped })
    }

    /// Get a fresh head Chunk, discarding ready Chunks if none is free in time
    fn acquire(&self, len: usize) -> Result<(Chunk, bool), BufferError> {
        let alloc = &self.shared.alloc;
        if let Some(chunk) = alloc.acquire(len, self.timeout) {
            return Ok((chunk, false));
        }

        let mut dropped = false;
        loop {
            match self.shared.ready.try_recv() {
                Ok(victim) => {
                    alloc.release(victim);
                    dropped = true;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                    // The reader may have handed its tail back in the meantime
                    return alloc
                        .acquire(len, Duration::ZERO)
                        .map(|chunk| (chunk, dropped))
                        .ok_or(BufferError::Stall);
                }
            }
            if let Some(chunk) = alloc.acquire(len, Duration::ZERO) {
                return Ok((chunk, dropped));
            }
        }
    }

    /// Move a Chunk to the ready queue, discarding the oldest one if the
    /// queue stays full for the whole timeout
    fn enqueue(&self, chunk: Chunk) -> Result<bool, BufferError> {
        let alloc = &self.shared.alloc;
        let Some(ready) = &self.ready else {
            alloc.release(chunk);
            return Err(BufferError::Closed);
        };

        match ready.send_timeout(chunk, self.timeout) {
            Ok(()) => Ok(false),
            Err(SendTimeoutError::Timeout(chunk)) => {
                let dropped = match self.shared.ready.try_recv() {
                    Ok(victim) => {
                        alloc.release(victim);
                        true
                    }
                    Err(_) => false,
                };
                match ready.try_send(chunk) {
                    Ok(()) => Ok(dropped),
                    Err(TrySendError::Full(chunk) | TrySendError::Disconnected(chunk)) => {
                        alloc.release(chunk);
                        Err(BufferError::Stall)
                    }
                }
            }
            Err(SendTimeoutError::Disconnected(chunk)) => {
                alloc.release(chunk);
                Err(BufferError::Closed)
            }
        }
    }

    /// Make the partially filled head Chunk visible to the reader
    ///
    /// Does nothing if no bytes were written since the last fill or flush.
    ///
    /// # Errors
    /// Returns `Stall` if the ready queue stays full and nothing can be
    /// discarded from it.
    pub fn flush(&mut self) -> Result<(), BufferError> {
        let Some(head) = self.head.take() else {
            return Ok(());
        };
        if self.enqueue(head)? {
            self.drops += 1;
            log::debug!("flush dropped an unread chunk: {self:?}");
        }
        Ok(())
    }

    /// Flush and stop accepting writes
    ///
    /// The reader drains what is queued and then gets `EndOfStream`.
    /// Closing twice is the same as closing once.
    ///
    /// # Errors
    /// Returns the error of the final flush; the writer is closed regardless.
    pub fn close(&mut self) -> Result<(), BufferError> {
        if self.ready.is_none() {
            log::warn!("Writer::close() called on already closed writer: {self:?}");
            return Ok(());
        }
        let flushed = self.flush();
        self.ready = None;
        log::debug!("writer closed: {self:?}");
        flushed
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.ready.is_none()
    }

    /// Number of Chunks waiting for the reader
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.ready.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest payload a single write may carry
    #[must_use]
    pub fn max_write(&self) -> usize {
        self.max
    }

    /// Number of writes and flushes that discarded unread data
    #[must_use]
    pub fn drops(&self) -> u64 {
        self.drops
    }

    /// Bytes accounted by the backend, if it keeps accounts
    #[must_use]
    pub fn allocated(&self) -> Option<usize> {
        self.shared.alloc.allocated()
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Buffer.Writer(backend={}, closed={}, stalled={}, head={}, ready={}, drops={})",
            self.shared.alloc.name(),
            self.is_closed(),
            self.stalled,
            self.head.as_ref().map_or(0, Chunk::len),
            self.shared.ready.len(),
            self.drops
        )
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if !self.is_closed() {
            let _ = self.close();
        }
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Writer::write(self, buf)
            .map(|written| written.len)
            .map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Writer::flush(self).map_err(Into::into)
    }
}

impl embedded_io::ErrorType for Writer {
    type Error = BufferError;
}

impl embedded_io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Writer::write(self, buf).map(|written| written.len)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Writer::flush(self)
    }
}

/// The Chunk being read, with the handle that names it
struct Tail {
    handle: Handle,
    chunk: Chunk,
}

/// Consumer half of a buffer
///
/// [`Reader::next`] makes the oldest ready Chunk the tail; [`Reader::read`]
/// drains it, or [`Reader::write_to`] forwards it whole and
/// [`Reader::close_chunk`] lets it go.
pub struct Reader {
    shared: Arc<Shared>,
    tail: Option<Tail>,
}

impl Reader {
    /// Make the next ready Chunk the tail, waiting up to `timeout`
    ///
    /// If a tail is already held, its handle is returned again.
    ///
    /// # Errors
    /// - `Timeout` if nothing became ready in time; retry
    /// - `EndOfStream` once the writer is closed and everything was drained;
    ///   every later call returns it too
    pub fn next(&mut self, timeout: Duration) -> Result<Handle, BufferError> {
        if let Some(tail) = &self.tail {
            return Ok(tail.handle);
        }
        match self.shared.ready.recv_timeout(timeout) {
            Ok(chunk) => {
                let handle = Handle::next();
                self.tail = Some(Tail { handle, chunk });
                Ok(handle)
            }
            Err(RecvTimeoutError::Timeout) => Err(BufferError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(BufferError::EndOfStream),
        }
    }

    /// Read from the tail; a fully drained tail goes back to the allocator
    ///
    /// # Errors
    /// Returns `EndOfStream` if there is no tail; call [`Reader::next`].
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, BufferError> {
        let Some(tail) = self.tail.as_mut() else {
            return Err(BufferError::EndOfStream);
        };
        let result = tail.chunk.read(buf);
        if tail.chunk.is_empty() {
            self.release_tail();
        }
        result
    }

    /// Unread part of the tail
    ///
    /// # Panics
    /// Panics if `handle` does not name the current tail.
    #[must_use]
    pub fn bytes(&self, handle: Handle) -> &[u8] {
        self.current(handle).bytes()
    }

    /// Write the whole tail to `w` without consuming it
    ///
    /// Repeated calls write the same data until the Chunk is closed.
    ///
    /// # Errors
    /// Returns `Io` if the sink fails.
    ///
    /// # Panics
    /// Panics if `handle` does not name the current tail.
    pub fn write_to<W: io::Write + ?Sized>(
        &self,
        handle: Handle,
        w: &mut W,
    ) -> Result<usize, BufferError> {
        self.current(handle).write_to(w)
    }

    /// Give the tail back to the allocator
    ///
    /// A handle that no longer names the tail is ignored, so closing twice is
    /// harmless.
    ///
    /// # Errors
    /// Currently infallible; returns `Result` for symmetry with
    /// [`Writer::close`].
    pub fn close_chunk(&mut self, handle: Handle) -> Result<(), BufferError> {
        if self.tail.as_ref().is_some_and(|tail| tail.handle == handle) {
            self.release_tail();
        }
        Ok(())
    }

    /// Handle of the current tail, if any
    #[must_use]
    pub fn tail(&self) -> Option<Handle> {
        self.tail.as_ref().map(|tail| tail.handle)
    }

    /// Number of Chunks waiting behind the tail
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.ready.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self, handle: Handle) -> &Chunk {
        match &self.tail {
            Some(tail) if tail.handle == handle => &tail.chunk,
            _ => panic!("framebuf: invalid use of buffer chunk {handle:?}"),
        }
    }

    fn release_tail(&mut self) {
        if let Some(tail) = self.tail.take() {
            self.shared.alloc.release(tail.chunk);
        }
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Buffer.Reader(backend={}, tail={:?}, ready={})",
            self.shared.alloc.name(),
            self.tail(),
            self.shared.ready.len()
        )
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.release_tail();
    }
}

impl io::Read for Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match Reader::read(self, buf) {
            Err(BufferError::EndOfStream) => Ok(0),
            other => other.map_err(Into::into),
        }
    }
}

impl embedded_io::ErrorType for Reader {
    type Error = BufferError;
}

impl embedded_io::Read for Reader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match Reader::read(self, buf) {
            Err(BufferError::EndOfStream) => Ok(0),
            other => other,
        }
    }
}

/// A buffer with both of its halves
///
/// Use [`Buffer::split`] to hand the halves to a producer and a consumer.
pub struct Buffer {
    writer: Writer,
    reader: Reader,
}

impl Buffer {
    /// Build a buffer as described by `config`
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn new(config: &BufferConfig) -> Result<Self, BufferError> {
        config.validate()?;
        match config.backend {
            Backend::Slotted => Self::slotted(config.len, config.size, config.timeout),
            Backend::Pooled => Self::pooled(config.len, config.size, config.timeout),
            Backend::Unpooled => Self::unpooled(config.len, config.size, config.timeout),
        }
    }

    /// Ring of `len` Chunks of `size` bytes each
    ///
    /// A write longer than `size` is refused. `timeout` bounds how long a
    /// write waits for a free Chunk before discarding the oldest ready one.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `len` or `size` is zero.
    pub fn slotted(len: usize, size: usize, timeout: Duration) -> Result<Self, BufferError> {
        let slots = SlotAllocator::new(len, size)?;
        Self::with_allocator(Arc::new(slots), len, size, timeout)
    }

    /// One Chunk per write drawn from the process-wide [`BytePool`]
    ///
    /// At most `len` Chunks wait for the reader and a single write may carry
    /// up to `max` bytes.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `len` or `max` is zero.
    pub fn pooled(len: usize, max: usize, timeout: Duration) -> Result<Self, BufferError> {
        Self::with_allocator(BytePool::global(), len, max, timeout)
    }

    /// One exactly sized Chunk per write, without accounting
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `len` or `max` is zero.
    pub fn unpooled(len: usize, max: usize, timeout: Duration) -> Result<Self, BufferError> {
        Self::with_allocator(Arc::new(Unpooled), len, max, timeout)
    }

    /// Buffer over an explicit backend
    ///
    /// `len` is the depth of the ready queue and `max` the largest single write.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `len` or `max` is zero.
    pub fn with_allocator(
        alloc: Arc<dyn Allocator>,
        len: usize,
        max: usize,
        timeout: Duration,
    ) -> Result<Self, BufferError> {
        if len == 0 || max == 0 {
            return Err(BufferError::InvalidConfig(format!(
                "buffer needs a queue of at least one chunk and writes of at least one byte, got len={len} max={max}"
            )));
        }
        let (tx, rx) = crossbeam_channel::bounded(len);
        let shared = Arc::new(Shared { alloc, ready: rx });
        Ok(Self {
            writer: Writer {
                shared: Arc::clone(&shared),
                ready: Some(tx),
                head: None,
                max,
                timeout,
                stalled: false,
                drops: 0,
            },
            reader: Reader { shared, tail: None },
        })
    }

    /// Separate the producer and consumer halves
    #[must_use]
    pub fn split(self) -> (Writer, Reader) {
        (self.writer, self.reader)
    }

    #[must_use]
    pub fn writer(&mut self) -> &mut Writer {
        &mut self.writer
    }

    #[must_use]
    pub fn reader(&mut self) -> &mut Reader {
        &mut self.reader
    }

    /// Number of ready Chunks
    #[must_use]
    pub fn len(&self) -> usize {
        self.writer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer(writer={:?}, reader={:?})", self.writer, self.reader)
    }
}
