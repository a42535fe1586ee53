//! Allocator contract shared by all buffer backends
//!
//! A backend hands out Chunks, takes them back, and makes room by discarding
//! the oldest ready Chunk of a buffer. Three backends exist:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────┬─────────────────────┐
//! │ backend          │ Chunks                       │ budget              │
//! ├──────────────────┼──────────────────────────────┼─────────────────────┤
//! │ SlotAllocator    │ N × fixed size, recycled     │ N per buffer        │
//! │ BytePool         │ power-of-two buckets         │ bytes, process-wide │
//! │ Unpooled         │ exact size, freed on release │ none                │
//! └──────────────────┴──────────────────────────────┴─────────────────────┘
//! ```

use crossbeam_channel::Receiver;
use std::time::Duration;

use crate::chunk::Chunk;
use crate::error::BufferError;

/// Supplier and reclaimer of Chunks for one or more buffers
///
/// Implementations are shared between the producer and the consumer half of
/// a buffer and must never block while holding internal locks.
pub trait Allocator: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Obtain a Chunk able to hold `len` bytes
    ///
    /// May wait up to `timeout` for a Chunk to become free. Returns `None` if
    /// none became available in time or the budget has no room for it; the
    /// caller is then expected to reclaim a ready Chunk and try again.
    fn acquire(&self, len: usize, timeout: Duration) -> Option<Chunk>;

    /// Take back a Chunk that is no longer queued or read
    fn release(&self, chunk: Chunk);

    /// Make room for a write of `want` bytes by discarding the oldest Chunks
    /// of `ready`
    ///
    /// Never blocks. Returns whether anything was discarded.
    ///
    /// # Errors
    /// - `TooLongForPool` if `want` can never fit the budget
    /// - `Stall` if `ready` ran empty before enough room was made
    fn steal(&self, ready: &Receiver<Chunk>, want: usize) -> Result<bool, BufferError>;

    /// Bytes currently accounted by the backend, if it keeps accounts
    fn allocated(&self) -> Option<usize>;
}

/// Backend without accounting or reuse
///
/// Chunks are allocated at exactly the written size and freed on release.
/// Memory is bounded only by the depth of the ready queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unpooled;

impl Allocator for Unpooled {
    fn name(&self) -> &'static str {
        "unpooled"
    }

    fn acquire(&self, len: usize, _timeout: Duration) -> Option<Chunk> {
        Some(Chunk::with_limit(len))
    }

    fn release(&self, chunk: Chunk) {
        drop(chunk);
    }

    fn steal(&self, _ready: &Receiver<Chunk>, _want: usize) -> Result<bool, BufferError> {
        Ok(false)
    }

    fn allocated(&self) -> Option<usize> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpooled_is_exact() {
        let alloc = Unpooled;
        let chunk = alloc.acquire(40, Duration::ZERO).unwrap();
        assert_eq!(chunk.limit(), 40);
        assert_eq!(alloc.allocated(), None);
        alloc.release(chunk);
    }

    #[test]
    fn test_unpooled_never_steals() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        tx.send(Chunk::with_limit(4)).unwrap();
        assert!(!Unpooled.steal(&rx, 1 << 30).unwrap());
        assert_eq!(rx.len(), 1);
    }
}
