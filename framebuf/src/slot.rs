//! Slotted backend: a closed loop of fixed-size Chunks
//!
//! All Chunks are allocated up front. At any time each of them is the head,
//! the tail, queued as ready, or parked in the free queue owned by this
//! allocator; the total never changes.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::fmt;
use std::time::Duration;

use crate::alloc::Allocator;
use crate::chunk::Chunk;
use crate::error::BufferError;

/// Fixed number of fixed-size Chunks, recycled without deallocation
pub struct SlotAllocator {
    free_tx: Sender<Chunk>,
    free_rx: Receiver<Chunk>,
    count: usize,
    size: usize,
}

impl SlotAllocator {
    /// Allocate `count` Chunks of `size` bytes each
    ///
    /// # Errors
    /// Returns `InvalidConfig` if either argument is zero.
    pub fn new(count: usize, size: usize) -> Result<Self, BufferError> {
        if count == 0 || size == 0 {
            return Err(BufferError::InvalidConfig(format!(
                "slotted buffer needs at least one slot of at least one byte, got {count} x {size}"
            )));
        }
        let (free_tx, free_rx) = crossbeam_channel::bounded(count);
        for _ in 0..count {
            free_tx
                .try_send(Chunk::with_limit(size))
                .map_err(|_| BufferError::Stall)?;
        }
        Ok(Self {
            free_tx,
            free_rx,
            count,
            size,
        })
    }

    /// Number of Chunks in the loop
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Capacity of every Chunk
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of Chunks parked in the free queue
    #[must_use]
    pub fn free(&self) -> usize {
        self.free_rx.len()
    }
}

impl Allocator for SlotAllocator {
    fn name(&self) -> &'static str {
        "slotted"
    }

    fn acquire(&self, len: usize, timeout: Duration) -> Option<Chunk> {
        if len > self.size {
            return None;
        }
        let chunk = if timeout.is_zero() {
            self.free_rx.try_recv().ok()
        } else {
            match self.free_rx.recv_timeout(timeout) {
                Ok(chunk) => Some(chunk),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
            }
        };
        if chunk.is_none() {
            log::debug!("slot.acquire: no free slot within {timeout:?}");
        }
        chunk
    }

    fn release(&self, mut chunk: Chunk) {
        chunk.reset();
        match self.free_tx.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                panic!("framebuf: slot released twice (free queue already holds {} slots)", self.count)
            }
            // The receiver lives in `self`
            Err(TrySendError::Disconnected(_)) => unreachable!(),
        }
    }

    fn steal(&self, _ready: &Receiver<Chunk>, _want: usize) -> Result<bool, BufferError> {
        // Every Chunk already fits any accepted write; a slot is only reclaimed
        // from the ready queue when `acquire` times out.
        Ok(false)
    }

    fn allocated(&self) -> Option<usize> {
        // Fixed capacity, not a ledger
        None
    }
}

impl fmt::Debug for SlotAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SlotAllocator(count={}, size={}, free={})",
            self.count,
            self.size,
            self.free_rx.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_config() {
        assert!(matches!(
            SlotAllocator::new(0, 10),
            Err(BufferError::InvalidConfig(_))
        ));
        assert!(matches!(
            SlotAllocator::new(2, 0),
            Err(BufferError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_slots_are_conserved() {
        let slots = SlotAllocator::new(2, 50).unwrap();
        assert_eq!(slots.free(), 2);

        let a = slots.acquire(6, Duration::ZERO).unwrap();
        let b = slots.acquire(6, Duration::ZERO).unwrap();
        assert_eq!(a.limit(), 50);
        assert_eq!(slots.free(), 0);
        assert!(slots.acquire(6, Duration::from_millis(10)).is_none());

        slots.release(a);
        slots.release(b);
        assert_eq!(slots.free(), 2);
        assert_eq!(slots.allocated(), None);
    }

    #[test]
    fn test_release_resets_chunk() {
        let slots = SlotAllocator::new(1, 8).unwrap();
        let mut chunk = slots.acquire(3, Duration::ZERO).unwrap();
        chunk.write(b"abc");
        slots.release(chunk);

        let chunk = slots.acquire(3, Duration::ZERO).unwrap();
        assert!(chunk.is_empty());
        assert_eq!(chunk.remaining(), 8);
    }

    #[test]
    fn test_oversized_request_is_refused() {
        let slots = SlotAllocator::new(1, 8).unwrap();
        assert!(slots.acquire(9, Duration::ZERO).is_none());
        assert_eq!(slots.free(), 1);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn test_double_release_panics() {
        let slots = SlotAllocator::new(1, 8).unwrap();
        slots.release(Chunk::with_limit(8));
    }
}
