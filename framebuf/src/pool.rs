//! BytePool - byte-budgeted Chunk allocation shared by many buffers
//!
//! Every Chunk handed out is charged to a ledger guarded by a single mutex.
//! The lock is held only for the counter update and for popping victims
//! off a ready queue without waiting.
//!
//! Chunk memory comes from power-of-two buckets, so repeated writes of similar
//! size reuse allocations instead of going back to the allocator. Recycled
//! memory parked in a bucket is not charged. A write whose bucket would not fit
//! the ceiling gets an exactly sized Chunk instead.
//!
//! The process-wide pool starts with an empty ledger and a ceiling of
//! [`DEFAULT_CEILING`]; see [`allocated`] and [`set_ceiling`].

use crossbeam_channel::{Receiver, TryRecvError};
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::alloc::Allocator;
use crate::chunk::Chunk;
use crate::error::BufferError;

/// Ceiling of the process-wide pool until [`set_ceiling`] is called
pub const DEFAULT_CEILING: usize = 1 << 20;

/// Bucket `i` holds allocations of `1 << i` bytes
const BUCKETS: usize = usize::BITS as usize;

/// Allocations kept per bucket for reuse; extra releases are freed
const RECYCLE_DEPTH: usize = 16;

static GLOBAL: LazyLock<Arc<BytePool>> = LazyLock::new(|| Arc::new(BytePool::new(DEFAULT_CEILING)));

/// Bytes currently charged to the process-wide pool
#[must_use]
pub fn allocated() -> usize {
    GLOBAL.allocated()
}

/// Change the ceiling of the process-wide pool
///
/// Lowering it below the current allocation takes effect on the next write
/// of each buffer, which steals until the ledger fits again.
pub fn set_ceiling(n: usize) {
    GLOBAL.set_ceiling(n);
}

/// Index of the smallest power-of-two bucket holding `len` bytes
///
/// That is the ceiling of the base 2 logarithm of `len`, with 0 and 1 both
/// mapping to bucket 0.
#[must_use]
pub fn bucket_of(len: usize) -> usize {
    if len <= 1 {
        0
    } else {
        (usize::BITS - (len - 1).leading_zeros()) as usize
    }
}

struct Ledger {
    allocated: usize,
    ceiling: usize,
}

impl Ledger {
    fn fits(&self, charge: usize) -> bool {
        self.allocated
            .checked_add(charge)
            .is_some_and(|total| total <= self.ceiling)
    }

    fn credit(&mut self, charge: usize) {
        self.allocated = self
            .allocated
            .checked_sub(charge)
            .unwrap_or_else(|| panic!("framebuf: negative allocation ({} - {charge})", self.allocated));
    }
}

/// Byte-budgeted allocator
///
/// Uses interior mutability so one pool can back any number of buffers
/// through `Arc<BytePool>`.
pub struct BytePool {
    ledger: Mutex<Ledger>,
    /// `None` for an exact pool: no rounding and no reuse
    buckets: Option<Box<[ArrayQueue<Vec<u8>>]>>,
}

impl BytePool {
    /// Create a bucketed pool with its own ledger
    #[must_use]
    pub fn new(ceiling: usize) -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                allocated: 0,
                ceiling,
            }),
            buckets: Some((0..BUCKETS).map(|_| ArrayQueue::new(RECYCLE_DEPTH)).collect()),
        }
    }

    /// Create a pool that charges and allocates exactly the written length
    #[must_use]
    pub fn exact(ceiling: usize) -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                allocated: 0,
                ceiling,
            }),
            buckets: None,
        }
    }

    /// The process-wide pool
    #[must_use]
    pub fn global() -> Arc<BytePool> {
        Arc::clone(&GLOBAL)
    }

    /// Bytes currently charged
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.ledger.lock().allocated
    }

    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.ledger.lock().ceiling
    }

    pub fn set_ceiling(&self, n: usize) {
        self.ledger.lock().ceiling = n;
    }

    /// Free all recycled memory, returning the number of bytes given back
    pub fn shrink(&self) -> usize {
        let Some(buckets) = &self.buckets else {
            return 0;
        };
        let mut freed = 0;
        for bucket in buckets.iter() {
            while let Some(buf) = bucket.pop() {
                freed += buf.capacity();
            }
        }
        freed
    }

    /// Bytes charged for a Chunk holding `len` bytes
    ///
    /// `None` if the rounded size does not fit in `usize`.
    #[must_use]
    pub fn charge_for(&self, len: usize) -> Option<usize> {
        if self.buckets.is_none() {
            return Some(len);
        }
        1usize.checked_shl(u32::try_from(bucket_of(len)).ok()?)
    }

    /// Bytes charged for `len` under `ceiling`
    ///
    /// The bucket size when it fits the ceiling, otherwise exactly `len`, so
    /// any write up to the ceiling can be served. `None` if `len` alone
    /// exceeds the ceiling.
    fn charge_under(&self, len: usize, ceiling: usize) -> Option<usize> {
        if len > ceiling {
            return None;
        }
        Some(
            self.charge_for(len)
                .filter(|&charge| charge <= ceiling)
                .unwrap_or(len),
        )
    }

    fn take(&self, charge: usize) -> Vec<u8> {
        if !charge.is_power_of_two() {
            return Vec::with_capacity(charge);
        }
        self.buckets
            .as_ref()
            .and_then(|buckets| buckets.get(bucket_of(charge)))
            .and_then(ArrayQueue::pop)
            .unwrap_or_else(|| Vec::with_capacity(charge))
    }

    fn recycle(&self, chunk: Chunk) {
        let Some(buckets) = &self.buckets else {
            return;
        };
        // Exact-size charges never go back to a bucket
        let charge = chunk.charge();
        if !charge.is_power_of_two() {
            return;
        }
        if let Some(bucket) = buckets.get(bucket_of(charge)) {
            // A full bucket just lets the memory go
            let _ = bucket.push(chunk.into_vec());
        }
    }
}

impl Default for BytePool {
    fn default() -> Self {
        Self::new(DEFAULT_CEILING)
    }
}

impl Allocator for BytePool {
    fn name(&self) -> &'static str {
        if self.buckets.is_some() {
            "pooled"
        } else {
            "exact"
        }
    }

    fn acquire(&self, len: usize, _timeout: Duration) -> Option<Chunk> {
        let charge = {
            let mut ledger = self.ledger.lock();
            let charge = self.charge_under(len, ledger.ceiling)?;
            if !ledger.fits(charge) {
                log::debug!(
                    "pool.acquire: no room for {charge} bytes (allocated {}, ceiling {})",
                    ledger.allocated,
                    ledger.ceiling
                );
                return None;
            }
            ledger.allocated += charge;
            charge
        };
        Some(Chunk::new(self.take(charge), len).with_charge(charge))
    }

    fn release(&self, chunk: Chunk) {
        self.ledger.lock().credit(chunk.charge());
        self.recycle(chunk);
    }

    fn steal(&self, ready: &Receiver<Chunk>, want: usize) -> Result<bool, BufferError> {
        let mut ledger = self.ledger.lock();
        let Some(charge) = self.charge_under(want, ledger.ceiling) else {
            return Err(BufferError::TooLongForPool {
                len: want,
                ceiling: ledger.ceiling,
            });
        };

        let mut dropped = false;
        while !ledger.fits(charge) {
            match ready.try_recv() {
                Ok(victim) => {
                    ledger.credit(victim.charge());
                    self.recycle(victim);
                    dropped = true;
                }
                Err(TryRecvError::Empty) => {
                    log::error!(
                        "pool.steal: ready queue exhausted with {} of {} bytes allocated, {charge} wanted",
                        ledger.allocated,
                        ledger.ceiling
                    );
                    return Err(BufferError::Stall);
                }
                Err(TryRecvError::Disconnected) => return Err(BufferError::Closed),
            }
        }
        Ok(dropped)
    }

    fn allocated(&self) -> Option<usize> {
        Some(BytePool::allocated(self))
    }
}

impl fmt::Debug for BytePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ledger = self.ledger.lock();
        write!(
            f,
            "BytePool(kind={}, allocated={}, ceiling={})",
            self.name(),
            ledger.allocated,
            ledger.ceiling
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_of() {
        let cases = [
            (0, 0),
            (1, 0),
            (2, 1),
            (3, 2),
            (4, 2),
            (5, 3),
            (40, 6),
            (64, 6),
            (65, 7),
            (1 << 20, 20),
            ((1 << 20) + 1, 21),
        ];
        for (len, want) in cases {
            assert_eq!(bucket_of(len), want, "bucket_of({len})");
        }
    }

    #[test]
    fn test_bucket_of_is_ceil_log2() {
        for len in 1usize..4096 {
            let b = bucket_of(len);
            assert!(1usize << b >= len, "bucket {b} too small for {len}");
            if b > 0 {
                assert!(1usize << (b - 1) < len, "bucket {b} too large for {len}");
            }
        }
    }

    #[test]
    fn test_acquire_charges_capacity() {
        let pool = BytePool::new(1024);
        let chunk = pool.acquire(40, Duration::ZERO).unwrap();
        assert_eq!(chunk.limit(), 40);
        assert!(chunk.capacity() >= 64);
        assert_eq!(pool.allocated(), 64);

        pool.release(chunk);
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_release_recycles_memory() {
        let pool = BytePool::new(1024);
        let mut chunk = pool.acquire(100, Duration::ZERO).unwrap();
        chunk.write(b"payload");
        let ptr = chunk.contents().as_ptr();
        pool.release(chunk);

        let chunk = pool.acquire(120, Duration::ZERO).unwrap();
        assert!(chunk.is_empty());
        assert_eq!(chunk.limit(), 120);
        assert_eq!(chunk.contents().as_ptr(), ptr);
        assert_eq!(pool.shrink(), 0);
        pool.release(chunk);
        assert!(pool.shrink() >= 128);
    }

    #[test]
    fn test_acquire_refuses_over_ceiling() {
        let pool = BytePool::new(64);
        let chunk = pool.acquire(40, Duration::ZERO).unwrap();
        assert!(pool.acquire(1, Duration::ZERO).is_none());
        pool.release(chunk);
        assert!(pool.acquire(1, Duration::ZERO).is_some());
    }

    #[test]
    fn test_exact_pool() {
        let pool = BytePool::exact(100);
        let chunk = pool.acquire(40, Duration::ZERO).unwrap();
        assert_eq!(pool.allocated(), 40);
        assert_eq!(pool.charge_for(33), Some(33));
        pool.release(chunk);
        assert_eq!(pool.allocated(), 0);
        assert_eq!(pool.shrink(), 0);
    }

    #[test]
    fn test_steal_drops_oldest_until_fits() {
        let pool = BytePool::new(128);
        let (tx, rx) = crossbeam_channel::bounded(4);
        for frame in [b"first".as_slice(), b"second"] {
            let mut chunk = pool.acquire(60, Duration::ZERO).unwrap();
            chunk.write(frame);
            tx.send(chunk).unwrap();
        }
        assert_eq!(pool.allocated(), 128);

        assert!(pool.steal(&rx, 50).unwrap());
        assert_eq!(pool.allocated(), 64);
        let survivor = rx.try_recv().unwrap();
        assert_eq!(survivor.contents(), b"second");
        pool.release(survivor);
    }

    #[test]
    fn test_steal_without_pressure() {
        let pool = BytePool::new(128);
        let (_tx, rx) = crossbeam_channel::bounded::<Chunk>(1);
        assert!(!pool.steal(&rx, 100).unwrap());
    }

    #[test]
    fn test_steal_too_long_for_pool() {
        let pool = BytePool::new(64);
        let (_tx, rx) = crossbeam_channel::bounded::<Chunk>(1);
        assert!(matches!(
            pool.steal(&rx, 65),
            Err(BufferError::TooLongForPool {
                len: 65,
                ceiling: 64
            })
        ));
    }

    #[test]
    fn test_steal_stalls_on_empty_queue() {
        let pool = BytePool::new(64);
        let held = pool.acquire(64, Duration::ZERO).unwrap();
        let (_tx, rx) = crossbeam_channel::bounded::<Chunk>(1);
        assert!(matches!(pool.steal(&rx, 1), Err(BufferError::Stall)));
        pool.release(held);
    }

    #[test]
    fn test_oversized_bucket_charges_exact() {
        // 600_000 rounds up to 1 MiB, which does not fit
        let pool = BytePool::new(1_000_000);
        let (_tx, rx) = crossbeam_channel::bounded::<Chunk>(1);
        assert!(!pool.steal(&rx, 600_000).unwrap());

        let chunk = pool.acquire(600_000, Duration::ZERO).unwrap();
        assert_eq!(chunk.limit(), 600_000);
        assert_eq!(pool.allocated(), 600_000);
        assert!(pool.acquire(400_001, Duration::ZERO).is_none());

        pool.release(chunk);
        assert_eq!(pool.allocated(), 0);
        // Not recycled into the 1 MiB bucket
        assert_eq!(pool.shrink(), 0);
        let chunk = pool.acquire(1 << 19, Duration::ZERO).unwrap();
        assert_eq!(pool.allocated(), 1 << 19);
        pool.release(chunk);
    }

    #[test]
    #[should_panic(expected = "negative allocation")]
    fn test_foreign_release_underflows() {
        let pool = BytePool::new(64);
        pool.release(Chunk::with_limit(8).with_charge(8));
    }
}
