use std::sync::atomic::{AtomicU64, Ordering};

/// Token naming the Chunk a [`crate::Reader`] currently holds as its tail
///
/// Handles are unique within the process, so a handle from one buffer never
/// matches the tail of another, and a handle whose Chunk was released never
/// matches again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    id: u64,
}

impl Handle {
    #[must_use]
    pub(crate) fn next() -> Self {
        Self {
            id: TAIL_IDS.take(),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Monotonic source of handle ids, starting at 1
#[derive(Debug)]
pub(crate) struct IdGen {
    next_id: AtomicU64,
}

impl IdGen {
    pub(crate) const fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn take(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

static TAIL_IDS: IdGen = IdGen::new();
