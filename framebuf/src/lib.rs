//! Bounded, frame-oriented buffers that drop the oldest data under pressure
//!
//! A producer writes frames through a [`Writer`] and a consumer takes whole
//! Chunks from a [`Reader`]. Memory comes from one of three backends: a fixed
//! slot ring, a byte-budgeted pool shared by the process, or plain exact
//! allocations.

pub mod alloc;
pub mod bitrate;
pub mod buffer;
pub mod chunk;
pub mod config;
pub mod error;
pub mod handle;
pub mod pool;
pub mod slot;

// Re-export buffer types for convenience
pub use buffer::{Buffer, Reader, Writer, Written};

// Re-export backends for convenience
pub use crate::alloc::{Allocator, Unpooled};
pub use pool::BytePool;
pub use slot::SlotAllocator;

pub use chunk::Chunk;
pub use config::{Backend, BufferConfig};
pub use error::BufferError;
pub use handle::Handle;
