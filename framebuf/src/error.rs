//! Error type shared by every buffer backend
//!
//! `Timeout` is the only temporary condition; callers are expected to loop on it.
//! A drop caused by a write is not an error, see [`crate::buffer::Written`].

use std::io;

/// Error type for buffer operations
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// A single write is larger than any Chunk of this buffer can hold
    #[error("write too long for buffer: length {len}, maximum {max}")]
    TooLong { len: usize, max: usize },

    /// A single write is larger than the whole byte budget of the pool
    #[error("write too long for buffer pool: length {len}, ceiling {ceiling}")]
    TooLongForPool { len: usize, ceiling: usize },

    /// No Chunk could be obtained or reclaimed; the buffer is misconfigured
    #[error("unable to dump old write")]
    Stall,

    /// Nothing happened within the timeout; retry
    #[error("buffer cycle timeout")]
    Timeout,

    /// Write attempted after close
    #[error("write to closed buffer")]
    Closed,

    /// The buffer is closed and fully drained, or there is no Chunk to read
    #[error("end of stream")]
    EndOfStream,

    #[error("invalid buffer configuration: {0}")]
    InvalidConfig(String),

    /// Sink error while forwarding a Chunk
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BufferError {
    /// Whether retrying the same call may succeed
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl embedded_io::Error for BufferError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Self::TooLong { .. } | Self::TooLongForPool { .. } | Self::InvalidConfig(_) => {
                embedded_io::ErrorKind::InvalidInput
            }
            Self::Timeout => embedded_io::ErrorKind::TimedOut,
            Self::Closed => embedded_io::ErrorKind::BrokenPipe,
            Self::Stall | Self::EndOfStream | Self::Io(_) => embedded_io::ErrorKind::Other,
        }
    }
}

impl From<BufferError> for io::Error {
    fn from(e: BufferError) -> Self {
        let kind = match e {
            BufferError::Io(inner) => return inner,
            BufferError::TooLong { .. }
            | BufferError::TooLongForPool { .. }
            | BufferError::InvalidConfig(_) => io::ErrorKind::InvalidInput,
            BufferError::Timeout => io::ErrorKind::TimedOut,
            BufferError::Closed => io::ErrorKind::BrokenPipe,
            BufferError::EndOfStream => io::ErrorKind::UnexpectedEof,
            BufferError::Stall => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeout_is_temporary() {
        assert!(BufferError::Timeout.is_temporary());
        assert!(!BufferError::Stall.is_temporary());
        assert!(!BufferError::Closed.is_temporary());
        assert!(!BufferError::EndOfStream.is_temporary());
    }

    #[test]
    fn test_io_error_kinds() {
        let e: io::Error = BufferError::Closed.into();
        assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);

        let e: io::Error = BufferError::TooLong { len: 10, max: 5 }.into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);

        let inner = io::Error::new(io::ErrorKind::WriteZero, "sink full");
        let e: io::Error = BufferError::Io(inner).into();
        assert_eq!(e.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn test_embedded_io_kind() {
        use embedded_io::Error;
        assert_eq!(
            BufferError::Timeout.kind(),
            embedded_io::ErrorKind::TimedOut
        );
        assert_eq!(
            BufferError::Closed.kind(),
            embedded_io::ErrorKind::BrokenPipe
        );
    }
}
