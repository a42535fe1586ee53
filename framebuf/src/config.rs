//! Construction parameters for [`crate::Buffer::new`]

use std::time::Duration;

use crate::error::BufferError;

/// Which allocator backs a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Fixed ring of `len` Chunks of `size` bytes
    #[default]
    Slotted,
    /// One Chunk per write from the process-wide byte pool
    Pooled,
    /// One exactly sized Chunk per write, no accounting
    Unpooled,
}

/// Parameters of a buffer
///
/// `len` is the slot count for [`Backend::Slotted`] and the depth of the ready
/// queue otherwise. `size` is the Chunk size for slotted buffers and the
/// largest single write otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    pub backend: Backend,
    pub len: usize,
    pub size: usize,
    pub timeout: Duration,
}

impl BufferConfig {
    #[must_use]
    pub fn new(backend: Backend, len: usize, size: usize, timeout: Duration) -> Self {
        Self {
            backend,
            len,
            size,
            timeout,
        }
    }

    /// Check that a buffer can be built from this configuration
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `len` or `size` is zero.
    pub fn validate(&self) -> Result<(), BufferError> {
        if self.len == 0 {
            return Err(BufferError::InvalidConfig(format!(
                "{:?} buffer needs len > 0",
                self.backend
            )));
        }
        if self.size == 0 {
            return Err(BufferError::InvalidConfig(format!(
                "{:?} buffer needs size > 0",
                self.backend
            )));
        }
        Ok(())
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::new(Backend::Slotted, 16, 4096, Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(BufferConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let zero_len = BufferConfig {
            len: 0,
            ..BufferConfig::default()
        };
        assert!(matches!(
            zero_len.validate(),
            Err(BufferError::InvalidConfig(_))
        ));

        let zero_size = BufferConfig::new(Backend::Pooled, 4, 0, Duration::ZERO);
        assert!(matches!(
            zero_size.validate(),
            Err(BufferError::InvalidConfig(_))
        ));
    }
}
