//! Throughput measurement for consumers

use parking_lot::Mutex;
use std::time::Instant;

struct Window {
    sent: u64,
    since: Instant,
}

/// Counts bytes and reports the bit rate between two readings
///
/// Shared by reference between the thread that moves data and the one that
/// prints statistics.
pub struct Calculator {
    window: Mutex<Window>,
}

impl Calculator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            window: Mutex::new(Window {
                sent: 0,
                since: Instant::now(),
            }),
        }
    }

    /// Account `bytes` moved since the last reading
    pub fn report(&self, bytes: usize) {
        let mut window = self.window.lock();
        window.sent = window.sent.saturating_add(bytes as u64);
    }

    /// Bits per second since the previous call, starting a new window
    ///
    /// Returns 0 if no time has passed.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn bitrate(&self) -> u64 {
        let mut window = self.window.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(window.since).as_secs_f64();
        let bits = window.sent.saturating_mul(8);
        window.sent = 0;
        window.since = now;
        if elapsed > 0.0 {
            (bits as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new()
    }
}
