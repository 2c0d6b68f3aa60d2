//! Millisecond tick source.

use tokio::time::Instant;

/// Monotonic millisecond ticks that wrap at `u32::MAX`
pub trait Clock: Send + Sync {
    /// Current tick
    fn ticks_ms(&self) -> u32;
}

/// Signed distance from `start` to `end`, correct across one wrap
pub fn ticks_diff(end: u32, start: u32) -> i32 {
    end.wrapping_sub(start) as i32
}

/// Clock counting from its creation on the tokio timer, so paused test time
/// drives it
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Start counting from now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn ticks_ms(&self) -> u32 {
        // Truncation is the wrap
        self.origin.elapsed().as_millis() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ticks_diff_wraps() {
        assert_eq!(ticks_diff(10, 5), 5);
        assert_eq!(ticks_diff(5, 10), -5);
        assert_eq!(ticks_diff(3, u32::MAX - 2), 6);
        assert_eq!(ticks_diff(u32::MAX - 2, 3), -6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_follows_tokio_time() {
        let clock = MonotonicClock::new();
        assert_eq!(clock.ticks_ms(), 0);
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(clock.ticks_ms(), 1500);
    }
}
