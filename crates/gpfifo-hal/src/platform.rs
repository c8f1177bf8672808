//! # Platform Abstraction
//!
//! Time, yielding and barrier services a channel needs while it waits on a
//! consumer.

use crate::fence;

// =============================================================================
// PLATFORM TRAIT
// =============================================================================

/// Platform services used by bounded waits
///
/// Each target (Helix, a hosted test process, a simulator) implements this
/// trait to provide time and scheduling.
pub trait Platform {
    /// Get platform name
    fn name(&self) -> &'static str;

    /// Get current monotonic time in nanoseconds
    fn now_ns(&self) -> u64;

    /// Give up the CPU for a moment
    fn yield_now(&mut self);

    /// Sleep for microseconds (busy-wait in no_std)
    fn sleep_us(&mut self, us: u64);

    /// Drain write-combining buffers before a doorbell
    fn flush_write_combining(&mut self) {
        fence::write_combine_flush();
    }
}

static_assertions::assert_obj_safe!(Platform);

// =============================================================================
// HOSTED PLATFORM
// =============================================================================

/// Platform backed by the host operating system
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct HostPlatform {
    start: std::time::Instant,
}

#[cfg(feature = "std")]
impl HostPlatform {
    /// Create a platform whose clock starts now
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Platform for HostPlatform {
    fn name(&self) -> &'static str {
        "host"
    }

    fn now_ns(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn yield_now(&mut self) {
        std::thread::yield_now();
    }

    fn sleep_us(&mut self, us: u64) {
        std::thread::sleep(std::time::Duration::from_micros(us));
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_host_clock_advances() {
        let mut platform = HostPlatform::new();
        let before = platform.now_ns();
        platform.sleep_us(50);
        assert!(platform.now_ns() >= before + 50_000);
        platform.flush_write_combining();
    }
}
