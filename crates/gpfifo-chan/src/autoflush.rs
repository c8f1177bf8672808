//! # Auto-flush Controller
//!
//! Decides when written commands are closed into descriptors and published
//! without an explicit flush.
//!
//! - byte trigger: full flush once `T` bytes were written since the last flush
//! - auto-close: close the open span once it reaches `C` bytes
//! - descriptor trigger: full flush once `N` descriptors are unpublished,
//!   `N = T / C` with auto-close, else `capacity * T / size`

use gpfifo_core::{Error, Result};

use crate::random::Pcg32;

// =============================================================================
// THRESHOLD SPECIFICATION
// =============================================================================

/// How a threshold is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThresholdSpec {
    /// Trigger disabled
    #[default]
    Disabled,
    /// Fixed threshold in bytes
    Fixed(u32),
    /// Threshold drawn from `[min, max]` with a seeded generator
    Random {
        /// Generator seed
        seed: u64,
        /// Lowest threshold
        min: u32,
        /// Highest threshold
        max: u32,
    },
}

impl ThresholdSpec {
    /// Resolve to a concrete threshold
    pub fn resolve(&self) -> Result<Option<u32>> {
        match *self {
            Self::Disabled => Ok(None),
            Self::Fixed(value) => Ok(Some(value)),
            Self::Random { seed, min, max } => {
                if min > max {
                    return Err(Error::InvalidParameter);
                }
                Ok(Some(Pcg32::new(seed).next_in_range(min, max)))
            }
        }
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// Threshold state for one channel
#[derive(Debug, Clone)]
pub struct AutoFlush {
    pushbuffer_size: u32,
    capacity: u32,
    flush_bytes: Option<u32>,
    close_bytes: Option<u32>,
    entry_limit: Option<u32>,
    /// Total byte count at which the byte trigger fires
    next_flush_mark: u64,
}

impl AutoFlush {
    /// Create a controller with both triggers disabled
    pub fn new(pushbuffer_size: u32, capacity: u32) -> Self {
        Self {
            pushbuffer_size,
            capacity,
            flush_bytes: None,
            close_bytes: None,
            entry_limit: None,
            next_flush_mark: u64::MAX,
        }
    }

    /// Byte trigger threshold
    pub fn flush_threshold(&self) -> Option<u32> {
        self.flush_bytes
    }

    /// Auto-close threshold
    pub fn close_threshold(&self) -> Option<u32> {
        self.close_bytes
    }

    /// Unpublished descriptor limit
    pub fn entry_limit(&self) -> Option<u32> {
        self.entry_limit
    }

    /// Total byte count at which the byte trigger fires next
    pub fn next_flush_mark(&self) -> Option<u64> {
        self.flush_bytes.map(|_| self.next_flush_mark)
    }

    /// Configure the byte trigger
    ///
    /// `total_bytes` is the channel's running byte count; the first mark is
    /// placed `T` bytes after it.
    pub fn configure_flush(&mut self, spec: ThresholdSpec, total_bytes: u64) -> Result<()> {
        let threshold = spec.resolve()?;
        if let Some(t) = threshold {
            if t == 0 || t >= self.pushbuffer_size {
                return Err(Error::InvalidParameter);
            }
        }
        self.flush_bytes = threshold;
        self.rearm(total_bytes);
        self.update_entry_limit();
        log::debug!("AutoFlush: flush threshold {:?}", threshold);
        Ok(())
    }

    /// Configure auto-close
    pub fn configure_close(&mut self, spec: ThresholdSpec) -> Result<()> {
        let threshold = spec.resolve()?;
        if let Some(c) = threshold {
            if c < 4 || c >= self.pushbuffer_size {
                return Err(Error::InvalidParameter);
            }
        }
        self.close_bytes = threshold;
        self.update_entry_limit();
        log::debug!("AutoFlush: close threshold {:?}", threshold);
        Ok(())
    }

    fn update_entry_limit(&mut self) {
        self.entry_limit = self.flush_bytes.map(|t| {
            let n = match self.close_bytes {
                Some(c) => u64::from(t / c),
                None => u64::from(self.capacity) * u64::from(t) / u64::from(self.pushbuffer_size),
            };
            n.clamp(1, u64::from(self.capacity - 1)) as u32
        });
    }

    /// Place the next byte mark after a flush
    pub fn rearm(&mut self, total_bytes: u64) {
        self.next_flush_mark = match self.flush_bytes {
            Some(t) => total_bytes + u64::from(t),
            None => u64::MAX,
        };
    }

    /// Check whether the open span should be closed
    #[inline]
    pub fn should_close(&self, open_len: u32) -> bool {
        matches!(self.close_bytes, Some(c) if open_len >= c)
    }

    /// Check whether a full flush is due
    #[inline]
    pub fn should_flush(&self, total_bytes: u64, unpublished: u32) -> bool {
        if self.flush_bytes.is_none() {
            return false;
        }
        total_bytes >= self.next_flush_mark
            || matches!(self.entry_limit, Some(n) if unpublished >= n)
    }
}
