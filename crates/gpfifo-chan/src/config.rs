//! # Channel Configuration

use core::time::Duration;

use gpfifo_core::{ByteSize, Error, Result};

use crate::autoflush::ThresholdSpec;
use crate::poll::PollPolicy;

/// Ring buffer channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Channel name used in diagnostics
    pub name: &'static str,
    /// Pushbuffer size (multiple of 4 bytes)
    pub pushbuffer_size: ByteSize,
    /// Descriptor table slots (power of two)
    pub table_entries: u32,
    /// Deadline for every bounded wait
    pub timeout: Duration,
    /// Cadence of bounded waits
    pub poll: PollPolicy,
    /// Track consumer positions through semaphore cells when supported
    pub use_position_semaphores: bool,
    /// Byte trigger for automatic flushes
    pub auto_flush: ThresholdSpec,
    /// Open span length that closes a descriptor automatically
    pub auto_close: ThresholdSpec,
    /// Wrap the cursor after a close when fewer bytes remain before the end
    pub tail_reserve_bytes: u32,
    /// Publish pending descriptors instead of failing when a consumer waits
    /// for them while the table is full
    pub flush_on_table_wait: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "gpfifo",
            pushbuffer_size: ByteSize::KIB_64,
            table_entries: 512,
            timeout: Duration::from_secs(10),
            poll: PollPolicy::YIELD,
            use_position_semaphores: true,
            auto_flush: ThresholdSpec::Disabled,
            auto_close: ThresholdSpec::Disabled,
            tail_reserve_bytes: 64,
            flush_on_table_wait: true,
        }
    }
}

impl ChannelConfig {
    /// Smallest accepted pushbuffer
    pub const MIN_PUSHBUFFER_BYTES: u64 = 64;

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let size = self.pushbuffer_size.as_bytes();
        if size < Self::MIN_PUSHBUFFER_BYTES || size % 4 != 0 || size > u64::from(u32::MAX - 3) {
            return Err(Error::InvalidParameter);
        }
        if self.table_entries < 2 || !self.table_entries.is_power_of_two() {
            return Err(Error::InvalidParameter);
        }
        if self.tail_reserve_bytes % 4 != 0 || u64::from(self.tail_reserve_bytes) >= size {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }

    /// Pushbuffer size as a ring length
    pub(crate) fn pushbuffer_bytes(&self) -> u32 {
        self.pushbuffer_size.as_bytes() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ChannelConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let config = ChannelConfig {
            table_entries: 500,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidParameter));

        let config = ChannelConfig {
            pushbuffer_size: ByteSize::from_bytes(4098),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidParameter));

        let config = ChannelConfig {
            pushbuffer_size: ByteSize::from_bytes(64),
            tail_reserve_bytes: 64,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidParameter));
    }

    #[test]
    fn test_accepts_non_power_of_two_pushbuffer() {
        let config = ChannelConfig {
            pushbuffer_size: ByteSize::from_bytes(6000),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
