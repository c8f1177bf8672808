//! # Null Channel
//!
//! Channel without consumers. Writes are validated and counted, then
//! dropped; flushes and waits complete immediately.

use core::time::Duration;

use gpfifo_core::{ChannelId, Error, GpuAddr, Result};

use crate::autoflush::ThresholdSpec;
use crate::channel::{Channel, ChannelStats};
use crate::encoder::MethodMode;
use crate::sticky::StickyError;

/// Channel that accepts and drops every command
#[derive(Debug)]
pub struct NullChannel {
    id: ChannelId,
    sticky: StickyError,
    stats: ChannelStats,
}

impl NullChannel {
    /// Create a null channel
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            sticky: StickyError::new(id),
            stats: ChannelStats::default(),
        }
    }
}

impl Channel for NullChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn write_method(
        &mut self,
        mode: MethodMode,
        _subchannel: u32,
        _method: u32,
        data: &[u32],
    ) -> Result<()> {
        self.sticky.check()?;
        let words = match mode {
            MethodMode::Immediate if data.len() != 1 => return Err(Error::InvalidParameter),
            MethodMode::Immediate => 1,
            _ => data.len() as u64 + 1,
        };
        self.stats.methods_written += 1;
        self.stats.bytes_written += words * 4;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.sticky.check()?;
        self.stats.redundant_publishes += 1;
        Ok(())
    }

    fn wait_idle(&mut self, _timeout: Duration) -> Result<()> {
        self.sticky.check()
    }

    fn insert_subroutine(&mut self, _addr: GpuAddr, _length: u32) -> Result<()> {
        self.sticky.check()?;
        Err(Error::NotSupported)
    }

    fn error(&self) -> Option<Error> {
        self.sticky.error()
    }

    fn clear_error(&mut self) {
        self.sticky.clear();
    }

    fn recover(&mut self) -> Result<()> {
        self.sticky.recover()
    }

    fn set_auto_flush(&mut self, spec: ThresholdSpec) -> Result<()> {
        spec.resolve().map(|_| ())
    }

    fn set_auto_close(&mut self, spec: ThresholdSpec) -> Result<()> {
        spec.resolve().map(|_| ())
    }

    fn stats(&self) -> ChannelStats {
        self.stats
    }
}
