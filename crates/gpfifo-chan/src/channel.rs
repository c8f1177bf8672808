//! # Channel Interface
//!
//! The producer-side API shared by every channel variant.

use core::time::Duration;

use gpfifo_core::{ChannelId, Error, GpuAddr, Result};

use crate::autoflush::ThresholdSpec;
use crate::encoder::MethodMode;
use crate::null::NullChannel;
use crate::ringbuf::RingBufferChannel;

// =============================================================================
// STATISTICS
// =============================================================================

/// Channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Bytes stored in the pushbuffer, headers included
    pub bytes_written: u64,
    /// Method headers written
    pub methods_written: u64,
    /// Descriptors appended to the table
    pub descriptors: u64,
    /// Publishes that rang doorbells
    pub flushes: u64,
    /// Flushes triggered by a threshold
    pub auto_flushes: u64,
    /// Spans closed by the auto-close threshold
    pub auto_closes: u64,
    /// Doorbells rung, one per consumer per publish
    pub doorbells: u64,
    /// Publishes skipped because nothing changed
    pub redundant_publishes: u64,
    /// Times the write cursor wrapped to zero
    pub wraps: u64,
    /// Writes that had to wait for a consumer
    pub pushbuffer_stalls: u64,
    /// Descriptor slots that had to wait for a consumer
    pub table_stalls: u64,
    /// Bounded waits that ran out of time
    pub timeouts: u64,
    /// Position read-backs through the consumer port
    pub position_queries: u64,
    /// Position reads from semaphore cells
    pub semaphore_reads: u64,
}

// =============================================================================
// CHANNEL TRAIT
// =============================================================================

/// Producer side of a command channel
///
/// All methods take `&mut self`: a channel has exactly one writer. While an
/// error is latched, writes, flushes, waits and subroutine inserts return it
/// without touching the consumers.
pub trait Channel {
    /// Channel identifier
    fn id(&self) -> ChannelId;

    /// Write one method header and its data words
    ///
    /// For [`MethodMode::Immediate`] `data` must hold exactly the inline
    /// value and no words follow the header.
    fn write_method(
        &mut self,
        mode: MethodMode,
        subchannel: u32,
        method: u32,
        data: &[u32],
    ) -> Result<()>;

    /// Write data to consecutive methods
    fn write(&mut self, subchannel: u32, method: u32, data: &[u32]) -> Result<()> {
        self.write_method(MethodMode::Incrementing, subchannel, method, data)
    }

    /// Write every data word to the same method
    fn write_non_inc(&mut self, subchannel: u32, method: u32, data: &[u32]) -> Result<()> {
        self.write_method(MethodMode::NonIncrementing, subchannel, method, data)
    }

    /// Write a value carried inside the header
    fn write_immediate(&mut self, subchannel: u32, method: u32, value: u32) -> Result<()> {
        self.write_method(MethodMode::Immediate, subchannel, method, &[value])
    }

    /// Close pending commands and publish them to every consumer
    fn flush(&mut self) -> Result<()>;

    /// Flush, then wait until every consumer has fetched all descriptors
    fn wait_idle(&mut self, timeout: Duration) -> Result<()>;

    /// Append a descriptor executing `length` bytes at `addr`
    fn insert_subroutine(&mut self, addr: GpuAddr, length: u32) -> Result<()>;

    /// Latched error, if any
    fn error(&self) -> Option<Error>;

    /// Force the channel back to healthy
    fn clear_error(&mut self);

    /// Try to leave the errored state
    fn recover(&mut self) -> Result<()>;

    /// Reconfigure the byte trigger for automatic flushes
    fn set_auto_flush(&mut self, spec: ThresholdSpec) -> Result<()>;

    /// Reconfigure automatic span closing
    fn set_auto_close(&mut self, spec: ThresholdSpec) -> Result<()>;

    /// Snapshot of the channel counters
    fn stats(&self) -> ChannelStats;
}

// =============================================================================
// CHANNEL VARIANTS
// =============================================================================

/// Any channel variant
#[derive(Debug)]
pub enum AnyChannel {
    /// Channel that accepts and drops everything
    Null(NullChannel),
    /// Ring buffer channel feeding consumers
    Ring(RingBufferChannel),
}

macro_rules! dispatch {
    ($self:ident, $chan:ident => $body:expr) => {
        match $self {
            AnyChannel::Null($chan) => $body,
            AnyChannel::Ring($chan) => $body,
        }
    };
}

impl AnyChannel {
    /// Ring buffer channel, if that is the variant
    pub fn as_ring(&self) -> Option<&RingBufferChannel> {
        match self {
            Self::Ring(chan) => Some(chan),
            Self::Null(_) => None,
        }
    }

    /// Mutable ring buffer channel, if that is the variant
    pub fn as_ring_mut(&mut self) -> Option<&mut RingBufferChannel> {
        match self {
            Self::Ring(chan) => Some(chan),
            Self::Null(_) => None,
        }
    }
}

impl From<NullChannel> for AnyChannel {
    fn from(chan: NullChannel) -> Self {
        Self::Null(chan)
    }
}

impl From<RingBufferChannel> for AnyChannel {
    fn from(chan: RingBufferChannel) -> Self {
        Self::Ring(chan)
    }
}

impl Channel for AnyChannel {
    fn id(&self) -> ChannelId {
        dispatch!(self, c => c.id())
    }

    fn write_method(
        &mut self,
        mode: MethodMode,
        subchannel: u32,
        method: u32,
        data: &[u32],
    ) -> Result<()> {
        dispatch!(self, c => c.write_method(mode, subchannel, method, data))
    }

    fn flush(&mut self) -> Result<()> {
        dispatch!(self, c => c.flush())
    }

    fn wait_idle(&mut self, timeout: Duration) -> Result<()> {
        dispatch!(self, c => c.wait_idle(timeout))
    }

    fn insert_subroutine(&mut self, addr: GpuAddr, length: u32) -> Result<()> {
        dispatch!(self, c => c.insert_subroutine(addr, length))
    }

    fn error(&self) -> Option<Error> {
        dispatch!(self, c => c.error())
    }

    fn clear_error(&mut self) {
        dispatch!(self, c => c.clear_error())
    }

    fn recover(&mut self) -> Result<()> {
        dispatch!(self, c => c.recover())
    }

    fn set_auto_flush(&mut self, spec: ThresholdSpec) -> Result<()> {
        dispatch!(self, c => c.set_auto_flush(spec))
    }

    fn set_auto_close(&mut self, spec: ThresholdSpec) -> Result<()> {
        dispatch!(self, c => c.set_auto_close(spec))
    }

    fn stats(&self) -> ChannelStats {
        dispatch!(self, c => c.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_methods_route_through_write_method() {
        let mut chan = AnyChannel::from(NullChannel::new(ChannelId::new(3)));
        assert_eq!(chan.id(), ChannelId::new(3));
        assert!(chan.as_ring().is_none());

        chan.write(0, 0x100, &[1, 2, 3]).unwrap();
        chan.write_non_inc(1, 0x200, &[4, 5]).unwrap();
        chan.write_immediate(2, 0x300, 7).unwrap();

        let stats = chan.stats();
        assert_eq!(stats.methods_written, 3);
        // Headers plus five data words, the immediate has none
        assert_eq!(stats.bytes_written, (3 + 5) * 4);
    }
}
