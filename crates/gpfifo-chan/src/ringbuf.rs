//! # Ring Buffer Channel
//!
//! Channel writing into a pushbuffer and describing it through a segment
//! descriptor table read by one or more consumers.
//!
//! ```text
//!  write_method ──▶ ensure_room ──▶ store ──▶ auto-close? ──▶ auto-flush?
//!                       │                         │               │
//!                  shadow cache              close_open_span   flush
//!                  (poll on stall)               │               │
//!                                           reserve slot      publish
//!                                                             (WC flush, doorbells)
//! ```

use alloc::boxed::Box;
use core::time::Duration;

use gpfifo_core::{
    ByteSize, ChannelId, ConsumerBinding, ConsumerCaps, ConsumerId, ConsumerPort, Error, GpuAddr,
    Result,
};
use gpfifo_hal::{AllocDesc, MemoryProvider, Platform};

use crate::autoflush::{AutoFlush, ThresholdSpec};
use crate::channel::{Channel, ChannelStats};
use crate::codec::{DescriptorCodec, EntryFlags, PackedCodec, RawEntry, Segment};
use crate::config::ChannelConfig;
use crate::encoder::{MethodEncoder, MethodMode, StandardEncoder};
use crate::gpfifo::SegmentTable;
use crate::poll::poll_until;
use crate::pushbuf::Pushbuffer;
use crate::ring::{RingSpace, TableSpace};
use crate::shadow::ShadowPositions;
use crate::sticky::{ErrorState, StickyError};

// =============================================================================
// COLLABORATORS
// =============================================================================

/// Everything a ring buffer channel talks to
pub struct ChannelParts {
    /// Consumers reading the ring
    pub port: Box<dyn ConsumerPort + Send>,
    /// Clock, scheduling and barriers
    pub platform: Box<dyn Platform + Send>,
    /// Backing memory for the rings and semaphores
    pub memory: Box<dyn MemoryProvider + Send>,
    /// Descriptor slot layout
    pub codec: Box<dyn DescriptorCodec>,
    /// Method header layout
    pub encoder: Box<dyn MethodEncoder>,
}

impl ChannelParts {
    /// Bundle collaborators with the default codec and encoder
    pub fn new<P, T, M>(port: P, platform: T, memory: M) -> Self
    where
        P: ConsumerPort + Send + 'static,
        T: Platform + Send + 'static,
        M: MemoryProvider + Send + 'static,
    {
        Self {
            port: Box::new(port),
            platform: Box::new(platform),
            memory: Box::new(memory),
            codec: Box::new(PackedCodec::new()),
            encoder: Box::new(StandardEncoder),
        }
    }

    /// Replace the descriptor codec
    pub fn with_codec(mut self, codec: impl DescriptorCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Replace the method encoder
    pub fn with_encoder(mut self, encoder: impl MethodEncoder + 'static) -> Self {
        self.encoder = Box::new(encoder);
        self
    }
}

// =============================================================================
// RING BUFFER CHANNEL
// =============================================================================

/// Channel backed by a pushbuffer and a descriptor table
pub struct RingBufferChannel {
    id: ChannelId,
    config: ChannelConfig,
    caps: ConsumerCaps,
    pushbuf: Pushbuffer,
    table: SegmentTable,
    shadow: ShadowPositions,
    autoflush: AutoFlush,
    sticky: StickyError,
    stats: ChannelStats,
    /// Consumers bound so far, unbound again on drop
    bound: usize,
    encoder: Box<dyn MethodEncoder>,
    port: Box<dyn ConsumerPort + Send>,
    platform: Box<dyn Platform + Send>,
    memory: Box<dyn MemoryProvider + Send>,
}

impl core::fmt::Debug for RingBufferChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBufferChannel")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("pushbuf", &self.pushbuf)
            .field("table", &self.table)
            .field("state", &self.sticky.state())
            .field("platform", &self.platform.name())
            .field("encoder", &self.encoder.name())
            .finish()
    }
}

impl RingBufferChannel {
    /// Create a channel, allocate its rings and bind every consumer
    pub fn new(id: ChannelId, config: ChannelConfig, parts: ChannelParts) -> Result<Self> {
        config.validate()?;
        let ChannelParts {
            port,
            platform,
            mut memory,
            codec,
            encoder,
        } = parts;

        let consumers = port.consumer_count();
        if consumers == 0 || u32::try_from(consumers).is_err() {
            return Err(Error::InvalidParameter);
        }
        let ring = RingSpace::new(config.pushbuffer_bytes())?;
        let space = TableSpace::new(config.table_entries)?;

        let mut autoflush = AutoFlush::new(ring.size(), space.capacity());
        autoflush.configure_flush(config.auto_flush, 0)?;
        autoflush.configure_close(config.auto_close)?;

        let pb_region = memory.allocate(&AllocDesc::ring(config.pushbuffer_size, "pushbuffer"))?;
        let table_bytes = u64::from(space.capacity()) * u64::from(RawEntry::SIZE);
        let table_region =
            match memory.allocate(&AllocDesc::ring(ByteSize::from_bytes(table_bytes), "gpfifo")) {
                Ok(region) => region,
                Err(e) => {
                    if let Err(free_err) = memory.free(pb_region) {
                        log::warn!("Channel {}: failed to free pushbuffer: {}", id, free_err);
                    }
                    return Err(e);
                }
            };

        let caps = port.capabilities();
        let mut chan = Self {
            id,
            caps,
            pushbuf: Pushbuffer::new(pb_region, ring),
            table: SegmentTable::new(table_region, space, codec),
            shadow: ShadowPositions::new(consumers),
            autoflush,
            sticky: StickyError::new(id),
            stats: ChannelStats::default(),
            bound: 0,
            encoder,
            port,
            platform,
            memory,
            config,
        };

        // From here on a failure drops `chan`, which releases what was set up
        chan.attach_semaphores()?;
        chan.bind_consumers()?;

        log::info!(
            "Channel {}: '{}' created, pushbuffer {} at {}, {} descriptors at {}, {} consumer(s){}",
            chan.id,
            chan.config.name,
            chan.config.pushbuffer_size,
            chan.pushbuf.gpu_addr(),
            chan.table.capacity(),
            chan.table.gpu_addr(),
            consumers,
            if chan.shadow.all_semaphores() {
                ", position semaphores"
            } else {
                ""
            }
        );
        Ok(chan)
    }

    fn attach_semaphores(&mut self) -> Result<()> {
        if !self.config.use_position_semaphores
            || !self.caps.contains(ConsumerCaps::POSITION_SEMAPHORE)
        {
            return Ok(());
        }
        for i in 0..self.shadow.len() {
            let mut cell = self
                .memory
                .allocate(&AllocDesc::coherent(ByteSize::from_bytes(8), "position semaphore"))?;
            cell.fill_zero();
            self.shadow.attach_semaphore(ConsumerId::new(i as u32), cell);
        }
        Ok(())
    }

    fn bind_consumers(&mut self) -> Result<()> {
        for i in 0..self.shadow.len() {
            let consumer = ConsumerId::new(i as u32);
            let binding = ConsumerBinding {
                pushbuffer_addr: self.pushbuf.gpu_addr(),
                pushbuffer_size: self.pushbuf.size(),
                table_addr: self.table.gpu_addr(),
                table_entries: self.table.capacity(),
                entry_size: RawEntry::SIZE,
                semaphore: self.shadow.semaphore_addr(consumer),
            };
            self.port.bind(consumer, binding)?;
            self.bound += 1;
        }
        Ok(())
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    /// Channel configuration
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Consumer capabilities reported at creation
    pub fn capabilities(&self) -> ConsumerCaps {
        self.caps
    }

    /// Pushbuffer cursors
    pub fn pushbuffer(&self) -> &Pushbuffer {
        &self.pushbuf
    }

    /// Descriptor table positions
    pub fn table(&self) -> &SegmentTable {
        &self.table
    }

    /// Cached consumer positions
    pub fn shadow(&self) -> &ShadowPositions {
        &self.shadow
    }

    /// Auto-flush thresholds
    pub fn auto_flush(&self) -> &AutoFlush {
        &self.autoflush
    }

    /// Error state
    pub fn state(&self) -> ErrorState {
        self.sticky.state()
    }

    /// Decode the descriptor stored at `index`
    pub fn read_descriptor(&self, index: u32) -> Result<Segment> {
        self.table.read(index)
    }

    // =========================================================================
    // PUSHBUFFER
    // =========================================================================

    /// Wait until `bytes` at the cursor can be written
    fn ensure_room(&mut self, bytes: u32) -> Result<()> {
        let frame = match self.pushbuf.reserve_frame(bytes) {
            Ok(frame) => frame,
            Err(Error::PushbufferOverflow) => {
                log::debug!(
                    "Channel {}: {} bytes at {} would overwrite unpublished data ({} pending)",
                    self.id,
                    bytes,
                    self.pushbuf.put(),
                    self.pushbuf.unpublished_bytes()
                );
                return self.sticky.fail(Error::PushbufferOverflow);
            }
            Err(e) => return Err(e),
        };

        let table_published = self.table.published();
        if self
            .pushbuf
            .first_blocked(frame, table_published, self.shadow.iter())
            .is_none()
        {
            return Ok(());
        }

        self.stats.pushbuffer_stalls += 1;
        log::debug!(
            "Channel {}: pushbuffer stall, {} bytes at {}",
            self.id,
            bytes,
            self.pushbuf.put()
        );

        let Self {
            pushbuf,
            shadow,
            port,
            sticky,
            platform,
            config,
            ..
        } = self;
        let result = poll_until(platform.as_mut(), config.poll, config.timeout, || {
            observe_faults(port.as_mut(), sticky)?;
            shadow.refresh(port.as_mut())?;
            Ok(pushbuf
                .first_blocked(frame, table_published, shadow.iter())
                .is_none())
        });
        self.finish_wait(result, "pushbuffer space")
    }

    fn wrap_cursor(&mut self) {
        log::debug!(
            "Channel {}: wrapping at {}, {} bytes skipped",
            self.id,
            self.pushbuf.put(),
            self.pushbuf.room_to_end()
        );
        self.pushbuf.wrap();
    }

    // =========================================================================
    // DESCRIPTOR TABLE
    // =========================================================================

    /// Wait until the slot at the table's `put` may be written
    fn reserve_table_slot(&mut self) -> Result<()> {
        if self.table.first_blocked(self.shadow.iter()).is_none() {
            return Ok(());
        }

        self.shadow.refresh(self.port.as_mut())?;
        let Some((consumer, pos)) = self.table.first_blocked(self.shadow.iter()) else {
            return Ok(());
        };

        // The consumer has run dry: only a publish lets it move on
        if self.table.drained(pos.table_get) {
            if !self.config.flush_on_table_wait {
                log::debug!(
                    "Channel {}: descriptor table full, consumer {} waits for unpublished work",
                    self.id,
                    consumer
                );
                return self.sticky.fail(Error::TableOverflow);
            }
            self.publish()?;
        }

        self.stats.table_stalls += 1;
        log::debug!(
            "Channel {}: descriptor stall at slot {}, consumer {} at {}",
            self.id,
            self.table.put(),
            consumer,
            pos.table_get
        );

        let Self {
            table,
            shadow,
            port,
            sticky,
            platform,
            config,
            ..
        } = self;
        let result = poll_until(platform.as_mut(), config.poll, config.timeout, || {
            observe_faults(port.as_mut(), sticky)?;
            shadow.refresh(port.as_mut())?;
            Ok(table.first_blocked(shadow.iter()).is_none())
        });
        self.finish_wait(result, "descriptor slot")
    }

    /// Turn the open span into descriptors
    fn close_open_span(&mut self) -> Result<()> {
        if self.pushbuf.open_len() == 0 {
            return Ok(());
        }

        let max_length = self.table.codec().max_length();
        while self.pushbuf.open_len() > 0 {
            let length = self.pushbuf.open_len().min(max_length);
            self.reserve_table_slot()?;
            let addr = self
                .pushbuf
                .gpu_addr()
                .offset(u64::from(self.pushbuf.open_start()));
            self.table.push(&Segment::new(addr, length))?;
            self.pushbuf.advance_open(length);
            self.stats.descriptors += 1;
        }

        if self.pushbuf.room_to_end() < self.config.tail_reserve_bytes {
            self.wrap_cursor();
        }
        Ok(())
    }

    /// Make every closed descriptor visible to the consumers
    ///
    /// Returns false when there was nothing new to publish.
    fn publish(&mut self) -> Result<bool> {
        // No doorbell reaches a consumer that faulted or is being reset
        observe_faults(self.port.as_mut(), &mut self.sticky)?;
        if self.table.unpublished() == 0 {
            self.stats.redundant_publishes += 1;
            return Ok(false);
        }

        // Descriptor and command stores must land before any doorbell
        self.platform.flush_write_combining();

        let put = self.table.put();
        for i in 0..self.shadow.len() {
            let consumer = ConsumerId::new(i as u32);
            if let Err(e) = self.port.publish_put(consumer, put) {
                log::debug!("Channel {}: doorbell of consumer {} failed: {}", self.id, consumer, e);
                let error = if e.is_consumer_error() {
                    e
                } else {
                    Error::DoorbellFailed
                };
                return self.sticky.fail(error);
            }
            self.stats.doorbells += 1;
        }

        self.table.mark_published();
        self.pushbuf.mark_published();
        self.stats.flushes += 1;
        Ok(true)
    }

    /// Close, publish, refresh cheap positions and re-arm the byte trigger
    fn flush_all(&mut self) -> Result<()> {
        self.close_open_span()?;
        self.publish()?;
        self.shadow.refresh_semaphores()?;
        self.autoflush.rearm(self.pushbuf.total_bytes());
        Ok(())
    }

    fn finish_wait(&mut self, result: Result<()>, what: &str) -> Result<()> {
        match result {
            Err(Error::Timeout) => {
                self.stats.timeouts += 1;
                observe_faults(self.port.as_mut(), &mut self.sticky)?;
                log::warn!(
                    "Channel {}: timed out after {:?} waiting for {}",
                    self.id,
                    self.config.timeout,
                    what
                );
                Err(Error::Timeout)
            }
            other => other,
        }
    }
}

/// Latch whatever the consumers report and fail if anything is latched
fn observe_faults(port: &mut dyn ConsumerPort, sticky: &mut StickyError) -> Result<()> {
    if port.reset_in_progress() {
        return sticky.fail(Error::ResetInProgress);
    }
    if port.detect_fault() {
        if let Some(fault) = port.take_fault() {
            sticky.latch(fault);
        }
    }
    sticky.check()
}

impl Channel for RingBufferChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn write_method(
        &mut self,
        mode: MethodMode,
        subchannel: u32,
        method: u32,
        data: &[u32],
    ) -> Result<()> {
        observe_faults(self.port.as_mut(), &mut self.sticky)?;

        let (header, payload) = match mode {
            MethodMode::Immediate => {
                let [value] = data else {
                    return Err(Error::InvalidParameter);
                };
                if *value > self.encoder.max_immediate() {
                    return Err(Error::InvalidParameter);
                }
                let header = self.encoder.header(mode, subchannel, method, *value)?;
                (header, &data[..0])
            }
            _ => {
                let count = u32::try_from(data.len()).map_err(|_| Error::InvalidParameter)?;
                if count > self.encoder.max_count() {
                    return Err(Error::InvalidParameter);
                }
                (self.encoder.header(mode, subchannel, method, count)?, data)
            }
        };

        let bytes = (payload.len() as u64 + 1) * 4;
        if bytes >= u64::from(self.pushbuf.size()) {
            return Err(Error::InvalidParameter);
        }
        let bytes = bytes as u32;

        if self.pushbuf.room_to_end() < bytes {
            self.close_open_span()?;
            if self.pushbuf.room_to_end() < bytes {
                self.wrap_cursor();
            }
        }
        self.ensure_room(bytes)?;

        self.pushbuf.store(&[header])?;
        self.pushbuf.store(payload)?;
        self.stats.methods_written += 1;

        if self.autoflush.should_close(self.pushbuf.open_len()) {
            self.stats.auto_closes += 1;
            self.close_open_span()?;
        }
        if self
            .autoflush
            .should_flush(self.pushbuf.total_bytes(), self.table.unpublished())
        {
            self.stats.auto_flushes += 1;
            self.flush_all()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        observe_faults(self.port.as_mut(), &mut self.sticky)?;
        self.flush_all()
    }

    fn wait_idle(&mut self, timeout: Duration) -> Result<()> {
        observe_faults(self.port.as_mut(), &mut self.sticky)?;
        self.flush_all()?;

        let target = self.table.put();
        let Self {
            shadow,
            port,
            sticky,
            platform,
            config,
            ..
        } = self;
        let result = poll_until(platform.as_mut(), config.poll, timeout, || {
            observe_faults(port.as_mut(), sticky)?;
            shadow.refresh(port.as_mut())?;
            Ok(shadow.iter().all(|(_, pos)| pos.table_get == target))
        });
        self.finish_wait(result, "idle")
    }

    fn insert_subroutine(&mut self, addr: GpuAddr, length: u32) -> Result<()> {
        observe_faults(self.port.as_mut(), &mut self.sticky)?;
        if !self.caps.contains(ConsumerCaps::SUBROUTINES) {
            return Err(Error::NotSupported);
        }
        if !addr.is_aligned(4) {
            return Err(Error::MisalignedAddress);
        }
        if length == 0 || length % 4 != 0 || length > self.table.codec().max_length() {
            return Err(Error::InvalidParameter);
        }

        self.close_open_span()?;
        self.reserve_table_slot()?;
        self.table.push(&Segment {
            addr,
            length,
            flags: EntryFlags::SUBROUTINE,
        })?;
        self.stats.descriptors += 1;
        Ok(())
    }

    fn error(&self) -> Option<Error> {
        self.sticky.error()
    }

    fn clear_error(&mut self) {
        self.sticky.clear();
    }

    fn recover(&mut self) -> Result<()> {
        if let ErrorState::PermanentlyErrored(e) = self.sticky.state() {
            return Err(e);
        }
        if self.port.reset_in_progress() {
            return self.sticky.fail(Error::ResetInProgress);
        }

        let mut last_fault = None;
        while let Some(fault) = self.port.take_fault() {
            log::debug!("Channel {}: pending fault {}", self.id, fault);
            last_fault = Some(fault);
        }
        if let Some(fault) = last_fault {
            self.sticky.make_permanent(fault);
            return Err(fault);
        }

        self.sticky.recover()?;
        self.shadow.resync(self.port.as_mut())?;
        Ok(())
    }

    fn set_auto_flush(&mut self, spec: ThresholdSpec) -> Result<()> {
        self.autoflush
            .configure_flush(spec, self.pushbuf.total_bytes())
    }

    fn set_auto_close(&mut self, spec: ThresholdSpec) -> Result<()> {
        self.autoflush.configure_close(spec)
    }

    fn stats(&self) -> ChannelStats {
        ChannelStats {
            bytes_written: self.pushbuf.total_bytes(),
            wraps: self.pushbuf.wraps(),
            position_queries: self.shadow.queries(),
            semaphore_reads: self.shadow.semaphore_reads(),
            ..self.stats
        }
    }
}

impl Drop for RingBufferChannel {
    fn drop(&mut self) {
        for i in 0..self.bound {
            self.port.unbind(ConsumerId::new(i as u32));
        }

        let regions = self
            .shadow
            .take_semaphores()
            .into_iter()
            .chain([self.table.take_region(), self.pushbuf.take_region()]);
        for region in regions {
            if region.is_empty() {
                continue;
            }
            if let Err(e) = self.memory.free(region) {
                log::warn!("Channel {}: failed to release ring memory: {}", self.id, e);
            }
        }
        log::debug!("Channel {}: destroyed", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Simulator;
    use gpfifo_core::FaultCode;
    use gpfifo_hal::HostMemory;

    fn small_config() -> ChannelConfig {
        ChannelConfig {
            pushbuffer_size: ByteSize::KIB_4,
            table_entries: 16,
            timeout: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn channel(sim: &Simulator, mem: &HostMemory, config: ChannelConfig) -> RingBufferChannel {
        let parts = ChannelParts::new(sim.port(), sim.platform(), mem.clone());
        RingBufferChannel::new(ChannelId::new(1), config, parts).unwrap()
    }

    #[test]
    fn test_create_binds_and_drop_releases() {
        let mem = HostMemory::new();
        let sim = Simulator::new(mem.clone(), 2);
        {
            let chan = channel(&sim, &mem, small_config());
            assert!(chan.shadow().all_semaphores());
            // pushbuffer, table and one semaphore per consumer
            assert_eq!(mem.live_allocations(), 4);
            assert!(sim.is_bound(ConsumerId::new(1)));
        }
        assert_eq!(mem.live_allocations(), 0);
        assert!(!sim.is_bound(ConsumerId::new(0)));
    }

    #[test]
    fn test_semaphores_need_capability() {
        let mem = HostMemory::new();
        let sim = Simulator::with_caps(mem.clone(), 1, ConsumerCaps::empty());
        let chan = channel(&sim, &mem, small_config());
        assert!(!chan.shadow().all_semaphores());
        assert_eq!(mem.live_allocations(), 2);
    }

    #[test]
    fn test_rejects_zero_consumers() {
        let mem = HostMemory::new();
        let sim = Simulator::new(mem.clone(), 0);
        let parts = ChannelParts::new(sim.port(), sim.platform(), mem.clone());
        let result = RingBufferChannel::new(ChannelId::new(1), small_config(), parts);
        assert_eq!(result.err(), Some(Error::InvalidParameter));
        assert_eq!(mem.live_allocations(), 0);
    }

    #[test]
    fn test_oversized_write_rejected_without_state_change() {
        let mem = HostMemory::new();
        let sim = Simulator::new(mem.clone(), 1);
        let mut chan = channel(&sim, &mem, small_config());
        let data = [0u32; 1024];
        assert_eq!(chan.write(0, 0x100, &data), Err(Error::InvalidParameter));
        assert_eq!(chan.pushbuffer().put(), 0);
        assert_eq!(chan.error(), None);
    }

    #[test]
    fn test_flush_publishes_one_descriptor() {
        let mem = HostMemory::new();
        let sim = Simulator::new(mem.clone(), 1);
        let mut chan = channel(&sim, &mem, small_config());
        chan.write(0, 0x100, &[1, 2, 3]).unwrap();
        chan.flush().unwrap();

        let seg = chan.read_descriptor(0).unwrap();
        assert_eq!(seg.addr, chan.pushbuffer().gpu_addr());
        assert_eq!(seg.length, 16);
        assert_eq!(chan.table().published(), 1);
        assert_eq!(chan.pushbuffer().published_put(), 16);
        assert_eq!(sim.doorbells(ConsumerId::new(0)), 1);
    }

    #[test]
    fn test_fault_recovery_becomes_permanent() {
        let mem = HostMemory::new();
        let sim = Simulator::new(mem.clone(), 1);
        let mut chan = channel(&sim, &mem, small_config());
        sim.halt(ConsumerId::new(0));
        chan.write(0, 0x100, &[0; 4]).unwrap();

        let fault = Error::ConsumerFault(FaultCode::PageFault);
        sim.inject_fault(fault);
        sim.inject_fault(Error::ConsumerFault(FaultCode::Watchdog));
        assert_eq!(chan.wait_idle(Duration::from_millis(1)), Err(fault));
        assert_eq!(sim.doorbells(ConsumerId::new(0)), 0);

        // A second fault was still pending
        assert_eq!(
            chan.recover(),
            Err(Error::ConsumerFault(FaultCode::Watchdog))
        );
        assert_eq!(
            chan.state(),
            ErrorState::PermanentlyErrored(Error::ConsumerFault(FaultCode::Watchdog))
        );
        assert_eq!(
            chan.recover(),
            Err(Error::ConsumerFault(FaultCode::Watchdog))
        );
    }
}
