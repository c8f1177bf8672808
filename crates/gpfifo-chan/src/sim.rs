//! # Software Consumer
//!
//! Simulated consumers and a simulated clock for driving channels without
//! hardware. Consumers follow the descriptor table through [`HostMemory`],
//! execute the referenced words into a log and publish their positions into
//! bound semaphore cells.
//!
//! The clock only moves when the channel yields or sleeps. Consumers run
//! either when a test calls [`Simulator::advance`] or, with
//! [`Simulator::set_auto_run`], on every clock tick.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use gpfifo_core::{
    ConsumerBinding, ConsumerCaps, ConsumerId, ConsumerPort, ConsumerPosition, Error, Result,
};
use gpfifo_hal::{HostMemory, Platform, fence};
use spin::Mutex;

use crate::codec::{DescriptorCodec, PackedCodec, RawEntry};

/// Something the channel did, in program order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// Write-combining flush barrier
    WcFlush,
    /// Doorbell rung for a consumer
    Doorbell {
        /// Consumer
        consumer: ConsumerId,
        /// Table position written
        table_put: u32,
    },
}

#[derive(Debug, Default)]
struct SimConsumer {
    binding: Option<ConsumerBinding>,
    position: ConsumerPosition,
    /// Last doorbell value
    table_put: u32,
    doorbells: u64,
    halted: bool,
    executed: Vec<u32>,
}

#[derive(Debug)]
struct SimState {
    memory: HostMemory,
    codec: PackedCodec,
    caps: ConsumerCaps,
    consumers: Vec<SimConsumer>,
    faults: VecDeque<Error>,
    reset_in_progress: bool,
    fail_doorbells: bool,
    queries: u64,
    events: Vec<SimEvent>,
    now_ns: u64,
    tick_ns: u64,
    /// Descriptors each running consumer executes per clock tick
    auto_run: Option<u32>,
}

impl SimState {
    fn consumer(&mut self, id: ConsumerId) -> Result<&mut SimConsumer> {
        self.consumers.get_mut(id.index()).ok_or(Error::NotFound)
    }

    /// Execute up to `max` published descriptors of one consumer
    fn run(&mut self, id: ConsumerId, max: u32) -> Result<u32> {
        let Self {
            memory,
            codec,
            consumers,
            ..
        } = self;
        let consumer = consumers.get_mut(id.index()).ok_or(Error::NotFound)?;
        let binding = consumer.binding.ok_or(Error::NotFound)?;

        let mut executed = 0;
        while executed < max && consumer.position.table_get != consumer.table_put {
            let slot = binding
                .table_addr
                .offset(u64::from(consumer.position.table_get) * u64::from(RawEntry::SIZE));
            let raw = RawEntry::from_words([memory.read_u32(slot)?, memory.read_u32(slot.offset(4))?]);
            let segment = codec.decode(raw);

            for i in 0..u64::from(segment.length / 4) {
                let word = memory.read_u32(segment.addr.offset(i * 4))?;
                consumer.executed.push(word);
            }

            if !segment.is_subroutine() {
                let start = segment.addr - binding.pushbuffer_addr;
                consumer.position.pushbuffer_get =
                    ((start + u64::from(segment.length)) % u64::from(binding.pushbuffer_size)) as u32;
            }
            consumer.position.table_get =
                (consumer.position.table_get + 1) & (binding.table_entries - 1);
            executed += 1;

            if let Some(cell) = binding.semaphore {
                memory.write_u64(cell, consumer.position.to_semaphore())?;
            }
        }
        Ok(executed)
    }

    fn tick(&mut self, ns: u64) {
        self.now_ns += ns;
        let Some(per_tick) = self.auto_run else {
            return;
        };
        for i in 0..self.consumers.len() {
            let id = ConsumerId::new(i as u32);
            let runnable = self.consumers[i].binding.is_some() && !self.consumers[i].halted;
            if runnable {
                if let Err(e) = self.run(id, per_tick) {
                    log::warn!("Sim: consumer {} stopped: {}", id, e);
                    self.consumers[i].halted = true;
                }
            }
        }
    }
}

// =============================================================================
// SIMULATOR
// =============================================================================

/// Shared state of simulated consumers and their clock
#[derive(Debug, Clone)]
pub struct Simulator {
    state: Arc<Mutex<SimState>>,
}

impl Simulator {
    /// Nanoseconds the clock advances per yield
    pub const TICK_NS: u64 = 1_000;

    /// Create `consumers` consumers supporting semaphores and subroutines
    ///
    /// `memory` must be the provider the channel allocates from.
    pub fn new(memory: HostMemory, consumers: usize) -> Self {
        Self::with_caps(
            memory,
            consumers,
            ConsumerCaps::POSITION_SEMAPHORE | ConsumerCaps::SUBROUTINES,
        )
    }

    /// Create consumers with an explicit capability set
    pub fn with_caps(memory: HostMemory, consumers: usize, caps: ConsumerCaps) -> Self {
        let mut list = Vec::with_capacity(consumers);
        list.resize_with(consumers, SimConsumer::default);
        Self {
            state: Arc::new(Mutex::new(SimState {
                memory,
                codec: PackedCodec::new(),
                caps,
                consumers: list,
                faults: VecDeque::new(),
                reset_in_progress: false,
                fail_doorbells: false,
                queries: 0,
                events: Vec::new(),
                now_ns: 0,
                tick_ns: Self::TICK_NS,
                auto_run: None,
            })),
        }
    }

    /// Consumer port handle for a channel
    pub fn port(&self) -> SimPort {
        SimPort {
            state: self.state.clone(),
        }
    }

    /// Platform handle for a channel
    pub fn platform(&self) -> SimPlatform {
        SimPlatform {
            state: self.state.clone(),
        }
    }

    /// Let running consumers execute `per_tick` descriptors per clock tick
    pub fn set_auto_run(&self, per_tick: Option<u32>) {
        self.state.lock().auto_run = per_tick;
    }

    /// Execute up to `max` published descriptors
    pub fn advance(&self, consumer: ConsumerId, max: u32) -> Result<u32> {
        self.state.lock().run(consumer, max)
    }

    /// Execute everything published so far
    pub fn drain(&self, consumer: ConsumerId) -> Result<u32> {
        self.advance(consumer, u32::MAX)
    }

    /// Stop a consumer from running on clock ticks
    pub fn halt(&self, consumer: ConsumerId) {
        if let Ok(c) = self.state.lock().consumer(consumer) {
            c.halted = true;
        }
    }

    /// Let a halted consumer run on clock ticks again
    pub fn resume(&self, consumer: ConsumerId) {
        if let Ok(c) = self.state.lock().consumer(consumer) {
            c.halted = false;
        }
    }

    /// Current positions of a consumer
    pub fn position(&self, consumer: ConsumerId) -> ConsumerPosition {
        self.state
            .lock()
            .consumer(consumer)
            .map(|c| c.position)
            .unwrap_or_default()
    }

    /// Check whether a channel has bound the consumer
    pub fn is_bound(&self, consumer: ConsumerId) -> bool {
        self.state
            .lock()
            .consumer(consumer)
            .is_ok_and(|c| c.binding.is_some())
    }

    /// Geometry a consumer was bound with
    pub fn binding(&self, consumer: ConsumerId) -> Option<ConsumerBinding> {
        self.state
            .lock()
            .consumer(consumer)
            .ok()
            .and_then(|c| c.binding)
    }

    /// Report an asynchronous fault
    pub fn inject_fault(&self, fault: Error) {
        self.state.lock().faults.push_back(fault);
    }

    /// Start or end a global reset
    pub fn set_reset_in_progress(&self, active: bool) {
        self.state.lock().reset_in_progress = active;
    }

    /// Make every doorbell write fail
    pub fn set_doorbell_failure(&self, fail: bool) {
        self.state.lock().fail_doorbells = fail;
    }

    /// Barriers and doorbells seen so far
    pub fn events(&self) -> Vec<SimEvent> {
        self.state.lock().events.clone()
    }

    /// Doorbells rung for a consumer
    pub fn doorbells(&self, consumer: ConsumerId) -> u64 {
        self.state
            .lock()
            .consumer(consumer)
            .map(|c| c.doorbells)
            .unwrap_or(0)
    }

    /// Words a consumer has executed, in order
    pub fn executed_words(&self, consumer: ConsumerId) -> Vec<u32> {
        self.state
            .lock()
            .consumer(consumer)
            .map(|c| c.executed.clone())
            .unwrap_or_default()
    }

    /// Position queries answered through the port
    pub fn query_count(&self) -> u64 {
        self.state.lock().queries
    }

    /// Simulated time in nanoseconds
    pub fn now_ns(&self) -> u64 {
        self.state.lock().now_ns
    }
}

// =============================================================================
// CONSUMER PORT
// =============================================================================

/// [`ConsumerPort`] over the simulated consumers
#[derive(Debug, Clone)]
pub struct SimPort {
    state: Arc<Mutex<SimState>>,
}

impl ConsumerPort for SimPort {
    fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }

    fn capabilities(&self) -> ConsumerCaps {
        self.state.lock().caps
    }

    fn bind(&mut self, consumer: ConsumerId, binding: ConsumerBinding) -> Result<()> {
        if !binding.table_entries.is_power_of_two() || binding.entry_size != RawEntry::SIZE {
            return Err(Error::InvalidParameter);
        }
        let mut state = self.state.lock();
        if let Some(cell) = binding.semaphore {
            state.memory.write_u64(cell, 0)?;
        }
        let c = state.consumer(consumer)?;
        *c = SimConsumer {
            binding: Some(binding),
            halted: c.halted,
            ..Default::default()
        };
        Ok(())
    }

    fn unbind(&mut self, consumer: ConsumerId) {
        if let Ok(c) = self.state.lock().consumer(consumer) {
            c.binding = None;
        }
    }

    fn query_position(&mut self, consumer: ConsumerId) -> Result<ConsumerPosition> {
        let mut state = self.state.lock();
        state.queries += 1;
        Ok(state.consumer(consumer)?.position)
    }

    fn publish_put(&mut self, consumer: ConsumerId, table_put: u32) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_doorbells {
            return Err(Error::DoorbellFailed);
        }
        let c = state.consumer(consumer)?;
        c.table_put = table_put;
        c.doorbells += 1;
        state.events.push(SimEvent::Doorbell {
            consumer,
            table_put,
        });
        Ok(())
    }

    fn detect_fault(&mut self) -> bool {
        !self.state.lock().faults.is_empty()
    }

    fn take_fault(&mut self) -> Option<Error> {
        self.state.lock().faults.pop_front()
    }

    fn reset_in_progress(&self) -> bool {
        self.state.lock().reset_in_progress
    }
}

// =============================================================================
// PLATFORM
// =============================================================================

/// [`Platform`] with a simulated clock
#[derive(Debug, Clone)]
pub struct SimPlatform {
    state: Arc<Mutex<SimState>>,
}

impl Platform for SimPlatform {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn now_ns(&self) -> u64 {
        self.state.lock().now_ns
    }

    fn yield_now(&mut self) {
        let mut state = self.state.lock();
        let tick = state.tick_ns;
        state.tick(tick);
    }

    fn sleep_us(&mut self, us: u64) {
        self.state.lock().tick(us.saturating_mul(1_000));
    }

    fn flush_write_combining(&mut self) {
        fence::write_combine_flush();
        self.state.lock().events.push(SimEvent::WcFlush);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpfifo_core::ByteSize;
    use gpfifo_hal::{AllocDesc, MemoryProvider};

    #[test]
    fn test_consumer_follows_descriptors() {
        let mut mem = HostMemory::new();
        let mut pb = mem
            .allocate(&AllocDesc::ring(ByteSize::KIB_4, "pb"))
            .unwrap();
        let mut table = mem
            .allocate(&AllocDesc::ring(ByteSize::from_bytes(64), "table"))
            .unwrap();
        let sem = mem
            .allocate(&AllocDesc::coherent(ByteSize::from_bytes(8), "sem"))
            .unwrap();

        for i in 0..4 {
            pb.write_u32(i * 4, 0x100 + i as u32).unwrap();
        }
        let raw = PackedCodec::new()
            .encode(&crate::codec::Segment::new(pb.gpu_addr(), 16))
            .unwrap();
        let [lo, hi] = raw.words();
        table.write_u32(0, lo).unwrap();
        table.write_u32(4, hi).unwrap();

        let sim = Simulator::new(mem.clone(), 1);
        let mut port = sim.port();
        let id = ConsumerId::new(0);
        port.bind(
            id,
            ConsumerBinding {
                pushbuffer_addr: pb.gpu_addr(),
                pushbuffer_size: 4096,
                table_addr: table.gpu_addr(),
                table_entries: 8,
                entry_size: RawEntry::SIZE,
                semaphore: Some(sem.gpu_addr()),
            },
        )
        .unwrap();

        // Nothing published yet
        assert_eq!(sim.drain(id).unwrap(), 0);
        port.publish_put(id, 1).unwrap();
        assert_eq!(sim.drain(id).unwrap(), 1);
        assert_eq!(sim.executed_words(id), [0x100, 0x101, 0x102, 0x103]);
        assert_eq!(sim.position(id), ConsumerPosition::new(16, 1));
        assert_eq!(
            ConsumerPosition::from_semaphore(sem.read_u64(0).unwrap()),
            ConsumerPosition::new(16, 1)
        );
        assert_eq!(sim.query_count(), 0);

        port.unbind(id);
        assert!(!sim.is_bound(id));
        for region in [pb, table, sem] {
            mem.free(region).unwrap();
        }
    }

    #[test]
    fn test_clock_and_faults() {
        let sim = Simulator::new(HostMemory::new(), 1);
        let mut platform = sim.platform();
        let mut port = sim.port();
        platform.yield_now();
        platform.sleep_us(5);
        assert_eq!(platform.now_ns(), 6_000);

        assert!(!port.detect_fault());
        sim.inject_fault(Error::ConsumerFault(gpfifo_core::FaultCode::Watchdog));
        assert!(port.detect_fault());
        assert_eq!(
            port.take_fault(),
            Some(Error::ConsumerFault(gpfifo_core::FaultCode::Watchdog))
        );
        assert_eq!(port.take_fault(), None);

        platform.flush_write_combining();
        assert_eq!(sim.events(), [SimEvent::WcFlush]);
    }
}
