//! Shared setup for channel integration tests

#![allow(dead_code)]

use std::time::Duration;

use gpfifo_chan::{ChannelConfig, ChannelParts, RingBufferChannel, Simulator};
use gpfifo_core::{ByteSize, ChannelId, ConsumerCaps, ConsumerId};
use gpfifo_hal::HostMemory;

pub const C0: ConsumerId = ConsumerId::new(0);
pub const C1: ConsumerId = ConsumerId::new(1);

/// Test rig: simulated consumers, host memory and one channel
pub struct Rig {
    pub sim: Simulator,
    pub mem: HostMemory,
    pub chan: RingBufferChannel,
}

pub fn config(pushbuffer: u64, entries: u32) -> ChannelConfig {
    ChannelConfig {
        name: "test",
        pushbuffer_size: ByteSize::from_bytes(pushbuffer),
        table_entries: entries,
        timeout: Duration::from_millis(1),
        ..Default::default()
    }
}

pub fn rig(consumers: usize, config: ChannelConfig) -> Rig {
    rig_with_caps(
        consumers,
        ConsumerCaps::POSITION_SEMAPHORE | ConsumerCaps::SUBROUTINES,
        config,
    )
}

pub fn rig_with_caps(consumers: usize, caps: ConsumerCaps, config: ChannelConfig) -> Rig {
    let mem = HostMemory::new();
    let sim = Simulator::with_caps(mem.clone(), consumers, caps);
    let parts = ChannelParts::new(sim.port(), sim.platform(), mem.clone());
    let chan = RingBufferChannel::new(ChannelId::new(1), config, parts).unwrap();
    Rig { sim, mem, chan }
}

/// `count` data words starting at `first`
pub fn words(first: u32, count: usize) -> Vec<u32> {
    (0..count as u32).map(|i| first + i).collect()
}
