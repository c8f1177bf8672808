//! Channels shared through the registry and driven from several threads

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use gpfifo_chan::{
    Channel, ChannelParts, ChannelRegistry, NullChannel, RingBufferChannel, Simulator,
    ThresholdSpec,
};
use gpfifo_core::Error;
use gpfifo_hal::HostMemory;

const WRITES: u32 = 200;

#[test]
fn test_channels_driven_from_threads() {
    let registry = Arc::new(ChannelRegistry::new());

    let mut sims = Vec::new();
    for _ in 0..3 {
        let mem = HostMemory::new();
        let sim = Simulator::new(mem.clone(), 1);
        sim.set_auto_run(Some(8));

        let mut cfg = config(1024, 32);
        cfg.auto_flush = ThresholdSpec::Fixed(256);
        let id = registry.alloc_id();
        let parts = ChannelParts::new(sim.port(), sim.platform(), mem);
        registry
            .register(RingBufferChannel::new(id, cfg, parts).unwrap())
            .unwrap();
        sims.push((id, sim));
    }
    let null_id = registry.alloc_id();
    registry.register(NullChannel::new(null_id)).unwrap();
    assert_eq!(registry.len(), 4);

    let handles: Vec<_> = registry
        .ids()
        .into_iter()
        .map(|id| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let chan = registry.get(id).unwrap();
                for i in 0..WRITES {
                    chan.lock().write(0, 0x100, &[i, i + 1, i + 2]).unwrap();
                }
                chan.lock().wait_idle(Duration::from_secs(1)).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(registry.errored().is_empty());
    for (id, sim) in &sims {
        let chan = registry.get(*id).unwrap();
        let stats = chan.lock().stats();
        assert_eq!(stats.methods_written, u64::from(WRITES));
        assert!(stats.auto_flushes > 0);
        assert_eq!(sim.executed_words(C0).len(), WRITES as usize * 4);
    }
    let null_stats = registry.get(null_id).unwrap().lock().stats();
    assert_eq!(null_stats.methods_written, u64::from(WRITES));
}

#[test]
fn test_errored_reports_latched_channels() {
    let registry = ChannelRegistry::new();
    let mem = HostMemory::new();
    let sim = Simulator::new(mem.clone(), 1);
    let id = registry.alloc_id();
    let parts = ChannelParts::new(sim.port(), sim.platform(), mem.clone());
    let chan = registry
        .register(RingBufferChannel::new(id, config(4096, 16), parts).unwrap())
        .unwrap();
    registry
        .register(NullChannel::new(registry.alloc_id()))
        .unwrap();

    sim.set_doorbell_failure(true);
    chan.lock().write(0, 0x100, &[1]).unwrap();
    assert_eq!(chan.lock().flush(), Err(Error::DoorbellFailed));
    assert_eq!(registry.errored(), [(id, Error::DoorbellFailed)]);

    // Dropping the last handle tears the channel down
    drop(chan);
    assert!(registry.remove(id).is_some());
    assert_eq!(mem.live_allocations(), 0);
    assert!(!sim.is_bound(C0));
}
