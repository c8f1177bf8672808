//! Property tests for channel flow control

mod common;

use common::*;
use gpfifo_chan::{Channel, MethodEncoder, MethodMode, StandardEncoder, ThresholdSpec};
use gpfifo_core::{ConsumerCaps, Error};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Write(usize),
    Flush,
    Advance(u32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0usize..24).prop_map(Op::Write),
        1 => Just(Op::Flush),
        2 => (1u32..4).prop_map(Op::Advance),
    ]
}

fn header(count: usize) -> u32 {
    StandardEncoder
        .header(MethodMode::Incrementing, 0, 0x100, count as u32)
        .unwrap()
}

/// Timeouts are expected from a consumer that only moves when told to
fn tolerated(result: Result<(), Error>) -> Result<bool, TestCaseError> {
    match result {
        Ok(()) | Err(Error::Timeout) => Ok(true),
        Err(e) if e.is_overflow() => Ok(false),
        Err(e) => Err(TestCaseError::fail(format!("unexpected error: {e}"))),
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    /// The consumer executes exactly what was written, in order, and never
    /// sees a word that was overwritten before it got there
    #[test]
    fn prop_consumer_sees_every_word_in_order(
        size in prop_oneof![Just(256u64), Just(512), Just(1024)],
        entries in prop_oneof![Just(4u32), Just(8), Just(16)],
        auto_flush in proptest::option::of(16u32..200),
        auto_close in proptest::option::of(4u32..128),
        semaphores in any::<bool>(),
        flush_on_table_wait in any::<bool>(),
        ops in proptest::collection::vec(op(), 1..200),
    ) {
        let mut cfg = config(size, entries);
        cfg.timeout = std::time::Duration::from_micros(20);
        cfg.auto_flush = auto_flush.map_or(ThresholdSpec::Disabled, ThresholdSpec::Fixed);
        cfg.auto_close = auto_close.map_or(ThresholdSpec::Disabled, ThresholdSpec::Fixed);
        cfg.flush_on_table_wait = flush_on_table_wait;
        let caps = if semaphores {
            ConsumerCaps::POSITION_SEMAPHORE
        } else {
            ConsumerCaps::empty()
        };
        let mut rig = rig_with_caps(1, caps, cfg);

        let mut written = Vec::new();
        let mut next = 1u32;
        let mut healthy = true;
        for op in ops {
            let result = match op {
                Op::Write(count) => {
                    let data = words(next, count);
                    let before = rig.chan.stats().bytes_written;
                    let result = rig.chan.write(0, 0x100, &data);
                    // A write that timed out after storing still counts
                    if rig.chan.stats().bytes_written > before {
                        written.push(header(count));
                        written.extend(&data);
                        next += count as u32;
                    }
                    result
                }
                Op::Flush => rig.chan.flush(),
                Op::Advance(n) => {
                    rig.sim.advance(C0, n).unwrap();
                    Ok(())
                }
            };
            if !tolerated(result)? {
                healthy = false;
                break;
            }

            let executed = rig.sim.executed_words(C0);
            prop_assert!(executed.len() <= written.len());
            prop_assert_eq!(&executed[..], &written[..executed.len()]);
        }

        if healthy {
            let mut published = false;
            for _ in 0..8 {
                rig.sim.drain(C0).unwrap();
                let result = rig.chan.flush();
                if !tolerated(result)? {
                    healthy = false;
                    break;
                }
                if result.is_ok() {
                    published = true;
                    break;
                }
            }
            prop_assert!(published || !healthy);
            rig.sim.drain(C0).unwrap();
        }

        let executed = rig.sim.executed_words(C0);
        prop_assert_eq!(&executed[..], &written[..executed.len()]);
        if healthy {
            prop_assert_eq!(executed, written);
        }
    }

    /// The byte trigger fires exactly when the running total crosses the
    /// mark placed one threshold after the previous flush
    #[test]
    fn prop_auto_flush_follows_byte_marks(
        threshold in 16u32..2048,
        counts in proptest::collection::vec(0usize..16, 1..300),
    ) {
        let mut cfg = config(4096, 512);
        cfg.auto_flush = ThresholdSpec::Fixed(threshold);
        let mut rig = rig(1, cfg);
        rig.sim.set_auto_run(Some(u32::MAX));

        let mut mark = u64::from(threshold);
        let mut total = 0u64;
        let mut expected = 0u64;
        for count in counts {
            rig.chan.write(0, 0x100, &words(1, count)).unwrap();
            total += (count as u64 + 1) * 4;
            if total >= mark {
                expected += 1;
                mark = total + u64::from(threshold);
            }
            prop_assert_eq!(rig.chan.stats().auto_flushes, expected);
            prop_assert_eq!(rig.chan.auto_flush().next_flush_mark(), Some(mark));
        }
    }
}
