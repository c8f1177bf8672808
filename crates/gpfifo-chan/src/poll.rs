//! # Bounded Waits
//!
//! Every suspension point of a channel funnels through [`poll_until`]: a
//! condition closure evaluated on a fixed cadence until it holds, it fails,
//! or the deadline passes.

use core::time::Duration;

use gpfifo_core::{Error, Result};
use gpfifo_hal::Platform;

/// Cadence of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollPolicy {
    /// Delay between evaluations in microseconds; 0 yields instead of sleeping
    pub interval_us: u64,
}

impl PollPolicy {
    /// Yield between evaluations
    pub const YIELD: Self = Self { interval_us: 0 };

    /// Sleep `interval_us` between evaluations
    pub const fn sleep(interval_us: u64) -> Self {
        Self { interval_us }
    }
}

/// Evaluate `condition` until it returns `Ok(true)`
///
/// The condition is evaluated at least once, even with a zero timeout.
/// An error from the condition cancels the wait and is returned as-is.
/// Returns [`Error::Timeout`] once `timeout` has elapsed on the platform
/// clock.
pub fn poll_until<F>(
    platform: &mut dyn Platform,
    policy: PollPolicy,
    timeout: Duration,
    mut condition: F,
) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let budget = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
    let start = platform.now_ns();

    loop {
        if condition()? {
            return Ok(());
        }

        if platform.now_ns().saturating_sub(start) >= budget {
            return Err(Error::Timeout);
        }

        if policy.interval_us == 0 {
            platform.yield_now();
        } else {
            platform.sleep_us(policy.interval_us);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Clock that advances 1us per yield
    struct StepClock {
        now: u64,
        yields: u32,
        sleeps: u32,
    }

    impl Platform for StepClock {
        fn name(&self) -> &'static str {
            "step"
        }

        fn now_ns(&self) -> u64 {
            self.now
        }

        fn yield_now(&mut self) {
            self.yields += 1;
            self.now += 1_000;
        }

        fn sleep_us(&mut self, us: u64) {
            self.sleeps += 1;
            self.now += us * 1_000;
        }
    }

    fn clock() -> StepClock {
        StepClock {
            now: 0,
            yields: 0,
            sleeps: 0,
        }
    }

    #[test]
    fn test_condition_met() {
        let mut platform = clock();
        let mut calls = 0;
        let result = poll_until(&mut platform, PollPolicy::YIELD, Duration::from_millis(1), || {
            calls += 1;
            Ok(calls == 3)
        });
        assert_eq!(result, Ok(()));
        assert_eq!(calls, 3);
        assert_eq!(platform.yields, 2);
    }

    #[test]
    fn test_timeout() {
        let mut platform = clock();
        let result = poll_until(
            &mut platform,
            PollPolicy::sleep(10),
            Duration::from_micros(100),
            || Ok(false),
        );
        assert_eq!(result, Err(Error::Timeout));
        assert_eq!(platform.sleeps, 10);
    }

    #[test]
    fn test_zero_timeout_checks_once() {
        let mut platform = clock();
        let result = poll_until(&mut platform, PollPolicy::YIELD, Duration::ZERO, || Ok(true));
        assert_eq!(result, Ok(()));
        assert_eq!(platform.yields, 0);
    }

    #[test]
    fn test_condition_error_cancels() {
        let mut platform = clock();
        let result = poll_until(&mut platform, PollPolicy::YIELD, Duration::from_secs(1), || {
            Err(Error::ResetInProgress)
        });
        assert_eq!(result, Err(Error::ResetInProgress));
        assert_eq!(platform.yields, 0);
    }
}
