//! PCG32 generator used to randomize auto-flush thresholds.

/// PCG random number generator (32-bit)
#[derive(Clone, Copy, Debug)]
pub struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    /// Default increment (must be odd)
    const DEFAULT_INC: u64 = 1442695040888963407;

    /// Creates a new PCG with the given seed
    pub const fn new(seed: u64) -> Self {
        let mut rng = Self {
            state: 0,
            inc: Self::DEFAULT_INC,
        };
        rng.state = seed.wrapping_add(rng.inc);
        rng.step();
        rng
    }

    const fn step(&mut self) {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(self.inc);
    }

    /// Generates the next u32
    pub fn next_u32(&mut self) -> u32 {
        let old_state = self.state;
        self.step();

        let xorshifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Generates a u32 in range [0, bound)
    pub fn next_u32_bounded(&mut self, bound: u32) -> u32 {
        let threshold = bound.wrapping_neg() % bound;
        loop {
            let r = self.next_u32();
            if r >= threshold {
                return r % bound;
            }
        }
    }

    /// Generates a u32 in range [min, max]
    pub fn next_in_range(&mut self, min: u32, max: u32) -> u32 {
        debug_assert!(min <= max);
        match (max - min).checked_add(1) {
            Some(span) => min + self.next_u32_bounded(span),
            // Full u32 range
            None => self.next_u32(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let mut a = Pcg32::new(42);
        let mut b = Pcg32::new(42);
        for _ in 0..16 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn test_range_inclusive() {
        let mut rng = Pcg32::new(7);
        let mut seen_min = false;
        let mut seen_max = false;
        for _ in 0..1000 {
            let v = rng.next_in_range(10, 13);
            assert!((10..=13).contains(&v));
            seen_min |= v == 10;
            seen_max |= v == 13;
        }
        assert!(seen_min && seen_max);
        assert_eq!(rng.next_in_range(5, 5), 5);
    }
}
