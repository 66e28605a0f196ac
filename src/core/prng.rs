// Minimal PRNG (no external crates).
//
// This is NOT cryptographically secure.
// It drives episode sampling (test-mode draws, object placement, start noise)
// and is seeded per pool member so runs are reproducible.

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    /// Seed for pool member `index`, derived from an optional base seed.
    pub fn for_member(base: Option<u64>, index: usize) -> Self {
        let base = base.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x2545F4914F6CDD1D)
        });
        // splitmix step so neighbouring members diverge immediately
        let mut z = base.wrapping_add((index as u64 + 1).wrapping_mul(0x9E3779B97F4A7C15));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        Self::new(z ^ (z >> 31))
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Uniform in [0, 1).
    #[inline]
    pub fn next_f64_01(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    #[inline]
    pub fn gen_range_f64(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64_01()
    }

    /// Uniform integer in [low, high); returns `low` for an empty range.
    #[inline]
    pub fn gen_range_i64(&mut self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        let span = high.abs_diff(low);
        low.wrapping_add((self.next_u64() % span) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_stay_in_bounds() {
        let mut rng = Prng::new(7);
        for _ in 0..1000 {
            let f = rng.gen_range_f64(-1.0, 1.0);
            assert!((-1.0..1.0).contains(&f));
            let i = rng.gen_range_i64(-3, 3);
            assert!((-3..3).contains(&i));
        }
        assert_eq!(rng.gen_range_i64(4, 4), 4);
    }

    #[test]
    fn members_get_distinct_streams() {
        let mut a = Prng::for_member(Some(1), 0);
        let mut b = Prng::for_member(Some(1), 1);
        let mut a2 = Prng::for_member(Some(1), 0);
        assert_ne!(a.next_u64(), b.next_u64());
        assert_eq!(Prng::for_member(Some(1), 0).next_u64(), a2.next_u64());
    }
}
