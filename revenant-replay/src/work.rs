/// Words in the scratch buffer the canonical work primitive churns
/// through, sized to exceed a typical 32 KiB L1 data cache so the loop
/// can't live entirely in cache and get optimized into a no-op.
const SCRATCH_WORDS: usize = 8192;

/// The one canonical unit of CPU load every training and replay path
/// in this crate spends: one pass of a multiply-accumulate over a
/// fixed scratch buffer. Training measures units/sec on this host;
/// replay spends exactly the number of units the calibration table
/// says corresponds to a target busy percentage.
pub struct Workload {
    scratch: Vec<u64>,
}

impl Workload {
    pub fn new() -> Self {
        Self { scratch: (0..SCRATCH_WORDS as u64).collect() }
    }

    /// Runs `units` passes over the scratch buffer synchronously.
    /// `std::hint::black_box` keeps the optimizer from eliding the
    /// loop or proving the accumulator is unused.
    pub fn run_units(&mut self, units: u64) {
        let mut acc: u64 = 0xdead_beef;
        for _ in 0..units {
            for word in self.scratch.iter_mut() {
                *word = std::hint::black_box(word.wrapping_mul(2_654_435_761).wrapping_add(acc));
                acc = acc.wrapping_add(*word);
            }
        }
        std::hint::black_box(acc);
    }
}

impl Default for Workload {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn more_units_take_longer() {
        let mut w = Workload::new();
        let start = Instant::now();
        w.run_units(50);
        let small = start.elapsed();

        let start = Instant::now();
        w.run_units(500);
        let large = start.elapsed();

        assert!(large >= small);
    }

    #[test]
    fn zero_units_is_a_no_op() {
        let mut w = Workload::new();
        w.run_units(0);
    }
}
