//! Working-memory budget.

use log;

use crate::page::page_size;

/// Safety fraction of the total memory used by both merge phases.
pub const DEFAULT_BUDGET_FRACTION: f64 = 0.8;

/// Part of the usable budget the output accumulator may take before it is flushed (one fifth).
const OUTPUT_BUFFER_DIVISOR: u64 = 5;

/// Upper bound on bytes buffered simultaneously by one merge phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBudget {
    total: u64,
    fraction: f64,
}

impl MemoryBudget {
    /// Creates a budget from an explicit byte count.
    pub fn new(total: u64) -> Self {
        MemoryBudget {
            total,
            fraction: DEFAULT_BUDGET_FRACTION,
        }
    }

    /// Creates a budget from the total physical memory of the host.
    #[cfg(feature = "host-memory")]
    pub fn from_host() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_memory();
        let total = system.total_memory();

        log::info!("host memory: {} bytes", total);
        MemoryBudget::new(total)
    }

    /// Sets the safety fraction, clamped to `(0, 1]`.
    pub fn with_fraction(mut self, fraction: f64) -> Self {
        self.fraction = if fraction.is_finite() && fraction > 0.0 {
            fraction.min(1.0)
        } else {
            log::warn!("invalid budget fraction {}, using {}", fraction, DEFAULT_BUDGET_FRACTION);
            DEFAULT_BUDGET_FRACTION
        };
        return self;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// Bytes that may actually be buffered: total scaled by the safety fraction.
    pub fn usable(&self) -> u64 {
        ((self.total as f64 * self.fraction) as u64).max(1)
    }

    /// Output accumulator size that triggers a flush into the output mapping.
    pub fn output_buffer(&self) -> usize {
        (self.usable() / OUTPUT_BUFFER_DIVISOR).max(1) as usize
    }

    /// Window size of each of `streams` streams sharing the budget. Never smaller than a page.
    pub fn window_size(&self, streams: usize) -> usize {
        let share = self.usable() / streams.max(1) as u64;
        (share as usize).max(page_size())
    }

    /// Splits the budget evenly between `parts` concurrent consumers.
    pub fn split(&self, parts: usize) -> MemoryBudget {
        MemoryBudget {
            total: self.total / parts.max(1) as u64,
            fraction: self.fraction,
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{MemoryBudget, DEFAULT_BUDGET_FRACTION};
    use crate::page::page_size;

    #[test]
    fn test_usable() {
        let budget = MemoryBudget::new(1000);
        assert_eq!(budget.fraction(), DEFAULT_BUDGET_FRACTION);
        assert_eq!(budget.usable(), 800);
        assert_eq!(budget.output_buffer(), 160);

        let budget = budget.with_fraction(0.9);
        assert_eq!(budget.usable(), 900);
    }

    #[rstest]
    #[case(0.0)]
    #[case(-1.0)]
    #[case(f64::NAN)]
    fn test_invalid_fraction(#[case] fraction: f64) {
        assert_eq!(MemoryBudget::new(1000).with_fraction(fraction).fraction(), DEFAULT_BUDGET_FRACTION);
    }

    #[test]
    fn test_fraction_clamped() {
        assert_eq!(MemoryBudget::new(1000).with_fraction(2.0).usable(), 1000);
    }

    #[test]
    fn test_window_size() {
        let budget = MemoryBudget::new(100 * page_size() as u64).with_fraction(1.0);
        assert_eq!(budget.window_size(4), 25 * page_size());
        assert_eq!(budget.window_size(0), 100 * page_size());
        assert_eq!(budget.window_size(1000), page_size());
    }

    #[test]
    fn test_split() {
        let budget = MemoryBudget::new(1000).split(4);
        assert_eq!(budget.total(), 250);
        assert_eq!(budget.usable(), 200);
    }

    #[cfg(feature = "host-memory")]
    #[test]
    fn test_from_host() {
        assert!(MemoryBudget::from_host().total() > 0);
    }
}
