//! Import statistics tracking.

use std::time::Duration;

/// Statistics for a completed import run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Number of checkpoints that committed
    pub batches: usize,
    /// Number of records committed across all batches
    pub records: usize,
    pub elapsed: Duration,
}

impl ImportStats {
    pub fn record_batch(&mut self, size: usize) {
        self.batches += 1;
        self.records += size;
    }

    pub fn records_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return self.records as f64;
        }
        self.records as f64 / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_batch_accumulates() {
        let mut stats = ImportStats::default();
        stats.record_batch(1_000);
        stats.record_batch(500);

        assert_eq!(stats.batches, 2);
        assert_eq!(stats.records, 1_500);
    }

    #[test]
    fn throughput_uses_elapsed_time() {
        let stats = ImportStats {
            batches: 4,
            records: 4_000,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(stats.records_per_second(), 2_000.0);
    }
}
