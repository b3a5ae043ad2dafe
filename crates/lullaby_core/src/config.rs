//! Tuning knobs for the integrity sweeps.
//!
//! # Invariants
//! - Sweeps never hold a lock across children; `sweep_delay` only paces load.
//! - A zero batch size is treated as one.

use std::time::Duration;

const DEFAULT_SWEEP_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_CLEAN_BATCH_SIZE: usize = 500;

/// Configuration shared by analyzer, repair engine, scanner and health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityConfig {
    /// Pause inserted between children in system-wide sweeps.
    pub sweep_delay: Duration,
    /// Maximum orphaned ids deleted per statement batch.
    pub clean_batch_size: usize,
    /// Compare key multisets even when cardinalities already agree.
    pub verify_keys: bool,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            sweep_delay: DEFAULT_SWEEP_DELAY,
            clean_batch_size: DEFAULT_CLEAN_BATCH_SIZE,
            verify_keys: false,
        }
    }
}

impl IntegrityConfig {
    pub fn with_sweep_delay(mut self, sweep_delay: Duration) -> Self {
        self.sweep_delay = sweep_delay;
        self
    }

    pub fn with_verify_keys(mut self, verify_keys: bool) -> Self {
        self.verify_keys = verify_keys;
        self
    }

    pub fn with_clean_batch_size(mut self, clean_batch_size: usize) -> Self {
        self.clean_batch_size = clean_batch_size;
        self
    }

    pub(crate) fn effective_batch_size(&self) -> usize {
        self.clean_batch_size.max(1)
    }

    /// Sleeps `sweep_delay` before every child except the first.
    pub(crate) fn pace(&self, index: usize) {
        if index > 0 && !self.sweep_delay.is_zero() {
            std::thread::sleep(self.sweep_delay);
        }
    }
}
