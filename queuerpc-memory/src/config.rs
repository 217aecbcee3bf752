//! Chaos configuration for the in-memory queue.
//!
//! | Fault | Field | Default | What it exercises |
//! |-------|-------|---------|-------------------|
//! | Send failure | `send_failure_probability` | 0% | Sender requeue and cooldown |
//! | Duplicate delivery | `duplicate_probability` | 0% | Late/duplicate reply handling |
//!
//! Probabilistic faults are drawn from a seeded RNG so a failing run can be
//! replayed. Deterministic one-shot faults live on
//! [`MemoryQueue`](crate::MemoryQueue) (`fail_next_sends` and friends).

/// Probabilistic fault injection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosConfig {
    /// Seed for the fault RNG.
    pub seed: u64,

    /// Probability that a send is rejected (0.0 - 1.0).
    pub send_failure_probability: f64,

    /// Probability that an accepted send is enqueued twice (0.0 - 1.0).
    pub duplicate_probability: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            send_failure_probability: 0.0,
            duplicate_probability: 0.0,
        }
    }
}

impl ChaosConfig {
    /// No faults.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A flaky broker: 10% send failures, 5% duplicates.
    pub fn flaky(seed: u64) -> Self {
        Self {
            seed,
            send_failure_probability: 0.10,
            duplicate_probability: 0.05,
        }
    }

    /// Whether any probabilistic fault is enabled.
    pub fn is_enabled(&self) -> bool {
        self.send_failure_probability > 0.0 || self.duplicate_probability > 0.0
    }
}
