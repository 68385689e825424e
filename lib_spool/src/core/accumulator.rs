//! # Usage Accumulator
//!
//! Converts the absolute extruder position reported by the machine controller
//! into an extruded-length total awaiting its next flush to Spoolman.
//!
//! The controller's position is monotonically non-decreasing during normal
//! printing but can jump backwards on retraction or when the controller
//! resets its coordinate space. Only forward deltas count as usage; a
//! decrease is never treated as negative usage.

use tokio::sync::{Mutex, MutexGuard};

/// The lock-protected accumulation state.
#[derive(Debug)]
pub struct ExtrusionState {
    /// Unreported extruded length (mm) since the last successful flush.
    pub extruded: f64,
    /// Highest absolute extruder position seen so far.
    pub highest_epos: f64,
}

/// Running total of unreported filament usage.
///
/// All reads and writes of `extruded` go through one async mutex so that
/// concurrent observers and the flusher never interleave a read-modify-write.
/// This lock guards only accumulation; spool selection has its own.
pub struct UsageAccumulator {
    state: Mutex<ExtrusionState>,
}

impl Default for UsageAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ExtrusionState {
                extruded: 0.0,
                highest_epos: 0.0,
            }),
        }
    }

    /// Feeds one absolute position sample into the total.
    ///
    /// Non-positive samples and samples at or below the current high-water
    /// mark are ignored.
    pub async fn observe(&self, epos: f64) {
        if epos <= 0.0 {
            return;
        }
        let mut state = self.state.lock().await;
        if epos > state.highest_epos {
            state.extruded += epos - state.highest_epos;
            state.highest_epos = epos;
        }
    }

    /// Sets the high-water mark from the controller's current position
    /// without counting it as usage. Called once when the position feed
    /// subscription is established.
    pub async fn seed(&self, epos: f64) {
        let mut state = self.state.lock().await;
        state.highest_epos = epos;
    }

    /// Current unreported length in mm.
    pub async fn pending(&self) -> f64 {
        self.state.lock().await.extruded
    }

    /// Zeroes the unreported total. Used when a spool becomes active with
    /// nothing to flush.
    pub async fn reset(&self) {
        self.state.lock().await.extruded = 0.0;
    }

    /// Takes the accumulation lock for a flush critical section, so that the
    /// amount reported and the amount zeroed are the same number.
    pub async fn lock(&self) -> MutexGuard<'_, ExtrusionState> {
        self.state.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_deltas_accumulate() {
        let acc = UsageAccumulator::new();
        for epos in [10.0, 15.0, 12.0, 20.0] {
            acc.observe(epos).await;
        }
        // 0→10 adds 10, 10→15 adds 5, 12 is ignored, 15→20 adds 5.
        assert_eq!(acc.pending().await, 20.0);
    }

    #[tokio::test]
    async fn test_decrease_contributes_zero() {
        let acc = UsageAccumulator::new();
        acc.observe(50.0).await;
        acc.observe(30.0).await;
        assert_eq!(acc.pending().await, 50.0);
        // Usage resumes only past the previous high-water mark.
        acc.observe(55.0).await;
        assert_eq!(acc.pending().await, 55.0);
    }

    #[tokio::test]
    async fn test_non_positive_samples_ignored() {
        let acc = UsageAccumulator::new();
        acc.observe(0.0).await;
        acc.observe(-4.2).await;
        assert_eq!(acc.pending().await, 0.0);
    }

    #[tokio::test]
    async fn test_seed_does_not_count_as_usage() {
        let acc = UsageAccumulator::new();
        acc.seed(120.0).await;
        assert_eq!(acc.pending().await, 0.0);
        acc.observe(125.0).await;
        assert_eq!(acc.pending().await, 5.0);
    }

    #[tokio::test]
    async fn test_reset_keeps_high_water_mark() {
        let acc = UsageAccumulator::new();
        acc.observe(40.0).await;
        acc.reset().await;
        assert_eq!(acc.pending().await, 0.0);
        acc.observe(35.0).await;
        assert_eq!(acc.pending().await, 0.0);
    }
}
