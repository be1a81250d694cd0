//! Hysteresis accumulator turning per-frame pose verdicts into a slowly
//! varying confidence counter.

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIDENCE_TARGET: u32 = 20;

/// Tuning for the accumulator. A pass adds `gain`, a failing frame with a
/// face present subtracts `penalty`; both clamp to `[0, target]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HysteresisConfig {
    pub target: u32,
    pub gain: u32,
    pub penalty: u32,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            target: DEFAULT_CONFIDENCE_TARGET,
            gain: 1,
            penalty: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Accumulator {
    confidence: u32,
    config: HysteresisConfig,
}

impl Accumulator {
    /// A zero target would make every frame an acceptance; it is raised to 1.
    pub fn new(config: HysteresisConfig) -> Self {
        Self {
            confidence: 0,
            config: HysteresisConfig {
                target: config.target.max(1),
                ..config
            },
        }
    }

    /// Fold one verdict into the counter and return the new confidence.
    pub fn record(&mut self, pass: bool) -> u32 {
        self.confidence = if pass {
            self.confidence
                .saturating_add(self.config.gain)
                .min(self.config.target)
        } else {
            self.confidence.saturating_sub(self.config.penalty)
        };
        self.confidence
    }

    /// Drop all progress (no face, occluded, or after an acceptance).
    pub fn reset(&mut self) {
        self.confidence = 0;
    }

    pub fn confidence(&self) -> u32 {
        self.confidence
    }

    pub fn target(&self) -> u32 {
        self.config.target
    }

    pub fn is_saturated(&self) -> bool {
        self.confidence >= self.config.target
    }

    pub fn progress_percent(&self) -> u8 {
        (u64::from(self.confidence) * 100 / u64::from(self.config.target)) as u8
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new(HysteresisConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_increments_to_target() {
        let mut acc = Accumulator::default();
        for expected in 1..=20 {
            assert_eq!(acc.record(true), expected);
        }
        assert!(acc.is_saturated());
        assert_eq!(acc.record(true), 20, "must clamp at target");
        assert_eq!(acc.progress_percent(), 100);
    }

    #[test]
    fn test_fail_is_one_frame_penalty() {
        let mut acc = Accumulator::default();
        for _ in 0..10 {
            acc.record(true);
        }
        assert_eq!(acc.record(false), 9);
        assert_eq!(acc.record(true), 10);
    }

    #[test]
    fn test_fail_floors_at_zero() {
        let mut acc = Accumulator::default();
        assert_eq!(acc.record(false), 0);
        acc.record(true);
        acc.record(false);
        assert_eq!(acc.record(false), 0);
    }

    #[test]
    fn test_matches_clamped_running_sum() {
        // Deterministic pseudo-random verdict stream (LCG).
        let mut state: u32 = 0x2545_f491;
        let mut acc = Accumulator::default();
        let mut model: i64 = 0;
        for _ in 0..5_000 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            // Bias toward passes so the upper clamp is exercised too.
            let pass = (state >> 16) % 3 != 0;
            model = (model + if pass { 1 } else { -1 }).clamp(0, 20);
            let c = acc.record(pass);
            assert_eq!(i64::from(c), model);
            assert!(c <= 20);
        }
    }

    #[test]
    fn test_sustained_failure_drains_over_target_frames() {
        let mut acc = Accumulator::default();
        for _ in 0..20 {
            acc.record(true);
        }
        for _ in 0..19 {
            acc.record(false);
        }
        assert_eq!(acc.confidence(), 1);
        acc.record(false);
        assert_eq!(acc.confidence(), 0);
    }

    #[test]
    fn test_progress_percent() {
        let mut acc = Accumulator::default();
        assert_eq!(acc.progress_percent(), 0);
        for _ in 0..5 {
            acc.record(true);
        }
        assert_eq!(acc.progress_percent(), 25);
        for _ in 0..14 {
            acc.record(true);
        }
        assert_eq!(acc.progress_percent(), 95);
    }

    #[test]
    fn test_custom_ratio() {
        let mut acc = Accumulator::new(HysteresisConfig {
            target: 10,
            gain: 2,
            penalty: 3,
        });
        assert_eq!(acc.record(true), 2);
        assert_eq!(acc.record(true), 4);
        assert_eq!(acc.record(false), 1);
        for _ in 0..10 {
            acc.record(true);
        }
        assert_eq!(acc.confidence(), 10);
    }

    #[test]
    fn test_zero_target_is_raised() {
        let acc = Accumulator::new(HysteresisConfig {
            target: 0,
            gain: 1,
            penalty: 1,
        });
        assert_eq!(acc.target(), 1);
        assert_eq!(acc.progress_percent(), 0);
    }
}
