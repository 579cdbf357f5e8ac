use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// Range from which per-agent clocks are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Shared starting time, unix microseconds.
    pub base_micros: i64,
    /// Microseconds one round advances a clock.
    pub tick_micros: i64,
    /// Largest drift in parts per million.
    pub max_abs_drift_ppm: i32,
    /// Largest constant offset.
    pub max_abs_skew_micros: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            base_micros: 1_700_000_000_000_000,
            tick_micros: 100_000,
            max_abs_drift_ppm: 100,
            max_abs_skew_micros: 25_000,
        }
    }
}

impl ClockConfig {
    /// Draw one agent's clock.
    pub fn assign(&self, rng: &mut DeterministicRng) -> SimulatedClock {
        let drift_span = u64::from(self.max_abs_drift_ppm.unsigned_abs()) * 2 + 1;
        let skew_span = self.max_abs_skew_micros.unsigned_abs() * 2 + 1;
        let drift_ppm = i32::try_from(rng.next_bounded(drift_span)).unwrap_or(0) - self.max_abs_drift_ppm.abs();
        let skew_micros = i64::try_from(rng.next_bounded(skew_span)).unwrap_or(0) - self.max_abs_skew_micros.abs();
        SimulatedClock {
            base_micros: self.base_micros,
            tick_micros: self.tick_micros,
            drift_ppm,
            skew_micros,
            frozen_at: None,
        }
    }
}

/// Wall clock with drift, skew, and freezes. Produces the create times
/// stamped on changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedClock {
    base_micros: i64,
    tick_micros: i64,
    drift_ppm: i32,
    skew_micros: i64,
    frozen_at: Option<i64>,
}

impl SimulatedClock {
    /// Time at `round`, unix microseconds.
    #[must_use]
    pub fn now_micros(&self, round: u64) -> i64 {
        if let Some(frozen) = self.frozen_at {
            return frozen;
        }
        let progress = self
            .tick_micros
            .saturating_mul(i64::try_from(round).unwrap_or(i64::MAX));
        let drift = progress
            .saturating_mul(i64::from(self.drift_ppm))
            .saturating_div(1_000_000);
        self.base_micros
            .saturating_add(self.skew_micros)
            .saturating_add(progress)
            .saturating_add(drift)
    }

    pub fn freeze(&mut self, round: u64) {
        self.frozen_at = Some(self.now_micros(round));
    }

    pub const fn unfreeze(&mut self) {
        self.frozen_at = None;
    }

    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_advances_per_round() {
        let mut rng = DeterministicRng::new(1);
        let clock = ClockConfig::default().assign(&mut rng);
        assert!(clock.now_micros(10) > clock.now_micros(1));
    }

    #[test]
    fn frozen_clock_stands_still() {
        let mut rng = DeterministicRng::new(2);
        let mut clock = ClockConfig::default().assign(&mut rng);
        clock.freeze(3);
        assert_eq!(clock.now_micros(3), clock.now_micros(30));
        clock.unfreeze();
        assert!(!clock.is_frozen());
        assert!(clock.now_micros(30) > clock.now_micros(3));
    }

    #[test]
    fn skew_stays_in_bounds() {
        let config = ClockConfig::default();
        let mut rng = DeterministicRng::new(5);
        for _ in 0..100 {
            let clock = config.assign(&mut rng);
            let offset = clock.now_micros(0) - config.base_micros;
            assert!(offset.abs() <= config.max_abs_skew_micros);
        }
    }
}
