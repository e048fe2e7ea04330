//! Learned statistics for one polar grid location.

use serde::{Deserialize, Serialize};

use crate::config::BackgroundParams;

/// Keeps the closeness threshold strictly positive for zero-spread cells.
const THRESHOLD_EPSILON: f64 = 1e-6;

/// Background statistics for one (ring, azimuth-bin) cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackgroundCell {
    /// Exponentially smoothed background range (m).
    pub average_range: f64,
    /// Exponentially smoothed absolute deviation from the average (m).
    pub range_spread: f64,
    /// Count of confident background observations.
    pub confidence: u32,
    /// Decaying count of recent foreground returns.
    pub recent_foreground: u32,
    /// Baseline range captured once the cell is confident.
    pub locked_baseline: Option<f64>,
    /// Spread captured together with the locked baseline.
    pub locked_spread: f64,
    /// While set and in the future, every return here is foreground.
    pub freeze_until_ns: Option<i64>,
    /// No new freeze may start before this time.
    pub refreeze_guard_until_ns: Option<i64>,
    /// Total returns ever seen; zero means the cell is unlearned.
    pub observations: u32,
}

impl BackgroundCell {
    /// Whether the cell has seen at least one return.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.observations > 0
    }

    /// Whether the cell is frozen at `timestamp_ns`.
    #[inline]
    pub fn is_frozen(&self, timestamp_ns: i64) -> bool {
        self.freeze_until_ns.is_some_and(|until| timestamp_ns < until)
    }

    /// Whether a new freeze may start at `timestamp_ns`.
    #[inline]
    pub fn can_freeze(&self, timestamp_ns: i64) -> bool {
        self.refreeze_guard_until_ns
            .map_or(true, |guard| timestamp_ns >= guard)
    }

    /// Maximum range difference still accepted as background for an
    /// observation at `observed_range`.
    #[inline]
    pub fn closeness_threshold(&self, observed_range: f64, params: &BackgroundParams) -> f64 {
        threshold_for(self.range_spread, observed_range, params)
    }

    /// Whether `observed_range` falls inside the locked-baseline window.
    ///
    /// Only applies once the cell has accumulated
    /// `locked_baseline_threshold` confident observations.
    pub fn within_locked_window(&self, observed_range: f64, params: &BackgroundParams) -> bool {
        if self.confidence < params.locked_baseline_threshold {
            return false;
        }
        match self.locked_baseline {
            Some(baseline) => {
                (observed_range - baseline).abs()
                    <= threshold_for(self.locked_spread, observed_range, params)
            }
            None => false,
        }
    }

    /// Adopt the first return as the background estimate.
    pub(crate) fn seed(&mut self, observed_range: f64) {
        self.average_range = observed_range;
        self.range_spread = 0.0;
        self.confidence = 1;
        self.recent_foreground = 0;
        self.observations = 1;
    }

    /// End an expired freeze and start the re-freeze guard.
    pub(crate) fn thaw(&mut self, timestamp_ns: i64, grace_ns: i64) {
        self.freeze_until_ns = None;
        self.recent_foreground = 0;
        self.refreeze_guard_until_ns = Some(timestamp_ns.saturating_add(grace_ns));
    }

    /// Fold a background observation into the running statistics.
    ///
    /// `direct_match` is false when the observation was only accepted via
    /// neighbour confirmation; those never move the locked baseline.
    pub(crate) fn absorb(&mut self, observed_range: f64, direct_match: bool, params: &BackgroundParams) {
        let alpha = if self.recent_foreground > 0 {
            (params.smoothing_fraction * params.reacquisition_boost).min(1.0)
        } else {
            params.smoothing_fraction
        };

        let delta = observed_range - self.average_range;
        self.average_range += alpha * delta;
        self.range_spread = (1.0 - alpha) * self.range_spread + alpha * delta.abs();
        self.confidence = self.confidence.saturating_add(1);
        self.recent_foreground = self.recent_foreground.saturating_sub(1);
        self.observations = self.observations.saturating_add(1);

        if direct_match && self.confidence >= params.locked_baseline_threshold {
            self.locked_baseline = Some(self.average_range);
            self.locked_spread = self.range_spread;
        }
    }

    /// Record a foreground observation.
    pub(crate) fn reject(&mut self, params: &BackgroundParams) {
        self.confidence = self
            .confidence
            .saturating_sub(1)
            .max(params.min_confidence_floor);
        self.recent_foreground = self.recent_foreground.saturating_add(1);
        self.observations = self.observations.saturating_add(1);
    }
}

#[inline]
fn threshold_for(spread: f64, observed_range: f64, params: &BackgroundParams) -> f64 {
    params.sensitivity_multiplier
        * (spread + params.noise_fraction * observed_range + THRESHOLD_EPSILON)
        + params.safety_margin_m
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn learned_cell(average: f64, spread: f64, confidence: u32) -> BackgroundCell {
        BackgroundCell {
            average_range: average,
            range_spread: spread,
            confidence,
            observations: confidence,
            ..Default::default()
        }
    }

    #[test]
    fn test_closeness_threshold() {
        let params = BackgroundParams {
            noise_fraction: 0.0,
            ..Default::default()
        };
        let cell = learned_cell(10.0, 0.05, 20);
        // 3.0 * (0.05 + 0) + 0.5
        assert_relative_eq!(cell.closeness_threshold(10.02, &params), 0.65, epsilon = 1e-4);
    }

    #[test]
    fn test_absorb_moves_average_towards_observation() {
        let params = BackgroundParams::default();
        let mut cell = learned_cell(10.0, 0.0, 5);
        cell.absorb(11.0, true, &params);

        assert_relative_eq!(cell.average_range, 10.02, epsilon = 1e-12);
        assert_relative_eq!(cell.range_spread, 0.02, epsilon = 1e-12);
        assert_eq!(cell.confidence, 6);
    }

    #[test]
    fn test_absorb_boosts_after_foreground() {
        let params = BackgroundParams::default();
        let mut cell = learned_cell(10.0, 0.0, 5);
        cell.recent_foreground = 2;
        cell.absorb(11.0, true, &params);

        // 0.02 * 4.0 boost
        assert_relative_eq!(cell.average_range, 10.08, epsilon = 1e-12);
        assert_eq!(cell.recent_foreground, 1);
    }

    #[test]
    fn test_reject_respects_confidence_floor() {
        let params = BackgroundParams {
            min_confidence_floor: 3,
            ..Default::default()
        };
        let mut cell = learned_cell(10.0, 0.0, 4);
        cell.reject(&params);
        assert_eq!(cell.confidence, 3);
        cell.reject(&params);
        assert_eq!(cell.confidence, 3);
        assert_eq!(cell.recent_foreground, 2);
    }

    #[test]
    fn test_locked_baseline_after_threshold() {
        let params = BackgroundParams {
            locked_baseline_threshold: 3,
            ..Default::default()
        };
        let mut cell = learned_cell(10.0, 0.0, 1);
        cell.absorb(10.0, true, &params);
        assert!(cell.locked_baseline.is_none());
        cell.absorb(10.0, true, &params);
        assert_eq!(cell.locked_baseline, Some(10.0));
        assert!(cell.within_locked_window(10.1, &params));
        assert!(!cell.within_locked_window(14.0, &params));
    }

    #[test]
    fn test_neighbor_confirmed_absorb_keeps_lock() {
        let params = BackgroundParams {
            locked_baseline_threshold: 1,
            ..Default::default()
        };
        let mut cell = learned_cell(10.0, 0.0, 1);
        cell.locked_baseline = Some(10.0);
        cell.absorb(12.0, false, &params);
        assert_eq!(cell.locked_baseline, Some(10.0));
    }

    #[test]
    fn test_freeze_and_thaw() {
        let mut cell = learned_cell(10.0, 0.0, 1);
        cell.freeze_until_ns = Some(1_000);
        assert!(cell.is_frozen(999));
        assert!(!cell.is_frozen(1_000));

        cell.recent_foreground = 7;
        cell.thaw(1_000, 200);
        assert!(cell.freeze_until_ns.is_none());
        assert_eq!(cell.recent_foreground, 0);
        assert!(!cell.can_freeze(1_100));
        assert!(cell.can_freeze(1_200));
    }
}
