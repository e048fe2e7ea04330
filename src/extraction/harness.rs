//! Side-by-side comparison of extraction strategies.
//!
//! Every registered extractor classifies the same frame (concurrently, each
//! owns disjoint state). The harness records per-algorithm metrics and the
//! pairwise agreement of their masks, keeping the most recent N frames.

use std::collections::VecDeque;
use std::path::Path;

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::dispatch::ExtractorEnum;
use super::traits::{ExtractorMetrics, ForegroundExtractor};
use crate::point::PolarPoint;
use crate::{Error, Result};

/// Metrics of one algorithm on one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmMetrics {
    pub name: String,
    #[serde(flatten)]
    pub metrics: ExtractorMetrics,
}

/// Fraction of points two algorithms classified identically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairAgreement {
    pub first: String,
    pub second: String,
    pub agreement_pct: f64,
}

/// One frame's comparison record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameComparison {
    pub frame_id: u64,
    pub timestamp_ns: i64,
    pub point_count: usize,
    pub algorithms: Vec<AlgorithmMetrics>,
    pub agreement: Vec<PairAgreement>,
}

/// Runs several extractors per frame and keeps recent comparisons.
///
/// The first extractor is the primary; its mask drives the rest of the
/// pipeline.
#[derive(Debug)]
pub struct ComparisonHarness {
    extractors: Vec<ExtractorEnum>,
    masks: Vec<Vec<bool>>,
    metrics: Vec<ExtractorMetrics>,
    history: VecDeque<FrameComparison>,
    history_len: usize,
}

impl ComparisonHarness {
    pub fn new(extractors: Vec<ExtractorEnum>, history_len: usize) -> Result<Self> {
        if extractors.is_empty() {
            return Err(Error::InvalidConfig(
                "comparison harness needs at least one extractor".to_string(),
            ));
        }
        if history_len == 0 {
            return Err(Error::InvalidConfig("history_len must be positive".to_string()));
        }
        let n = extractors.len();
        Ok(Self {
            extractors,
            masks: vec![Vec::new(); n],
            metrics: vec![ExtractorMetrics::default(); n],
            history: VecDeque::with_capacity(history_len),
            history_len,
        })
    }

    pub fn extractors(&self) -> &[ExtractorEnum] {
        &self.extractors
    }

    pub fn extractors_mut(&mut self) -> &mut [ExtractorEnum] {
        &mut self.extractors
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }

    /// Mask of the primary extractor from the last frame.
    pub fn primary_mask(&self) -> &[bool] {
        &self.masks[0]
    }

    /// Metrics of the primary extractor from the last frame.
    pub fn primary_metrics(&self) -> ExtractorMetrics {
        self.metrics[0]
    }

    /// Mask of extractor `index` from the last frame.
    pub fn mask(&self, index: usize) -> Option<&[bool]> {
        self.masks.get(index).map(Vec::as_slice)
    }

    /// Run every extractor on a frame and record the comparison.
    pub fn run_frame(
        &mut self,
        frame_id: u64,
        points: &[PolarPoint],
        timestamp_ns: i64,
    ) -> &FrameComparison {
        self.extractors
            .par_iter_mut()
            .zip(self.masks.par_iter_mut())
            .zip(self.metrics.par_iter_mut())
            .for_each(|((extractor, mask), metrics)| {
                *metrics = extractor.process_frame(points, timestamp_ns, mask);
            });

        let algorithms: Vec<AlgorithmMetrics> = self
            .extractors
            .iter()
            .zip(&self.metrics)
            .map(|(e, m)| AlgorithmMetrics {
                name: e.name().to_string(),
                metrics: *m,
            })
            .collect();

        let mut agreement = Vec::new();
        for a in 0..self.extractors.len() {
            for b in (a + 1)..self.extractors.len() {
                agreement.push(PairAgreement {
                    first: algorithms[a].name.clone(),
                    second: algorithms[b].name.clone(),
                    agreement_pct: agreement_pct(&self.masks[a], &self.masks[b]),
                });
            }
        }
        for pair in &agreement {
            debug!(
                "frame {}: {} vs {} agree on {:.1}% of points",
                frame_id, pair.first, pair.second, pair.agreement_pct
            );
        }

        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(FrameComparison {
            frame_id,
            timestamp_ns,
            point_count: points.len(),
            algorithms,
            agreement,
        });
        &self.history[self.history.len() - 1]
    }

    /// Up to `n` most recent comparisons, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &FrameComparison> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip)
    }

    pub fn history(&self) -> &VecDeque<FrameComparison> {
        &self.history
    }

    /// Recent comparisons as a JSON array, oldest first.
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.history)?)
    }

    /// Write [`export_json`](Self::export_json) to a file.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.export_json()?)?;
        Ok(())
    }

    /// Reset every extractor and clear the history.
    pub fn reset(&mut self) {
        for extractor in &mut self.extractors {
            extractor.reset();
        }
        self.history.clear();
    }
}

/// Percentage of positions where two masks agree; 100 for empty masks.
fn agreement_pct(a: &[bool], b: &[bool]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 100.0;
    }
    let same = a.iter().zip(b).filter(|(x, y)| x == y).count();
    100.0 * same as f64 / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackgroundParams, SensorParams, VelocityParams};
    use crate::extraction::{BackgroundSubtractor, VelocityCoherentExtractor};
    use approx::assert_relative_eq;

    const FRAME_NS: i64 = 100_000_000;

    fn sensor() -> SensorParams {
        SensorParams {
            rings: 1,
            azimuth_bins: 100,
            ..SensorParams::default()
        }
    }

    fn harness(history_len: usize) -> ComparisonHarness {
        ComparisonHarness::new(
            vec![
                ExtractorEnum::Background(
                    BackgroundSubtractor::new(sensor(), BackgroundParams::default()).unwrap(),
                ),
                ExtractorEnum::VelocityCoherent(
                    VelocityCoherentExtractor::new(sensor(), VelocityParams::default()).unwrap(),
                ),
            ],
            history_len,
        )
        .unwrap()
    }

    fn wall(frame: i64, range: f64) -> Vec<PolarPoint> {
        (0..100)
            .map(|bin| PolarPoint::new(0, bin as f64 * 3.6 + 1.0, 0.0, range, 1.0, frame * FRAME_NS))
            .collect()
    }

    #[test]
    fn test_agreement_pct() {
        assert_relative_eq!(agreement_pct(&[true, false, true, true], &[true, true, true, false]), 50.0);
        assert_relative_eq!(agreement_pct(&[], &[]), 100.0);
    }

    #[test]
    fn test_records_metrics_and_agreement() {
        let mut harness = harness(8);
        for f in 0..3 {
            harness.run_frame(f as u64, &wall(f, 25.0), f * FRAME_NS);
        }
        let record = harness.run_frame(3, &wall(3, 25.0), 3 * FRAME_NS).clone();

        assert_eq!(record.algorithms.len(), 2);
        assert_eq!(record.algorithms[0].name, "background");
        assert_eq!(record.algorithms[1].name, "velocity_coherent");
        assert_eq!(record.agreement.len(), 1);
        assert_relative_eq!(record.agreement[0].agreement_pct, 100.0);
        assert_eq!(harness.primary_mask().len(), 100);
    }

    #[test]
    fn test_disagreement_recorded() {
        let mut harness = harness(8);
        for f in 0..3 {
            harness.run_frame(f as u64, &wall(f, 25.0), f * FRAME_NS);
        }
        // Sudden jump: background flags all, velocity (|rate| too high) none
        let record = harness.run_frame(3, &wall(3, 5.0), 3 * FRAME_NS);
        assert_eq!(record.algorithms[0].metrics.foreground, 100);
        assert_eq!(record.algorithms[1].metrics.foreground, 0);
        assert_relative_eq!(record.agreement[0].agreement_pct, 0.0);
    }

    #[test]
    fn test_history_bounded() {
        let mut harness = harness(3);
        for f in 0..10 {
            harness.run_frame(f as u64, &wall(f, 25.0), f * FRAME_NS);
        }
        assert_eq!(harness.history().len(), 3);
        let ids: Vec<u64> = harness.recent(2).map(|c| c.frame_id).collect();
        assert_eq!(ids, vec![8, 9]);
        let all: Vec<u64> = harness.recent(100).map(|c| c.frame_id).collect();
        assert_eq!(all, vec![7, 8, 9]);
    }

    #[test]
    fn test_export_json() {
        let mut harness = harness(4);
        harness.run_frame(0, &wall(0, 25.0), 0);
        let json = harness.export_json().unwrap();
        let parsed: Vec<FrameComparison> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].point_count, 100);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comparisons.json");
        harness.write_json(&path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("velocity_coherent"));
    }

    #[test]
    fn test_invalid_construction() {
        assert!(ComparisonHarness::new(Vec::new(), 4).is_err());
    }
}
