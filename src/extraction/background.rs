//! Statistical background subtraction as an extraction strategy.

use std::time::Instant;

use super::traits::{ExtractorMetrics, ExtractorParams, ForegroundExtractor};
use crate::background::{BackgroundModel, ClassifyStats};
use crate::config::{BackgroundParams, SensorParams};
use crate::point::PolarPoint;
use crate::{Error, Result};

/// [`ForegroundExtractor`] backed by a [`BackgroundModel`].
#[derive(Debug)]
pub struct BackgroundSubtractor {
    model: BackgroundModel,
    last_stats: ClassifyStats,
}

impl BackgroundSubtractor {
    pub fn new(sensor: SensorParams, params: BackgroundParams) -> Result<Self> {
        Ok(Self {
            model: BackgroundModel::new(sensor, params)?,
            last_stats: ClassifyStats::default(),
        })
    }

    pub fn model(&self) -> &BackgroundModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut BackgroundModel {
        &mut self.model
    }

    /// Classification counters of the last frame, including freeze activity.
    pub fn last_stats(&self) -> ClassifyStats {
        self.last_stats
    }
}

impl ForegroundExtractor for BackgroundSubtractor {
    fn name(&self) -> &'static str {
        "background"
    }

    fn process_frame(
        &mut self,
        points: &[PolarPoint],
        _timestamp_ns: i64,
        mask: &mut Vec<bool>,
    ) -> ExtractorMetrics {
        let start = Instant::now();
        self.last_stats = self.model.classify(points, mask);
        let elapsed_us = start.elapsed().as_micros() as u64;
        ExtractorMetrics::from_mask(mask, self.last_stats.dropped, elapsed_us)
    }

    fn params(&self) -> ExtractorParams {
        ExtractorParams::Background(self.model.params().clone())
    }

    fn set_params(&mut self, params: ExtractorParams) -> Result<()> {
        match params {
            ExtractorParams::Background(p) => self.model.set_params(p),
            other => Err(Error::InvalidConfig(format!(
                "background extractor cannot take {} parameters",
                other.kind()
            ))),
        }
    }

    fn reset(&mut self) {
        self.model.reset();
        self.last_stats = ClassifyStats::default();
    }
}
