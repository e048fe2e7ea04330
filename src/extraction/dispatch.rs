//! Enum-based extractor dispatch for static (non-virtual) function calls.
//!
//! `ExtractorEnum` wraps every built-in strategy so collections of
//! extractors (hybrid members, harness entries) avoid `Box<dyn _>`.

use super::background::BackgroundSubtractor;
use super::hybrid::HybridExtractor;
use super::traits::{ExtractorMetrics, ExtractorParams, ForegroundExtractor};
use super::velocity::VelocityCoherentExtractor;
use crate::background::BackgroundModel;
use crate::config::{ExtractionStrategy, PipelineConfig};
use crate::point::PolarPoint;
use crate::{Error, Result};

/// Enum-based extractor for static dispatch.
#[derive(Debug)]
pub enum ExtractorEnum {
    Background(BackgroundSubtractor),
    VelocityCoherent(VelocityCoherentExtractor),
    Hybrid(HybridExtractor),
}

impl ExtractorEnum {
    /// Build the extractor for `strategy` from a pipeline configuration.
    ///
    /// A hybrid uses the background model as primary and the
    /// velocity-coherent extractor as fallback.
    pub fn from_config(strategy: ExtractionStrategy, config: &PipelineConfig) -> Result<Self> {
        Ok(match strategy {
            ExtractionStrategy::Background => ExtractorEnum::Background(
                BackgroundSubtractor::new(config.sensor.clone(), config.background.clone())?,
            ),
            ExtractionStrategy::VelocityCoherent => ExtractorEnum::VelocityCoherent(
                VelocityCoherentExtractor::new(config.sensor.clone(), config.velocity.clone())?,
            ),
            ExtractionStrategy::Hybrid => ExtractorEnum::Hybrid(HybridExtractor::new(
                vec![
                    Self::from_config(ExtractionStrategy::Background, config)?,
                    Self::from_config(ExtractionStrategy::VelocityCoherent, config)?,
                ],
                config.extraction.merge_policy,
                config.extraction.fallback_foreground_ratio,
            )?),
        })
    }

    /// Check that `params` fits this extractor's shape and values without
    /// applying them.
    pub fn check_params(&self, params: &ExtractorParams) -> Result<()> {
        match self {
            ExtractorEnum::Hybrid(e) => e.check_params(params),
            other if other.params().kind() != params.kind() => Err(Error::InvalidConfig(format!(
                "{} extractor cannot take {} parameters",
                other.name(),
                params.kind()
            ))),
            _ => params.validate(),
        }
    }

    /// The first background model reachable from this extractor, if any.
    pub fn background_model(&self) -> Option<&BackgroundModel> {
        match self {
            ExtractorEnum::Background(e) => Some(e.model()),
            ExtractorEnum::VelocityCoherent(_) => None,
            ExtractorEnum::Hybrid(e) => e.members().iter().find_map(|m| m.background_model()),
        }
    }

    /// Mutable access to the first reachable background model.
    pub fn background_model_mut(&mut self) -> Option<&mut BackgroundModel> {
        match self {
            ExtractorEnum::Background(e) => Some(e.model_mut()),
            ExtractorEnum::VelocityCoherent(_) => None,
            ExtractorEnum::Hybrid(e) => e
                .members_mut()
                .iter_mut()
                .find_map(|m| m.background_model_mut()),
        }
    }
}

impl ForegroundExtractor for ExtractorEnum {
    #[inline(always)]
    fn name(&self) -> &'static str {
        match self {
            ExtractorEnum::Background(e) => e.name(),
            ExtractorEnum::VelocityCoherent(e) => e.name(),
            ExtractorEnum::Hybrid(e) => e.name(),
        }
    }

    #[inline(always)]
    fn process_frame(
        &mut self,
        points: &[PolarPoint],
        timestamp_ns: i64,
        mask: &mut Vec<bool>,
    ) -> ExtractorMetrics {
        match self {
            ExtractorEnum::Background(e) => e.process_frame(points, timestamp_ns, mask),
            ExtractorEnum::VelocityCoherent(e) => e.process_frame(points, timestamp_ns, mask),
            ExtractorEnum::Hybrid(e) => e.process_frame(points, timestamp_ns, mask),
        }
    }

    #[inline(always)]
    fn params(&self) -> ExtractorParams {
        match self {
            ExtractorEnum::Background(e) => e.params(),
            ExtractorEnum::VelocityCoherent(e) => e.params(),
            ExtractorEnum::Hybrid(e) => e.params(),
        }
    }

    #[inline(always)]
    fn set_params(&mut self, params: ExtractorParams) -> Result<()> {
        match self {
            ExtractorEnum::Background(e) => e.set_params(params),
            ExtractorEnum::VelocityCoherent(e) => e.set_params(params),
            ExtractorEnum::Hybrid(e) => e.set_params(params),
        }
    }

    #[inline(always)]
    fn reset(&mut self) {
        match self {
            ExtractorEnum::Background(e) => e.reset(),
            ExtractorEnum::VelocityCoherent(e) => e.reset(),
            ExtractorEnum::Hybrid(e) => e.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MergePolicy, SensorParams};

    fn config(strategy: ExtractionStrategy) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.sensor = SensorParams {
            rings: 4,
            azimuth_bins: 90,
            ..SensorParams::default()
        };
        config.extraction.strategy = strategy;
        config.extraction.merge_policy = MergePolicy::Union;
        config
    }

    #[test]
    fn test_from_config_builds_each_strategy() {
        for (strategy, name) in [
            (ExtractionStrategy::Background, "background"),
            (ExtractionStrategy::VelocityCoherent, "velocity_coherent"),
            (ExtractionStrategy::Hybrid, "hybrid"),
        ] {
            let extractor = ExtractorEnum::from_config(strategy, &config(strategy)).unwrap();
            assert_eq!(extractor.name(), name);
        }
    }

    #[test]
    fn test_background_model_lookup() {
        let hybrid =
            ExtractorEnum::from_config(ExtractionStrategy::Hybrid, &config(ExtractionStrategy::Hybrid))
                .unwrap();
        assert!(hybrid.background_model().is_some());

        let velocity = ExtractorEnum::from_config(
            ExtractionStrategy::VelocityCoherent,
            &config(ExtractionStrategy::VelocityCoherent),
        )
        .unwrap();
        assert!(velocity.background_model().is_none());
    }

    #[test]
    fn test_dispatch_forwards_params() {
        let mut extractor = ExtractorEnum::from_config(
            ExtractionStrategy::Background,
            &config(ExtractionStrategy::Background),
        )
        .unwrap();
        let params = extractor.params();
        assert_eq!(params.kind(), "background");
        extractor.set_params(params).unwrap();
    }
}
