//! Extractor traits and shared types.

use serde::{Deserialize, Serialize};

use crate::config::{BackgroundParams, MergePolicy, VelocityParams};
use crate::point::PolarPoint;
use crate::{Error, Result};

/// Interface of a foreground extraction strategy.
///
/// Implementations own all of their state, so several can run over the same
/// frame concurrently.
pub trait ForegroundExtractor: Send {
    /// Stable strategy name, used in comparison records.
    fn name(&self) -> &'static str;

    /// Classify one frame.
    ///
    /// `mask` is cleared and resized to `points.len()`; on return `mask[i]`
    /// is true iff point `i` is foreground.
    fn process_frame(
        &mut self,
        points: &[PolarPoint],
        timestamp_ns: i64,
        mask: &mut Vec<bool>,
    ) -> ExtractorMetrics;

    /// Current tuning parameters.
    fn params(&self) -> ExtractorParams;

    /// Replace tuning parameters. Learned state is kept.
    fn set_params(&mut self, params: ExtractorParams) -> Result<()>;

    /// Forget all learned state.
    fn reset(&mut self);
}

/// Per-frame counters reported by an extractor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractorMetrics {
    pub foreground: usize,
    pub background: usize,
    /// Malformed points excluded from both classes.
    pub dropped: usize,
    /// `foreground / (foreground + background)`, 0 when no point was classified.
    pub foreground_ratio: f64,
    pub elapsed_us: u64,
}

impl ExtractorMetrics {
    /// Metrics from a finished mask. `dropped` points must be false in `mask`.
    pub fn from_mask(mask: &[bool], dropped: usize, elapsed_us: u64) -> Self {
        let foreground = mask.iter().filter(|&&fg| fg).count();
        let background = mask.len().saturating_sub(foreground + dropped);
        let classified = foreground + background;
        Self {
            foreground,
            background,
            dropped,
            foreground_ratio: if classified > 0 {
                foreground as f64 / classified as f64
            } else {
                0.0
            },
            elapsed_us,
        }
    }
}

/// Tuning parameters of any extractor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractorParams {
    Background(BackgroundParams),
    VelocityCoherent(VelocityParams),
    Hybrid {
        policy: MergePolicy,
        fallback_foreground_ratio: f64,
        members: Vec<ExtractorParams>,
    },
}

impl ExtractorParams {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractorParams::Background(_) => "background",
            ExtractorParams::VelocityCoherent(_) => "velocity_coherent",
            ExtractorParams::Hybrid { .. } => "hybrid",
        }
    }

    /// Check every value, recursing into hybrid members.
    pub fn validate(&self) -> Result<()> {
        match self {
            ExtractorParams::Background(p) => p.validate(),
            ExtractorParams::VelocityCoherent(p) => p.validate(),
            ExtractorParams::Hybrid {
                fallback_foreground_ratio,
                members,
                ..
            } => {
                if members.is_empty() {
                    return Err(Error::InvalidConfig(
                        "hybrid extractor needs at least one member".to_string(),
                    ));
                }
                if !(*fallback_foreground_ratio > 0.0 && *fallback_foreground_ratio <= 1.0) {
                    return Err(Error::InvalidConfig(
                        "fallback_foreground_ratio must lie in (0, 1]".to_string(),
                    ));
                }
                members.iter().try_for_each(|m| m.validate())
            }
        }
    }
}
