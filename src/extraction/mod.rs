//! Foreground extraction strategies and the comparison harness.
//!
//! This module provides:
//! - `ForegroundExtractor` - common interface of every strategy
//! - `BackgroundSubtractor` - statistical background model
//! - `VelocityCoherentExtractor` - range-rate coherence between frames
//! - `HybridExtractor` - merges several strategies by a `MergePolicy`
//! - `ExtractorEnum` - static dispatch over the above
//! - `ComparisonHarness` - runs several strategies side by side

mod background;
mod dispatch;
mod harness;
mod hybrid;
mod traits;
mod velocity;

pub use crate::config::MergePolicy;
pub use background::BackgroundSubtractor;
pub use dispatch::ExtractorEnum;
pub use harness::{AlgorithmMetrics, ComparisonHarness, FrameComparison, PairAgreement};
pub use hybrid::HybridExtractor;
pub use traits::{ExtractorMetrics, ExtractorParams, ForegroundExtractor};
pub use velocity::VelocityCoherentExtractor;
