//! # sweeptrack - Perception core for spinning LiDAR sensors
//!
//! Turns each full rotation ("frame") of a fixed, spinning range sensor into
//! a set of clusters and persistent, tracked objects.
//!
//! ## Pipeline
//!
//! - Statistical background model over a fixed polar grid, with freeze/thaw
//!   protection against lingering occlusions
//! - Sensor-centric polar to site-centric Cartesian transform via a [`Pose`]
//! - Grid-indexed density clustering on the ground plane
//! - Constant-velocity Kalman tracking with Mahalanobis gating and
//!   deterministic, content-derived track ids
//! - Pluggable foreground extractors with a side-by-side comparison harness
//!
//! ## Example
//!
//! ```rust,ignore
//! use sweeptrack_rs::{FramePipeline, PipelineConfig, Pose, PolarPoint};
//!
//! let mut pipeline = FramePipeline::new(PipelineConfig::default())?;
//! let pose = Pose::identity();
//!
//! let points: Vec<PolarPoint> = decode_rotation();
//! let output = pipeline.process_frame(&points, timestamp_ns, Some(&pose))?;
//! for track in &output.tracks.tracks {
//!     println!("{} {:?} at {:?}", track.id, track.state, track.position);
//! }
//! ```

pub mod background;
pub mod clustering;
pub mod config;
pub mod extraction;
pub mod filter;
pub mod matching;
pub mod pipeline;
pub mod point;
pub mod spatial;
pub mod track;
pub mod tracker;
pub mod transform;
pub mod utils;

// Re-exports for convenience
pub use background::{
    BackgroundCell, BackgroundGrid, BackgroundModel, BackgroundSnapshot, ClassifyStats,
};
pub use clustering::{Cluster, ClusterSet, DbscanClusterer};
pub use config::{
    BackgroundParams, ClusteringParams, ExtractionConfig, ExtractionStrategy, PipelineConfig,
    SensorParams, TrackingParams, VelocityParams,
};
pub use extraction::{
    BackgroundSubtractor, ComparisonHarness, ExtractorEnum, ExtractorMetrics, ExtractorParams,
    ForegroundExtractor, FrameComparison, HybridExtractor, MergePolicy, VelocityCoherentExtractor,
};
pub use pipeline::{FrameOutput, FramePipeline, FrameStats};
pub use point::{PolarPoint, WorldPoint};
pub use spatial::SpatialIndex;
pub use track::{Track, TrackId, TrackState, TrackSummary};
pub use tracker::{TrackSet, Tracker, TrackerStats};
pub use transform::{inverse_transform, transform, Pose};

// Error types
pub use crate::error::{Error, Result};

mod error {
    use thiserror::Error;

    /// Errors that can occur in the perception core
    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Background grid is not configured")]
        MissingGrid,

        #[error("No pose available for frame at {timestamp_ns} ns")]
        PoseUnavailable { timestamp_ns: i64 },

        #[error("Pose valid for [{valid_from_ns}, {valid_until_ns:?}] does not cover {timestamp_ns} ns")]
        PoseOutOfWindow {
            timestamp_ns: i64,
            valid_from_ns: i64,
            valid_until_ns: Option<i64>,
        },

        #[error("Pose transform is not invertible")]
        SingularPose,

        #[error("Frame at {timestamp_ns} ns arrived after frame at {previous_ns} ns")]
        OutOfOrderFrame { previous_ns: i64, timestamp_ns: i64 },

        #[error("Snapshot geometry mismatch: expected {expected}, got {got}")]
        SnapshotMismatch { expected: String, got: String },

        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("JSON error: {0}")]
        Json(#[from] serde_json::Error),
    }

    /// Result type for perception operations
    pub type Result<T> = std::result::Result<T, Error>;
}
