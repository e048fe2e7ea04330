//! Per-frame perception pipeline.
//!
//! One call to [`FramePipeline::process_frame`] takes a full rotation of polar
//! returns through extraction, transform, clustering and tracking. Frames
//! must arrive in strictly increasing timestamp order.
//!
//! A frame that fails (out of order, missing or expired pose) is rejected
//! before any persistent state is touched, so the background grid and track
//! table are exactly as they were after the previous good frame.

use std::time::Instant;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::background::BackgroundSnapshot;
use crate::clustering::{Cluster, ClusterSet, DbscanClusterer};
use crate::config::{ExtractionStrategy, PipelineConfig, SensorParams};
use crate::extraction::{
    ComparisonHarness, ExtractorEnum, ExtractorMetrics, ForegroundExtractor, FrameComparison,
};
use crate::point::{PolarPoint, WorldPoint};
use crate::tracker::{TrackSet, Tracker};
use crate::transform::{transform_into, Pose};
use crate::{Error, Result};

/// Counters and stage timings for one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    pub frame_id: u64,
    pub timestamp_ns: i64,
    pub input_points: usize,
    pub dropped_points: usize,
    pub foreground_points: usize,
    pub clusters: usize,
    pub skipped_clusters: usize,
    pub live_tracks: usize,
    pub confirmed_tracks: usize,
    pub extract_ms: f64,
    pub transform_ms: f64,
    pub cluster_ms: f64,
    pub track_ms: f64,
    pub total_ms: f64,
    pub over_budget: bool,
}

/// Everything the pipeline publishes for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameOutput {
    pub clusters: ClusterSet,
    pub tracks: TrackSet,
    pub stats: FrameStats,
    /// Extractor comparison, when the harness is enabled.
    pub comparison: Option<FrameComparison>,
}

/// Per-frame scratch kept between frames.
#[derive(Debug, Default)]
struct FrameBuffers {
    mask: Vec<bool>,
    foreground: Vec<PolarPoint>,
    world: Vec<WorldPoint>,
    clusters: Vec<Cluster>,
}

#[derive(Debug)]
enum ExtractionStage {
    Single(ExtractorEnum),
    Compare(ComparisonHarness),
}

impl ExtractionStage {
    fn primary(&self) -> &ExtractorEnum {
        match self {
            ExtractionStage::Single(e) => e,
            ExtractionStage::Compare(h) => &h.extractors()[0],
        }
    }

    fn primary_mut(&mut self) -> &mut ExtractorEnum {
        match self {
            ExtractionStage::Single(e) => e,
            ExtractionStage::Compare(h) => &mut h.extractors_mut()[0],
        }
    }
}

/// End-to-end perception pipeline for one sensor.
#[derive(Debug)]
pub struct FramePipeline {
    config: PipelineConfig,
    extraction: ExtractionStage,
    clusterer: DbscanClusterer,
    tracker: Tracker,
    buffers: FrameBuffers,
    next_frame_id: u64,
    last_timestamp_ns: Option<i64>,
}

impl FramePipeline {
    /// Build every stage from a validated configuration.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let primary = config.extraction.strategy;
        let extraction = if config.extraction.compare {
            let mut extractors = vec![ExtractorEnum::from_config(primary, &config)?];
            for strategy in [ExtractionStrategy::Background, ExtractionStrategy::VelocityCoherent] {
                if strategy != primary {
                    extractors.push(ExtractorEnum::from_config(strategy, &config)?);
                }
            }
            ExtractionStage::Compare(ComparisonHarness::new(
                extractors,
                config.extraction.history_len,
            )?)
        } else {
            ExtractionStage::Single(ExtractorEnum::from_config(primary, &config)?)
        };

        Ok(Self {
            clusterer: DbscanClusterer::new(config.clustering.clone())?,
            tracker: Tracker::new(config.tracking.clone())?,
            extraction,
            config,
            buffers: FrameBuffers::default(),
            next_frame_id: 0,
            last_timestamp_ns: None,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// The extractor whose mask drives clustering.
    pub fn extractor(&self) -> &ExtractorEnum {
        self.extraction.primary()
    }

    pub fn extractor_mut(&mut self) -> &mut ExtractorEnum {
        self.extraction.primary_mut()
    }

    /// Comparison harness, when enabled in the configuration.
    pub fn harness(&self) -> Option<&ComparisonHarness> {
        match &self.extraction {
            ExtractionStage::Compare(h) => Some(h),
            ExtractionStage::Single(_) => None,
        }
    }

    /// Number of frames processed successfully.
    pub fn frames_processed(&self) -> u64 {
        self.next_frame_id
    }

    pub fn last_timestamp_ns(&self) -> Option<i64> {
        self.last_timestamp_ns
    }

    /// Export the primary extractor's background grid, if it has one.
    pub fn background_snapshot(&self) -> Option<BackgroundSnapshot> {
        self.extraction.primary().background_model().map(|m| m.snapshot())
    }

    /// Load a background grid into the primary extractor.
    pub fn restore_background(&mut self, snapshot: &BackgroundSnapshot) -> Result<()> {
        match self.extraction.primary_mut().background_model_mut() {
            Some(model) => model.restore(snapshot),
            None => Err(Error::MissingGrid),
        }
    }

    /// Forget all learned state, tracks and frame sequencing.
    pub fn reset(&mut self) {
        match &mut self.extraction {
            ExtractionStage::Single(e) => e.reset(),
            ExtractionStage::Compare(h) => h.reset(),
        }
        self.tracker.reset();
        self.next_frame_id = 0;
        self.last_timestamp_ns = None;
    }

    /// Process one full rotation.
    ///
    /// # Arguments
    /// * `points` - Every return of the rotation
    /// * `timestamp_ns` - Frame capture time; must exceed the previous frame's
    /// * `pose` - Sensor-to-world pose covering every point timestamp
    pub fn process_frame(
        &mut self,
        points: &[PolarPoint],
        timestamp_ns: i64,
        pose: Option<&Pose>,
    ) -> Result<FrameOutput> {
        let frame_start = Instant::now();

        if let Some(previous_ns) = self.last_timestamp_ns {
            if timestamp_ns <= previous_ns {
                return Err(Error::OutOfOrderFrame {
                    previous_ns,
                    timestamp_ns,
                });
            }
        }
        let pose = pose.ok_or(Error::PoseUnavailable { timestamp_ns })?;
        check_pose_covers(pose, points, &self.config.sensor, timestamp_ns)?;

        let frame_id = self.next_frame_id;
        let mut stats = FrameStats {
            frame_id,
            timestamp_ns,
            input_points: points.len(),
            ..FrameStats::default()
        };

        // Extract
        let stage_start = Instant::now();
        let (metrics, comparison) = self.extract(frame_id, points, timestamp_ns);
        stats.extract_ms = elapsed_ms(stage_start);
        stats.dropped_points = metrics.dropped;
        if metrics.dropped > 0 {
            warn!(
                "frame {}: dropped {} malformed points of {}",
                frame_id,
                metrics.dropped,
                points.len()
            );
        }

        // Transform
        let stage_start = Instant::now();
        let buffers = &mut self.buffers;
        buffers.foreground.clear();
        buffers.foreground.extend(
            points
                .iter()
                .zip(buffers.mask.iter())
                .filter(|&(_, &fg)| fg)
                .map(|(p, _)| *p),
        );
        stats.foreground_points = buffers.foreground.len();
        transform_into(
            &buffers.foreground,
            pose,
            self.config.sensor.sensor_id,
            &mut buffers.world,
        )?;
        stats.transform_ms = elapsed_ms(stage_start);

        // Cluster
        let stage_start = Instant::now();
        self.clusterer.cluster_into(&buffers.world, &mut buffers.clusters);
        let cluster_set = ClusterSet {
            frame_id,
            timestamp_ns,
            clusters: buffers.clusters.clone(),
        };
        stats.clusters = cluster_set.clusters.len();
        stats.cluster_ms = elapsed_ms(stage_start);

        // Track
        let stage_start = Instant::now();
        let tracks = self.tracker.update(&cluster_set);
        let tracker_stats = self.tracker.last_stats();
        stats.skipped_clusters = tracker_stats.skipped_clusters;
        stats.live_tracks = self.tracker.live_count();
        stats.confirmed_tracks = tracks.confirmed().count();
        stats.track_ms = elapsed_ms(stage_start);

        stats.total_ms = elapsed_ms(frame_start);
        let budget_ms = self.config.frame_budget_ms();
        if stats.total_ms > budget_ms {
            stats.over_budget = true;
            warn!(
                "frame {} took {:.1} ms (budget {:.1} ms): extract {:.1}, transform {:.1}, cluster {:.1}, track {:.1}",
                frame_id,
                stats.total_ms,
                budget_ms,
                stats.extract_ms,
                stats.transform_ms,
                stats.cluster_ms,
                stats.track_ms
            );
        }
        debug!(
            "frame {}: {} points, {} foreground, {} clusters, {} live tracks ({} confirmed) in {:.1} ms",
            frame_id,
            stats.input_points,
            stats.foreground_points,
            stats.clusters,
            stats.live_tracks,
            stats.confirmed_tracks,
            stats.total_ms
        );

        self.next_frame_id += 1;
        self.last_timestamp_ns = Some(timestamp_ns);

        Ok(FrameOutput {
            clusters: cluster_set,
            tracks,
            stats,
            comparison,
        })
    }

    /// Run the extraction stage, leaving the primary mask in the buffers.
    fn extract(
        &mut self,
        frame_id: u64,
        points: &[PolarPoint],
        timestamp_ns: i64,
    ) -> (ExtractorMetrics, Option<FrameComparison>) {
        match &mut self.extraction {
            ExtractionStage::Single(extractor) => {
                let metrics = extractor.process_frame(points, timestamp_ns, &mut self.buffers.mask);
                (metrics, None)
            }
            ExtractionStage::Compare(harness) => {
                let comparison = harness.run_frame(frame_id, points, timestamp_ns).clone();
                self.buffers.mask.clear();
                self.buffers.mask.extend_from_slice(harness.primary_mask());
                (harness.primary_metrics(), Some(comparison))
            }
        }
    }
}

/// Fail unless `pose` is valid for the frame time and the time of every point
/// that will be kept. Malformed points are dropped later, so their
/// timestamps do not count.
fn check_pose_covers(
    pose: &Pose,
    points: &[PolarPoint],
    sensor: &SensorParams,
    timestamp_ns: i64,
) -> Result<()> {
    pose.check_valid_at(timestamp_ns)?;
    let kept = || points.iter().filter(|p| p.is_valid(sensor)).map(|p| p.timestamp_ns);
    let earliest = kept().min();
    let latest = kept().max();
    if let (Some(earliest), Some(latest)) = (earliest, latest) {
        pose.check_valid_at(earliest)?;
        pose.check_valid_at(latest)?;
    }
    Ok(())
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1e3
}
