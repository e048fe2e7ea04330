//! Pipeline configuration.
//!
//! Every section derives serde with `#[serde(default)]`, so a JSON file only
//! needs to carry the values it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sensor geometry and valid measurement envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorParams {
    /// Identifier stamped onto every world point.
    pub sensor_id: u16,
    /// Number of laser rings (grid rows).
    pub rings: usize,
    /// Number of azimuth bins per ring (grid columns).
    pub azimuth_bins: usize,
    /// Returns closer than this are malformed.
    pub min_range_m: f64,
    /// Returns farther than this are malformed.
    pub max_range_m: f64,
}

impl Default for SensorParams {
    fn default() -> Self {
        Self {
            sensor_id: 0,
            rings: 40,
            azimuth_bins: 1800,
            min_range_m: 0.05,
            max_range_m: 250.0,
        }
    }
}

impl SensorParams {
    pub fn validate(&self) -> Result<()> {
        if self.rings == 0 || self.azimuth_bins == 0 {
            return Err(Error::MissingGrid);
        }
        if !(self.min_range_m >= 0.0 && self.max_range_m > self.min_range_m) {
            return Err(Error::InvalidConfig(format!(
                "range envelope [{}, {}] is empty",
                self.min_range_m, self.max_range_m
            )));
        }
        Ok(())
    }
}

/// Statistical background model parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundParams {
    /// Exponential smoothing factor for the running average, in (0, 1).
    pub smoothing_fraction: f64,
    /// Multiplier applied to the cell spread when building the closeness threshold.
    pub sensitivity_multiplier: f64,
    /// Constant added to the closeness threshold (m).
    pub safety_margin_m: f64,
    /// Same-ring neighbours that must agree before a divergent return is
    /// accepted as background. Zero disables neighbour confirmation.
    pub neighbor_confirmation_count: usize,
    /// Half-width of the same-ring neighbourhood, in azimuth bins.
    pub neighbor_window_bins: usize,
    /// Range-proportional noise term of the closeness threshold.
    pub noise_fraction: f64,
    /// How long a cell stays frozen once a freeze is triggered.
    pub freeze_duration_secs: f64,
    /// A foreground return starts a freeze only when its divergence exceeds
    /// this multiple of the closeness threshold.
    pub freeze_divergence_ratio: f64,
    /// A freeze can only start while the cell confidence is below this.
    pub freeze_max_confidence: u32,
    /// Confidence at which the locked baseline is established and used.
    pub locked_baseline_threshold: u32,
    /// Multiplier on the smoothing factor while a cell re-acquires after
    /// emitting foreground.
    pub reacquisition_boost: f64,
    /// Foreground returns never push confidence below this.
    pub min_confidence_floor: u32,
}

impl Default for BackgroundParams {
    fn default() -> Self {
        Self {
            smoothing_fraction: 0.02,
            sensitivity_multiplier: 3.0,
            safety_margin_m: 0.5,
            neighbor_confirmation_count: 3,
            neighbor_window_bins: 2,
            noise_fraction: 0.001,
            freeze_duration_secs: 5.0,
            freeze_divergence_ratio: 4.0,
            freeze_max_confidence: 8,
            locked_baseline_threshold: 50,
            reacquisition_boost: 4.0,
            min_confidence_floor: 0,
        }
    }
}

impl BackgroundParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.smoothing_fraction > 0.0 && self.smoothing_fraction < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "smoothing_fraction must lie in (0, 1), got {}",
                self.smoothing_fraction
            )));
        }
        if !(self.sensitivity_multiplier > 0.0) {
            return Err(Error::InvalidConfig(
                "sensitivity_multiplier must be positive".to_string(),
            ));
        }
        if !(self.safety_margin_m >= 0.0 && self.noise_fraction >= 0.0) {
            return Err(Error::InvalidConfig(
                "safety_margin_m and noise_fraction must be non-negative".to_string(),
            ));
        }
        if !(self.freeze_duration_secs >= 0.0 && self.freeze_divergence_ratio >= 1.0) {
            return Err(Error::InvalidConfig(
                "freeze_duration_secs must be >= 0 and freeze_divergence_ratio >= 1".to_string(),
            ));
        }
        if !(self.reacquisition_boost >= 1.0) {
            return Err(Error::InvalidConfig(
                "reacquisition_boost must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Freeze duration in nanoseconds.
    pub fn freeze_duration_ns(&self) -> i64 {
        (self.freeze_duration_secs * 1e9) as i64
    }
}

/// Velocity-coherent extractor parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityParams {
    /// Range rates slower than this are treated as static.
    pub min_speed_mps: f64,
    /// Range rates faster than this are treated as noise.
    pub max_speed_mps: f64,
    /// Half-width of the same-ring neighbourhood, in azimuth bins.
    pub neighbor_window_bins: usize,
    /// Neighbours with a coherent range rate needed to accept a return.
    pub min_coherent_neighbors: usize,
    /// Maximum range-rate difference for two cells to be coherent.
    pub coherence_tolerance_mps: f64,
}

impl Default for VelocityParams {
    fn default() -> Self {
        Self {
            min_speed_mps: 0.5,
            max_speed_mps: 60.0,
            neighbor_window_bins: 3,
            min_coherent_neighbors: 2,
            coherence_tolerance_mps: 1.5,
        }
    }
}

impl VelocityParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_speed_mps >= 0.0 && self.max_speed_mps > self.min_speed_mps) {
            return Err(Error::InvalidConfig(format!(
                "speed window [{}, {}] is empty",
                self.min_speed_mps, self.max_speed_mps
            )));
        }
        if !(self.coherence_tolerance_mps > 0.0) {
            return Err(Error::InvalidConfig(
                "coherence_tolerance_mps must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which extractor drives the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    Background,
    VelocityCoherent,
    Hybrid,
}

/// How a hybrid extractor merges its members' masks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Foreground if any member says foreground.
    Union,
    /// Foreground only if every member says foreground.
    Intersection,
    /// Use the first member unless it is saturated, then the next one.
    PrimaryWithFallback,
}

/// Extraction stage configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub strategy: ExtractionStrategy,
    pub merge_policy: MergePolicy,
    /// Primary foreground ratio above which `PrimaryWithFallback` switches member.
    pub fallback_foreground_ratio: f64,
    /// Run every extractor each frame and record comparisons.
    pub compare: bool,
    /// Number of recent frame comparisons kept by the harness.
    pub history_len: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            strategy: ExtractionStrategy::Background,
            merge_policy: MergePolicy::PrimaryWithFallback,
            fallback_foreground_ratio: 0.5,
            compare: false,
            history_len: 64,
        }
    }
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.fallback_foreground_ratio > 0.0 && self.fallback_foreground_ratio <= 1.0) {
            return Err(Error::InvalidConfig(
                "fallback_foreground_ratio must lie in (0, 1]".to_string(),
            ));
        }
        if self.compare && self.history_len == 0 {
            return Err(Error::InvalidConfig(
                "history_len must be positive when comparison is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Density clustering parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringParams {
    /// Neighbourhood radius (m); also the spatial index cell size.
    pub eps: f64,
    /// Neighbours (including the point itself) needed for a core point.
    pub min_pts: usize,
    /// Cluster in full 3D instead of on the ground plane.
    pub volumetric: bool,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            eps: 0.6,
            min_pts: 12,
            volumetric: false,
        }
    }
}

impl ClusteringParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.eps > 0.0 && self.eps.is_finite()) {
            return Err(Error::InvalidConfig(format!("eps must be positive, got {}", self.eps)));
        }
        if self.min_pts == 0 {
            return Err(Error::InvalidConfig("min_pts must be positive".to_string()));
        }
        Ok(())
    }
}

/// Multi-object tracker parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingParams {
    /// Live (non-deleted) tracks above which no new track is spawned.
    pub max_tracks: usize,
    /// Consecutive misses that delete a track.
    pub max_misses: u32,
    /// Consecutive hits that confirm a tentative track.
    pub hits_to_confirm: u32,
    /// Squared Mahalanobis gate for cluster-to-track association.
    pub gating_distance_sq: f64,
    /// Process noise spectral density per state `[x, y, vx, vy]`.
    pub process_noise: [f64; 4],
    /// Measurement noise variance per axis `[x, y]`.
    pub measurement_noise: [f64; 2],
    /// Velocity variance of a freshly spawned track.
    pub initial_velocity_variance: f64,
    /// How long a deleted track is still reported before being dropped.
    pub deleted_grace_secs: f64,
    /// Prediction steps longer than this are clamped.
    pub max_predict_dt_secs: f64,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            max_tracks: 100,
            max_misses: 3,
            hits_to_confirm: 3,
            gating_distance_sq: 9.21,
            process_noise: [0.1, 0.1, 1.0, 1.0],
            measurement_noise: [0.09, 0.09],
            initial_velocity_variance: 25.0,
            deleted_grace_secs: 0.5,
            max_predict_dt_secs: 1.0,
        }
    }
}

impl TrackingParams {
    pub fn validate(&self) -> Result<()> {
        if self.hits_to_confirm == 0 || self.max_misses == 0 {
            return Err(Error::InvalidConfig(
                "hits_to_confirm and max_misses must be positive".to_string(),
            ));
        }
        if !(self.gating_distance_sq > 0.0) {
            return Err(Error::InvalidConfig(
                "gating_distance_sq must be positive".to_string(),
            ));
        }
        if self.process_noise.iter().any(|&q| !(q >= 0.0)) {
            return Err(Error::InvalidConfig(
                "process_noise must be non-negative".to_string(),
            ));
        }
        if self.measurement_noise.iter().any(|&r| !(r > 0.0)) {
            return Err(Error::InvalidConfig(
                "measurement_noise must be positive".to_string(),
            ));
        }
        if !(self.initial_velocity_variance > 0.0 && self.max_predict_dt_secs > 0.0) {
            return Err(Error::InvalidConfig(
                "initial_velocity_variance and max_predict_dt_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration of the frame pipeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sensor: SensorParams,
    pub background: BackgroundParams,
    pub velocity: VelocityParams,
    pub extraction: ExtractionConfig,
    pub clustering: ClusteringParams,
    pub tracking: TrackingParams,
    /// Per-frame latency budget; overruns are logged, not fatal.
    pub frame_budget_ms: Option<f64>,
}

impl PipelineConfig {
    /// Parse a configuration from a JSON string and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Serialize the configuration to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.sensor.validate()?;
        self.background.validate()?;
        self.velocity.validate()?;
        self.extraction.validate()?;
        self.clustering.validate()?;
        self.tracking.validate()?;
        if let Some(budget) = self.frame_budget_ms {
            if !(budget > 0.0) {
                return Err(Error::InvalidConfig(
                    "frame_budget_ms must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Latency budget, defaulting to 60 ms.
    pub fn frame_budget_ms(&self) -> f64 {
        self.frame_budget_ms.unwrap_or(60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_smoothing_fraction_bounds() {
        let mut config = PipelineConfig::default();
        config.background.smoothing_fraction = 1.0;
        assert!(config.validate().is_err());

        config.background.smoothing_fraction = 0.0;
        assert!(config.validate().is_err());

        config.background.smoothing_fraction = 0.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_grid_is_missing_grid() {
        let mut config = PipelineConfig::default();
        config.sensor.azimuth_bins = 0;
        assert!(matches!(config.validate(), Err(Error::MissingGrid)));
    }

    #[test]
    fn test_invalid_clustering() {
        let mut config = PipelineConfig::default();
        config.clustering.eps = 0.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.clustering.min_pts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_tracking() {
        let mut config = PipelineConfig::default();
        config.tracking.hits_to_confirm = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.tracking.measurement_noise = [0.1, 0.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "clustering": { "eps": 0.8 },
            "tracking": { "hits_to_confirm": 5 },
            "extraction": { "strategy": "hybrid", "merge_policy": "union" }
        }"#;
        let config = PipelineConfig::from_json_str(json).unwrap();

        assert_eq!(config.clustering.eps, 0.8);
        assert_eq!(config.clustering.min_pts, 12);
        assert_eq!(config.tracking.hits_to_confirm, 5);
        assert_eq!(config.tracking.max_misses, 3);
        assert_eq!(config.extraction.strategy, ExtractionStrategy::Hybrid);
        assert_eq!(config.extraction.merge_policy, MergePolicy::Union);
        assert_eq!(config.sensor.rings, 40);
    }

    #[test]
    fn test_json_rejects_invalid_values() {
        let json = r#"{ "background": { "smoothing_fraction": 2.0 } }"#;
        assert!(matches!(
            PipelineConfig::from_json_str(json),
            Err(Error::InvalidConfig(_))
        ));

        assert!(matches!(
            PipelineConfig::from_json_str("{ not json"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_json_round_trip_preserves_config() {
        let mut config = PipelineConfig::default();
        config.tracking.process_noise = [0.2, 0.2, 2.0, 2.0];
        config.frame_budget_ms = Some(45.0);

        let json = config.to_json_string().unwrap();
        let parsed = PipelineConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
