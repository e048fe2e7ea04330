//! Track identity, lifecycle state and per-track aggregates.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clustering::Cluster;
use crate::config::TrackingParams;
use crate::filter::ConstantVelocityKalman;

/// Below this ground speed the heading comes from cluster shape, not motion.
const MIN_HEADING_SPEED_MPS: f64 = 0.5;

/// Content-derived track identifier.
///
/// Derived from the seeding cluster's centroid and timestamp, so replaying
/// the same input yields the same ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl TrackId {
    /// Hash a seed centroid (quantised to millimetres), timestamp and salt.
    ///
    /// The salt is only non-zero when an earlier live track already holds the
    /// unsalted id.
    pub fn derive(centroid: [f64; 3], timestamp_ns: i64, salt: u32) -> Self {
        let mut hasher = Sha256::new();
        for c in centroid {
            hasher.update(((c * 1000.0).round() as i64).to_le_bytes());
        }
        hasher.update(timestamp_ns.to_le_bytes());
        hasher.update(salt.to_le_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Lifecycle state. Only ever moves forward:
/// Tentative -> Confirmed -> Deleted, or Tentative -> Deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    Tentative,
    Confirmed,
    Deleted,
}

impl TrackState {
    pub fn can_transition_to(self, next: TrackState) -> bool {
        matches!(
            (self, next),
            (TrackState::Tentative, TrackState::Confirmed)
                | (TrackState::Tentative, TrackState::Deleted)
                | (TrackState::Confirmed, TrackState::Deleted)
        )
    }
}

/// Running shape and appearance statistics over associated clusters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapeAggregate {
    pub observations: u32,
    pub mean_length: f64,
    pub mean_width: f64,
    pub mean_height: f64,
    pub max_height_p95: f64,
    pub mean_intensity: f64,
    pub mean_point_count: f64,
}

impl ShapeAggregate {
    fn absorb(&mut self, cluster: &Cluster) {
        self.observations += 1;
        let w = 1.0 / self.observations as f64;
        self.mean_length += (cluster.length() - self.mean_length) * w;
        self.mean_width += (cluster.width() - self.mean_width) * w;
        self.mean_height += (cluster.height() - self.mean_height) * w;
        self.mean_intensity += (cluster.mean_intensity - self.mean_intensity) * w;
        self.mean_point_count += (cluster.point_count as f64 - self.mean_point_count) * w;
        if self.observations == 1 || cluster.height_p95 > self.max_height_p95 {
            self.max_height_p95 = cluster.height_p95;
        }
    }
}

/// A persistent object identity maintained across frames.
#[derive(Clone, Debug)]
pub struct Track {
    pub id: TrackId,
    pub state: TrackState,
    /// Consecutive frames with an associated cluster.
    pub hits: u32,
    /// Consecutive frames without an associated cluster.
    pub misses: u32,
    /// Frames with an associated cluster over the whole life of the track.
    pub total_hits: u32,
    pub first_seen_ns: i64,
    pub last_update_ns: i64,
    pub deleted_at_ns: Option<i64>,
    pub shape: ShapeAggregate,
    /// Shape heading of the most recent cluster that had one.
    pub cluster_heading_rad: Option<f64>,
    pub(crate) filter: ConstantVelocityKalman,
    pub(crate) last_predict_ns: i64,
}

impl Track {
    /// Seed a new track from an unassociated cluster.
    ///
    /// The seeding cluster counts as the first hit, so `hits_to_confirm == 1`
    /// confirms immediately.
    pub(crate) fn spawn(
        id: TrackId,
        cluster: &Cluster,
        timestamp_ns: i64,
        params: &TrackingParams,
    ) -> Self {
        let mut shape = ShapeAggregate::default();
        shape.absorb(cluster);
        let state = if params.hits_to_confirm <= 1 {
            TrackState::Confirmed
        } else {
            TrackState::Tentative
        };
        Self {
            id,
            state,
            hits: 1,
            misses: 0,
            total_hits: 1,
            first_seen_ns: timestamp_ns,
            last_update_ns: timestamp_ns,
            deleted_at_ns: None,
            shape,
            cluster_heading_rad: cluster.heading_rad,
            filter: ConstantVelocityKalman::new(
                [cluster.centroid[0], cluster.centroid[1]],
                params,
            ),
            last_predict_ns: timestamp_ns,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.state == TrackState::Deleted
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    pub fn position(&self) -> [f64; 2] {
        self.filter.position()
    }

    pub fn velocity(&self) -> [f64; 2] {
        self.filter.velocity()
    }

    pub fn speed(&self) -> f64 {
        self.filter.speed()
    }

    pub fn covariance(&self) -> [[f64; 4]; 4] {
        self.filter.covariance()
    }

    /// Direction of travel when moving, otherwise the last cluster heading.
    pub fn heading_rad(&self) -> Option<f64> {
        if self.speed() >= MIN_HEADING_SPEED_MPS {
            let [vx, vy] = self.velocity();
            Some(vy.atan2(vx))
        } else {
            self.cluster_heading_rad
        }
    }

    /// Squared Mahalanobis distance to a cluster centroid.
    pub fn gating_distance_sq(&self, cluster: &Cluster) -> f64 {
        self.filter
            .mahalanobis_sq([cluster.centroid[0], cluster.centroid[1]])
    }

    /// Advance the motion model to `timestamp_ns`, with `dt` capped at
    /// `max_dt_secs`. Earlier or equal timestamps are a no-op.
    pub(crate) fn predict_to(&mut self, timestamp_ns: i64, max_dt_secs: f64) {
        if timestamp_ns <= self.last_predict_ns {
            return;
        }
        let dt = ((timestamp_ns - self.last_predict_ns) as f64 * 1e-9).min(max_dt_secs);
        self.filter.predict(dt);
        self.last_predict_ns = timestamp_ns;
    }

    /// Apply an associated cluster. Returns `(corrected, newly_confirmed)`.
    pub(crate) fn record_hit(
        &mut self,
        cluster: &Cluster,
        timestamp_ns: i64,
        hits_to_confirm: u32,
    ) -> (bool, bool) {
        let corrected = self
            .filter
            .update([cluster.centroid[0], cluster.centroid[1]]);
        self.hits += 1;
        self.total_hits += 1;
        self.misses = 0;
        self.last_update_ns = timestamp_ns;
        self.shape.absorb(cluster);
        if cluster.heading_rad.is_some() {
            self.cluster_heading_rad = cluster.heading_rad;
        }

        let confirmed = self.state == TrackState::Tentative && self.hits >= hits_to_confirm;
        if confirmed {
            self.state = TrackState::Confirmed;
        }
        (corrected, confirmed)
    }

    /// Age a track that found no cluster. Returns `true` if it was deleted.
    pub(crate) fn record_miss(&mut self, timestamp_ns: i64, max_misses: u32) -> bool {
        self.misses += 1;
        self.hits = 0;
        if self.misses >= max_misses {
            self.state = TrackState::Deleted;
            self.deleted_at_ns = Some(timestamp_ns);
            return true;
        }
        false
    }

    /// Serializable view for publishing.
    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            id: self.id,
            state: self.state,
            hits: self.hits,
            misses: self.misses,
            total_hits: self.total_hits,
            position: self.position(),
            velocity: self.velocity(),
            covariance: self.covariance(),
            speed: self.speed(),
            heading_rad: self.heading_rad(),
            first_seen_ns: self.first_seen_ns,
            last_update_ns: self.last_update_ns,
            shape: self.shape.clone(),
        }
    }
}

/// Published view of one track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub id: TrackId,
    pub state: TrackState,
    pub hits: u32,
    pub misses: u32,
    pub total_hits: u32,
    pub position: [f64; 2],
    pub velocity: [f64; 2],
    pub covariance: [[f64; 4]; 4],
    pub speed: f64,
    pub heading_rad: Option<f64>,
    pub first_seen_ns: i64,
    pub last_update_ns: i64,
    pub shape: ShapeAggregate,
}
