//! Multi-object tracker.
//!
//! Each call to [`Tracker::update`] runs one frame of:
//! predict -> gate + associate -> correct -> age -> spawn -> garbage-collect.

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::clustering::{Cluster, ClusterSet};
use crate::config::TrackingParams;
use crate::matching::Associator;
use crate::track::{Track, TrackId, TrackState, TrackSummary};
use crate::Result;

/// Tracks published for one frame, in track-table order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackSet {
    pub frame_id: u64,
    pub timestamp_ns: i64,
    pub tracks: Vec<TrackSummary>,
}

impl TrackSet {
    /// Tracks that are neither tentative nor deleted.
    pub fn confirmed(&self) -> impl Iterator<Item = &TrackSummary> {
        self.tracks.iter().filter(|t| t.state == TrackState::Confirmed)
    }
}

/// Per-frame tracker counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub matched: usize,
    pub spawned: usize,
    pub confirmed: usize,
    pub deleted: usize,
    pub removed: usize,
    /// Clusters dropped because their centroid was not finite.
    pub skipped_clusters: usize,
    /// Unmatched clusters not spawned because the track table was full.
    pub spawn_rejected: usize,
}

/// Maintains persistent object identities across frames.
#[derive(Debug)]
pub struct Tracker {
    params: TrackingParams,
    tracks: Vec<Track>,
    last_stats: TrackerStats,
    associator: Associator,
    /// Indices of finite-centroid clusters in the current frame.
    valid: Vec<usize>,
    /// Indices of non-deleted tracks in the current frame.
    live: Vec<usize>,
}

impl Tracker {
    /// Create a new tracker with the given parameters.
    pub fn new(params: TrackingParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            associator: Associator::new(params.gating_distance_sq),
            params,
            tracks: Vec::new(),
            last_stats: TrackerStats::default(),
            valid: Vec::new(),
            live: Vec::new(),
        })
    }

    pub fn params(&self) -> &TrackingParams {
        &self.params
    }

    /// Full track table, including recently deleted tracks.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Number of tracks that are not deleted.
    pub fn live_count(&self) -> usize {
        self.tracks.iter().filter(|t| !t.is_deleted()).count()
    }

    pub fn last_stats(&self) -> TrackerStats {
        self.last_stats
    }

    /// Drop every track.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.last_stats = TrackerStats::default();
    }

    /// Run one frame of tracking against an ordered cluster set.
    pub fn update(&mut self, clusters: &ClusterSet) -> TrackSet {
        self.step(&clusters.clusters, clusters.timestamp_ns);
        TrackSet {
            frame_id: clusters.frame_id,
            timestamp_ns: clusters.timestamp_ns,
            tracks: self.tracks.iter().map(Track::summary).collect(),
        }
    }

    fn step(&mut self, clusters: &[Cluster], timestamp_ns: i64) {
        let mut stats = TrackerStats::default();

        // Predict
        let max_dt = self.params.max_predict_dt_secs;
        self.tracks
            .par_iter_mut()
            .filter(|t| !t.is_deleted())
            .for_each(|t| t.predict_to(timestamp_ns, max_dt));

        // Only finite centroids may reach the filters
        self.valid.clear();
        self.valid.extend(
            clusters
                .iter()
                .enumerate()
                .filter(|(_, c)| c.has_finite_centroid())
                .map(|(i, _)| i),
        );
        stats.skipped_clusters = clusters.len() - self.valid.len();
        if stats.skipped_clusters > 0 {
            warn!(
                "Skipped {} clusters with non-finite centroids",
                stats.skipped_clusters
            );
        }

        // Gate + associate
        self.live.clear();
        self.live
            .extend((0..self.tracks.len()).filter(|&i| !self.tracks[i].is_deleted()));
        self.associator.begin(self.valid.len(), self.live.len());
        for (ci, &c) in self.valid.iter().enumerate() {
            for (tj, &t) in self.live.iter().enumerate() {
                let distance_sq = self.tracks[t].gating_distance_sq(&clusters[c]);
                self.associator.offer(ci, tj, distance_sq);
            }
        }
        let pairs = self.associator.resolve();
        stats.matched = pairs.len();

        // Correct matched tracks
        for &(ci, tj) in pairs {
            let track = &mut self.tracks[self.live[tj]];
            let (corrected, confirmed) = track.record_hit(
                &clusters[self.valid[ci]],
                timestamp_ns,
                self.params.hits_to_confirm,
            );
            if !corrected {
                warn!("Track {} skipped a singular Kalman correction", track.id);
            }
            if confirmed {
                stats.confirmed += 1;
                info!("Track {} confirmed after {} hits", track.id, track.hits);
            }
        }

        // Age unmatched tracks
        for tj in 0..self.live.len() {
            if self.associator.is_track_taken(tj) {
                continue;
            }
            let track = &mut self.tracks[self.live[tj]];
            if track.record_miss(timestamp_ns, self.params.max_misses) {
                stats.deleted += 1;
                info!("Track {} deleted after {} misses", track.id, track.misses);
            }
        }

        // Spawn
        let mut live_count = self.live_count();
        for ci in 0..self.valid.len() {
            if self.associator.is_cluster_taken(ci) {
                continue;
            }
            if live_count >= self.params.max_tracks {
                stats.spawn_rejected += 1;
                continue;
            }
            let cluster = &clusters[self.valid[ci]];
            let id = self.unique_id(cluster, timestamp_ns);
            let track = Track::spawn(id, cluster, timestamp_ns, &self.params);
            if track.is_confirmed() {
                stats.confirmed += 1;
                info!("Track {} confirmed on spawn", track.id);
            }
            self.tracks.push(track);
            live_count += 1;
            stats.spawned += 1;
        }
        if stats.spawn_rejected > 0 {
            warn!(
                "Track table full ({} live), {} clusters not spawned",
                live_count, stats.spawn_rejected
            );
        }

        // Garbage-collect
        let grace_ns = (self.params.deleted_grace_secs * 1e9) as i64;
        let before = self.tracks.len();
        self.tracks.retain(|t| match t.deleted_at_ns {
            Some(at) => timestamp_ns - at <= grace_ns,
            None => true,
        });
        stats.removed = before - self.tracks.len();

        debug!(
            "Tracker: {} clusters, {} matched, {} spawned, {} deleted, {} live",
            clusters.len(),
            stats.matched,
            stats.spawned,
            stats.deleted,
            live_count
        );
        self.last_stats = stats;
    }

    /// Content-derived id, salted until it does not collide with any
    /// track still in the table.
    fn unique_id(&self, cluster: &Cluster, timestamp_ns: i64) -> TrackId {
        let mut salt = 0u32;
        loop {
            let id = TrackId::derive(cluster.centroid, timestamp_ns, salt);
            if self.tracks.iter().all(|t| t.id != id) {
                return id;
            }
            salt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_NS: i64 = 100_000_000;

    fn cluster_at(x: f64, y: f64) -> Cluster {
        Cluster {
            centroid: [x, y, 0.8],
            bbox_min: [x - 0.5, y - 0.5, 0.0],
            bbox_max: [x + 0.5, y + 0.5, 1.6],
            point_count: 50,
            height_p95: 1.5,
            mean_intensity: 20.0,
            heading_rad: None,
        }
    }

    fn frame(frame_id: u64, clusters: Vec<Cluster>) -> ClusterSet {
        ClusterSet {
            frame_id,
            timestamp_ns: frame_id as i64 * FRAME_NS,
            clusters,
        }
    }

    // ===== Construction =====

    #[test]
    fn test_tracker_new() {
        let tracker = Tracker::new(TrackingParams::default()).unwrap();
        assert!(tracker.tracks().is_empty());
        assert_eq!(tracker.live_count(), 0);
    }

    #[test]
    fn test_tracker_invalid_params() {
        let params = TrackingParams {
            hits_to_confirm: 0,
            ..TrackingParams::default()
        };
        assert!(Tracker::new(params).is_err());
    }

    // ===== Lifecycle =====

    #[test]
    fn test_confirm_on_third_frame_then_delete_after_three_misses() {
        let mut tracker = Tracker::new(TrackingParams::default()).unwrap();

        let set = tracker.update(&frame(1, vec![cluster_at(5.0, 5.0)]));
        assert_eq!(set.tracks.len(), 1);
        assert_eq!(set.tracks[0].state, TrackState::Tentative);
        let id = set.tracks[0].id;

        let set = tracker.update(&frame(2, vec![cluster_at(5.0, 5.0)]));
        assert_eq!(set.tracks[0].state, TrackState::Tentative);

        let set = tracker.update(&frame(3, vec![cluster_at(5.0, 5.0)]));
        assert_eq!(set.tracks[0].id, id);
        assert_eq!(set.tracks[0].state, TrackState::Confirmed);
        assert_eq!(set.tracks[0].hits, 3);

        let set = tracker.update(&frame(4, vec![]));
        assert_eq!(set.tracks[0].state, TrackState::Confirmed);
        let set = tracker.update(&frame(5, vec![]));
        assert_eq!(set.tracks[0].state, TrackState::Confirmed);
        let set = tracker.update(&frame(6, vec![]));
        assert_eq!(set.tracks[0].state, TrackState::Deleted);
        assert_eq!(set.tracks[0].misses, 3);
        assert_eq!(tracker.live_count(), 0);
    }

    #[test]
    fn test_tentative_track_deleted_directly() {
        let mut tracker = Tracker::new(TrackingParams::default()).unwrap();
        tracker.update(&frame(1, vec![cluster_at(0.0, 0.0)]));
        tracker.update(&frame(2, vec![]));
        tracker.update(&frame(3, vec![]));
        let set = tracker.update(&frame(4, vec![]));
        assert_eq!(set.tracks[0].state, TrackState::Deleted);
        assert_eq!(tracker.last_stats().deleted, 1);
    }

    #[test]
    fn test_miss_resets_consecutive_hits() {
        let mut tracker = Tracker::new(TrackingParams::default()).unwrap();
        tracker.update(&frame(1, vec![cluster_at(0.0, 0.0)]));
        tracker.update(&frame(2, vec![cluster_at(0.0, 0.0)]));
        tracker.update(&frame(3, vec![]));
        let set = tracker.update(&frame(4, vec![cluster_at(0.0, 0.0)]));
        assert_eq!(set.tracks[0].state, TrackState::Tentative);
        assert_eq!(set.tracks[0].hits, 1);
    }

    #[test]
    fn test_deleted_tracks_garbage_collected_after_grace() {
        let mut tracker = Tracker::new(TrackingParams::default()).unwrap();
        tracker.update(&frame(1, vec![cluster_at(0.0, 0.0)]));
        for f in 2..=4 {
            tracker.update(&frame(f, vec![]));
        }
        assert_eq!(tracker.tracks().len(), 1);

        // 0.5 s grace at 10 Hz
        for f in 5..=9 {
            tracker.update(&frame(f, vec![]));
        }
        assert_eq!(tracker.tracks().len(), 1);
        tracker.update(&frame(10, vec![]));
        assert!(tracker.tracks().is_empty());
    }

    // ===== Association =====

    #[test]
    fn test_moving_object_keeps_identity() {
        let mut tracker = Tracker::new(TrackingParams::default()).unwrap();
        let mut ids = Vec::new();
        for f in 1..=20 {
            // 2 m/s along x
            let x = f as f64 * 0.2;
            let set = tracker.update(&frame(f, vec![cluster_at(x, 3.0)]));
            assert_eq!(tracker.live_count(), 1, "frame {}", f);
            ids.push(set.tracks[0].id);
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        let track = &tracker.tracks()[0];
        assert!((track.velocity()[0] - 2.0).abs() < 0.3);
    }

    #[test]
    fn test_far_cluster_gated_out() {
        let mut tracker = Tracker::new(TrackingParams::default()).unwrap();
        tracker.update(&frame(1, vec![cluster_at(0.0, 0.0)]));
        let set = tracker.update(&frame(2, vec![cluster_at(30.0, 0.0)]));
        assert_eq!(set.tracks.len(), 2);
        assert_eq!(set.tracks[0].misses, 1);
        assert_eq!(set.tracks[1].hits, 1);
    }

    #[test]
    fn test_two_objects_two_tracks() {
        let mut tracker = Tracker::new(TrackingParams::default()).unwrap();
        for f in 1..=5 {
            let set = tracker.update(&frame(
                f,
                vec![cluster_at(-5.0, 0.0), cluster_at(5.0, 0.0)],
            ));
            assert_eq!(set.tracks.len(), 2);
        }
        assert_eq!(tracker.last_stats().matched, 2);
        assert!(tracker.tracks().iter().all(Track::is_confirmed));
    }

    #[test]
    fn test_changing_cluster_counts_between_frames() {
        let mut tracker = Tracker::new(TrackingParams::default()).unwrap();
        let three = vec![cluster_at(-8.0, 0.0), cluster_at(0.0, 0.0), cluster_at(8.0, 0.0)];
        tracker.update(&frame(1, three.clone()));
        tracker.update(&frame(2, three));

        // Only the middle object is seen; the outer tracks must miss
        let set = tracker.update(&frame(3, vec![cluster_at(0.0, 0.0)]));
        assert_eq!(tracker.last_stats().matched, 1);
        assert_eq!(tracker.last_stats().spawned, 0);
        let misses: Vec<u32> = set.tracks.iter().map(|t| t.misses).collect();
        assert_eq!(misses, vec![1, 0, 1]);
        assert_eq!(set.tracks[1].state, TrackState::Confirmed);

        // Empty frame after a busy one
        let set = tracker.update(&frame(4, Vec::new()));
        assert_eq!(tracker.last_stats().matched, 0);
        assert!(set.tracks.iter().all(|t| t.misses >= 1));

        // A new object far from every track spawns instead of stealing one
        let set = tracker.update(&frame(5, vec![cluster_at(0.0, 0.0), cluster_at(0.0, 20.0)]));
        assert_eq!(tracker.last_stats().matched, 1);
        assert_eq!(tracker.last_stats().spawned, 1);
        assert_eq!(set.tracks.last().unwrap().hits, 1);
    }

    // ===== Identity =====

    #[test]
    fn test_ids_identical_across_runs() {
        let run = || {
            let mut tracker = Tracker::new(TrackingParams::default()).unwrap();
            let mut ids = Vec::new();
            for f in 1..=6 {
                let set = tracker.update(&frame(
                    f,
                    vec![cluster_at(f as f64 * 0.1, 1.0), cluster_at(-8.0, f as f64)],
                ));
                ids.extend(set.tracks.iter().map(|t| t.id));
            }
            ids
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_colliding_seeds_get_distinct_ids() {
        let mut tracker = Tracker::new(TrackingParams::default()).unwrap();
        let set = tracker.update(&frame(1, vec![cluster_at(1.0, 1.0), cluster_at(1.0, 1.0)]));
        assert_eq!(set.tracks.len(), 2);
        assert_ne!(set.tracks[0].id, set.tracks[1].id);
    }

    // ===== Limits and bad input =====

    #[test]
    fn test_max_tracks_limits_spawning() {
        let params = TrackingParams {
            max_tracks: 2,
            ..TrackingParams::default()
        };
        let mut tracker = Tracker::new(params).unwrap();
        let set = tracker.update(&frame(
            1,
            vec![cluster_at(0.0, 0.0), cluster_at(10.0, 0.0), cluster_at(20.0, 0.0)],
        ));
        assert_eq!(set.tracks.len(), 2);
        assert_eq!(tracker.last_stats().spawn_rejected, 1);
    }

    #[test]
    fn test_nan_cluster_skipped() {
        let mut tracker = Tracker::new(TrackingParams::default()).unwrap();
        tracker.update(&frame(1, vec![cluster_at(0.0, 0.0)]));
        let set = tracker.update(&frame(2, vec![cluster_at(f64::NAN, 0.0), cluster_at(0.0, 0.0)]));

        assert_eq!(set.tracks.len(), 1);
        assert_eq!(tracker.last_stats().skipped_clusters, 1);
        assert!(set.tracks[0].position.iter().all(|v| v.is_finite()));
        assert_eq!(set.tracks[0].hits, 2);
    }

    #[test]
    fn test_immediate_confirmation_config() {
        let params = TrackingParams {
            hits_to_confirm: 1,
            ..TrackingParams::default()
        };
        let mut tracker = Tracker::new(params).unwrap();
        let set = tracker.update(&frame(1, vec![cluster_at(0.0, 0.0)]));
        assert_eq!(set.tracks[0].state, TrackState::Confirmed);
    }
}
