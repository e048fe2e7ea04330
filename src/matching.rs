//! Cluster-to-track association.
//!
//! The tracker offers every (cluster, track) pair together with its squared
//! Mahalanobis distance. Pairs outside the gate are discarded on offer; the
//! survivors are resolved greedily, nearest first, each cluster and track
//! used at most once.
//!
//! All buffers live in the [`Associator`] and are reused frame to frame.

use std::cmp::Ordering;

/// A gated association hypothesis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    /// Squared Mahalanobis distance of the cluster centroid from the track.
    pub distance_sq: f64,
    pub cluster: usize,
    pub track: usize,
}

impl Candidate {
    /// Nearest first; equal distances go to the lower cluster, then the lower
    /// track, so the outcome never depends on offer order.
    fn resolution_order(&self, other: &Self) -> Ordering {
        self.distance_sq
            .total_cmp(&other.distance_sq)
            .then(self.cluster.cmp(&other.cluster))
            .then(self.track.cmp(&other.track))
    }
}

/// Greedy nearest-neighbour association behind a chi-square gate.
#[derive(Clone, Debug, Default)]
pub struct Associator {
    gate_sq: f64,
    candidates: Vec<Candidate>,
    cluster_taken: Vec<bool>,
    track_taken: Vec<bool>,
    pairs: Vec<(usize, usize)>,
}

impl Associator {
    /// `gate_sq` is the largest accepted squared distance (inclusive).
    pub fn new(gate_sq: f64) -> Self {
        Self {
            gate_sq,
            ..Self::default()
        }
    }

    pub fn gate_sq(&self) -> f64 {
        self.gate_sq
    }

    /// Start a frame with `clusters` clusters and `tracks` live tracks.
    pub fn begin(&mut self, clusters: usize, tracks: usize) {
        self.candidates.clear();
        self.pairs.clear();
        self.cluster_taken.clear();
        self.cluster_taken.resize(clusters, false);
        self.track_taken.clear();
        self.track_taken.resize(tracks, false);
    }

    /// Offer a pair. Returns whether it passed the gate.
    ///
    /// Non-finite distances (singular innovation covariance, NaN state) are
    /// always gated out.
    pub fn offer(&mut self, cluster: usize, track: usize, distance_sq: f64) -> bool {
        if !(distance_sq.is_finite() && distance_sq <= self.gate_sq) {
            return false;
        }
        self.candidates.push(Candidate {
            distance_sq,
            cluster,
            track,
        });
        true
    }

    /// Gated candidates offered so far this frame.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Resolve the offered candidates into `(cluster, track)` pairs, in the
    /// order they were accepted.
    pub fn resolve(&mut self) -> &[(usize, usize)] {
        self.candidates
            .sort_unstable_by(|a, b| a.resolution_order(b));

        for c in &self.candidates {
            if self.cluster_taken[c.cluster] || self.track_taken[c.track] {
                continue;
            }
            self.cluster_taken[c.cluster] = true;
            self.track_taken[c.track] = true;
            self.pairs.push((c.cluster, c.track));
        }
        &self.pairs
    }

    /// Pairs from the last [`resolve`](Self::resolve).
    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    pub fn is_cluster_taken(&self, cluster: usize) -> bool {
        self.cluster_taken[cluster]
    }

    pub fn is_track_taken(&self, track: usize) -> bool {
        self.track_taken[track]
    }

    /// Clusters left without a track after resolving, ascending.
    pub fn free_clusters(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.cluster_taken.len()).filter(move |&i| !self.cluster_taken[i])
    }

    /// Tracks left without a cluster after resolving, ascending.
    pub fn free_tracks(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.track_taken.len()).filter(move |&j| !self.track_taken[j])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Offer a full distance table, `rows[cluster][track]`.
    fn associate(gate_sq: f64, rows: &[&[f64]]) -> Associator {
        let tracks = rows.first().map_or(0, |r| r.len());
        let mut associator = Associator::new(gate_sq);
        associator.begin(rows.len(), tracks);
        for (ci, row) in rows.iter().enumerate() {
            for (tj, &d) in row.iter().enumerate() {
                associator.offer(ci, tj, d);
            }
        }
        associator.resolve();
        associator
    }

    // ===== Gate =====

    #[test]
    fn test_offer_applies_chi_square_gate() {
        let mut associator = Associator::new(9.21);
        associator.begin(1, 3);
        assert!(associator.offer(0, 0, 0.4));
        assert!(associator.offer(0, 1, 9.21));
        assert!(!associator.offer(0, 2, 9.2101));
        assert_eq!(associator.candidates().len(), 2);
    }

    #[test]
    fn test_singular_distances_never_gate_in() {
        let mut associator = Associator::new(f64::MAX);
        associator.begin(2, 1);
        assert!(!associator.offer(0, 0, f64::INFINITY));
        assert!(!associator.offer(1, 0, f64::NAN));
        assert!(associator.resolve().is_empty());
        assert_eq!(associator.free_clusters().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(associator.free_tracks().collect::<Vec<_>>(), vec![0]);
    }

    // ===== Greedy resolution =====

    #[test]
    fn test_crossing_pedestrians_keep_nearest() {
        // Two people passing each other: each cluster is closest to its own
        // track, but cluster 0 also falls inside track 1's gate
        let associator = associate(9.21, &[&[0.6, 4.0], &[7.5, 1.1]]);
        assert_eq!(associator.pairs(), &[(0, 0), (1, 1)]);
    }

    #[test]
    fn test_contested_track_goes_to_nearer_cluster() {
        // A split cluster: both halves gate into the single track
        let associator = associate(9.21, &[&[2.5], &[0.9]]);
        assert_eq!(associator.pairs(), &[(1, 0)]);
        assert_eq!(associator.free_clusters().collect::<Vec<_>>(), vec![0]);
        assert!(associator.free_tracks().next().is_none());
    }

    #[test]
    fn test_greedy_commits_to_nearest_pair_first() {
        // Cluster 0 takes track 0 at 1.0 even though the total would be lower
        // with the other assignment; cluster 1 then falls outside track 1's gate
        let associator = associate(5.0, &[&[1.0, 2.0], &[1.5, 8.0]]);
        assert_eq!(associator.pairs(), &[(0, 0)]);
        assert_eq!(associator.free_clusters().collect::<Vec<_>>(), vec![1]);
        assert_eq!(associator.free_tracks().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_equal_distances_resolved_by_index() {
        let mut associator = Associator::new(9.21);
        associator.begin(2, 2);
        // Offered in reverse to show order does not matter
        for (ci, tj) in [(1, 1), (1, 0), (0, 1), (0, 0)] {
            associator.offer(ci, tj, 3.0);
        }
        assert_eq!(associator.resolve(), &[(0, 0), (1, 1)]);
    }

    // ===== Frame reuse =====

    #[test]
    fn test_begin_clears_previous_frame() {
        let mut associator = associate(9.21, &[&[0.5, 1.0], &[1.0, 0.5]]);
        assert_eq!(associator.pairs().len(), 2);

        associator.begin(1, 0);
        assert!(associator.candidates().is_empty());
        assert!(associator.resolve().is_empty());
        assert!(!associator.is_cluster_taken(0));
        assert_eq!(associator.free_clusters().collect::<Vec<_>>(), vec![0]);
    }
}
