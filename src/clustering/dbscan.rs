//! Grid-indexed DBSCAN.
//!
//! Input points are first put into a canonical order (sorted by position,
//! intensity, timestamp) so that labels and cluster order do not depend on
//! the order the sensor delivered the returns in.

use std::cmp::Ordering;
use std::collections::VecDeque;

use log::warn;

use super::features::Cluster;
use crate::config::ClusteringParams;
use crate::point::WorldPoint;
use crate::spatial::SpatialIndex;
use crate::Result;

/// DBSCAN label of one point after clustering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointLabel {
    Unvisited,
    Noise,
    Cluster(u32),
}

/// Density-based clusterer with reusable buffers.
#[derive(Debug)]
pub struct DbscanClusterer {
    params: ClusteringParams,
    index: SpatialIndex,
    sorted: Vec<WorldPoint>,
    labels: Vec<PointLabel>,
    neighbors: Vec<usize>,
    expansion: Vec<usize>,
    frontier: VecDeque<usize>,
    members: Vec<Vec<usize>>,
    heights: Vec<f64>,
    skipped: usize,
}

impl DbscanClusterer {
    /// Create a clusterer. The spatial index cell size equals `eps`.
    pub fn new(params: ClusteringParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            index: SpatialIndex::new(params.eps, params.volumetric),
            params,
            sorted: Vec::new(),
            labels: Vec::new(),
            neighbors: Vec::new(),
            expansion: Vec::new(),
            frontier: VecDeque::new(),
            members: Vec::new(),
            heights: Vec::new(),
            skipped: 0,
        })
    }

    pub fn params(&self) -> &ClusteringParams {
        &self.params
    }

    /// Non-finite points skipped by the last call.
    pub fn skipped_points(&self) -> usize {
        self.skipped
    }

    /// Points of the last call in canonical order, parallel to [`labels`](Self::labels).
    pub fn sorted_points(&self) -> &[WorldPoint] {
        &self.sorted
    }

    /// Labels of the last call, parallel to [`sorted_points`](Self::sorted_points).
    pub fn labels(&self) -> &[PointLabel] {
        &self.labels
    }

    /// Number of points labelled noise by the last call.
    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|l| **l == PointLabel::Noise).count()
    }

    /// Cluster `points`, returning clusters ordered by centroid x then y.
    pub fn cluster(&mut self, points: &[WorldPoint]) -> Vec<Cluster> {
        let mut out = Vec::new();
        self.cluster_into(points, &mut out);
        out
    }

    /// Cluster `points` into `out`, which is cleared first.
    pub fn cluster_into(&mut self, points: &[WorldPoint], out: &mut Vec<Cluster>) {
        out.clear();

        self.sorted.clear();
        self.sorted.extend(points.iter().filter(|p| p.is_finite()).copied());
        self.skipped = points.len() - self.sorted.len();
        if self.skipped > 0 {
            warn!("Skipped {} non-finite points before clustering", self.skipped);
        }
        self.sorted.sort_unstable_by(canonical_order);

        self.labels.clear();
        self.labels.resize(self.sorted.len(), PointLabel::Unvisited);
        if self.sorted.is_empty() {
            return;
        }

        self.index.build(&self.sorted);
        let cluster_count = self.label_points();

        for group in self.members.iter_mut() {
            group.clear();
        }
        if self.members.len() < cluster_count {
            self.members.resize_with(cluster_count, Vec::new);
        }
        for (i, label) in self.labels.iter().enumerate() {
            if let PointLabel::Cluster(c) = label {
                self.members[*c as usize].push(i);
            }
        }

        for group in &self.members[..cluster_count] {
            let sorted = &self.sorted;
            if let Some(cluster) =
                Cluster::from_points(group.iter().map(|&i| &sorted[i]), &mut self.heights)
            {
                out.push(cluster);
            }
        }

        out.sort_by(|a, b| {
            a.centroid[0]
                .total_cmp(&b.centroid[0])
                .then(a.centroid[1].total_cmp(&b.centroid[1]))
                .then(a.centroid[2].total_cmp(&b.centroid[2]))
        });
    }

    /// Run the DBSCAN labelling pass. Returns the number of clusters.
    fn label_points(&mut self) -> usize {
        let eps = self.params.eps;
        let min_pts = self.params.min_pts;
        let mut next_cluster = 0u32;

        for i in 0..self.sorted.len() {
            if self.labels[i] != PointLabel::Unvisited {
                continue;
            }

            // Neighbourhood includes the point itself
            self.index.region_query(i, eps, &mut self.neighbors);
            if self.neighbors.len() < min_pts {
                self.labels[i] = PointLabel::Noise;
                continue;
            }

            let id = next_cluster;
            next_cluster += 1;
            self.labels[i] = PointLabel::Cluster(id);

            self.frontier.clear();
            self.frontier.extend(self.neighbors.iter().copied().filter(|&j| j != i));

            while let Some(j) = self.frontier.pop_front() {
                match self.labels[j] {
                    PointLabel::Cluster(_) => {}
                    PointLabel::Noise => {
                        // Border point: joins, does not expand
                        self.labels[j] = PointLabel::Cluster(id);
                    }
                    PointLabel::Unvisited => {
                        self.labels[j] = PointLabel::Cluster(id);
                        self.index.region_query(j, eps, &mut self.expansion);
                        if self.expansion.len() >= min_pts {
                            for &k in &self.expansion {
                                if matches!(
                                    self.labels[k],
                                    PointLabel::Unvisited | PointLabel::Noise
                                ) {
                                    self.frontier.push_back(k);
                                }
                            }
                        }
                    }
                }
            }
        }

        next_cluster as usize
    }
}

fn canonical_order(a: &WorldPoint, b: &WorldPoint) -> Ordering {
    a.x.total_cmp(&b.x)
        .then(a.y.total_cmp(&b.y))
        .then(a.z.total_cmp(&b.z))
        .then(a.intensity.total_cmp(&b.intensity))
        .then(a.timestamp_ns.cmp(&b.timestamp_ns))
        .then(a.sensor_id.cmp(&b.sensor_id))
}
