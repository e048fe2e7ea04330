//! Uniform hash-grid spatial index for radius queries.
//!
//! Space is divided into cubes (or ground-plane squares) whose side equals
//! the query radius, so a radius query only has to inspect the 3x3 (planar)
//! or 27-cell (volumetric) block around the query point's cell.
//!
//! # Performance
//!
//! - Build: O(n log n) (points are bucketed by sorting on cell key)
//! - Query: O(k) where k is the number of points in the neighbouring cells
//! - Buffers are kept between builds, so steady-state frames do not allocate

use std::collections::HashMap;

use crate::point::WorldPoint;

/// Integer cell coordinate. `z` is always 0 for planar indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct CellKey {
    x: i64,
    y: i64,
    z: i64,
}

/// Grid spatial index over a set of world points.
#[derive(Clone, Debug)]
pub struct SpatialIndex {
    cell_size: f64,
    volumetric: bool,
    /// Cell key of every indexed point, by point index.
    keys: Vec<CellKey>,
    /// Point indices grouped by cell.
    order: Vec<u32>,
    /// Cell key -> range into `order`.
    cells: HashMap<CellKey, (u32, u32)>,
    positions: Vec<[f64; 3]>,
}

impl SpatialIndex {
    /// Create an empty index with the given cell size.
    ///
    /// With `volumetric == false` the z coordinate is ignored entirely.
    pub fn new(cell_size: f64, volumetric: bool) -> Self {
        assert!(cell_size > 0.0, "cell size must be positive");
        Self {
            cell_size,
            volumetric,
            keys: Vec::new(),
            order: Vec::new(),
            cells: HashMap::new(),
            positions: Vec::new(),
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn is_volumetric(&self) -> bool {
        self.volumetric
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of occupied cells.
    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    fn key_for(&self, x: f64, y: f64, z: f64) -> CellKey {
        let inv = 1.0 / self.cell_size;
        CellKey {
            x: (x * inv).floor() as i64,
            y: (y * inv).floor() as i64,
            z: if self.volumetric { (z * inv).floor() as i64 } else { 0 },
        }
    }

    /// Rebuild the index over `points`, replacing any previous contents.
    pub fn build(&mut self, points: &[WorldPoint]) {
        self.positions.clear();
        self.positions.extend(points.iter().map(|p| [p.x, p.y, p.z]));

        self.keys.clear();
        for p in points {
            let key = self.key_for(p.x, p.y, p.z);
            self.keys.push(key);
        }

        self.order.clear();
        self.order.extend(0..points.len() as u32);
        let keys = &self.keys;
        self.order
            .sort_unstable_by(|&a, &b| keys[a as usize].cmp(&keys[b as usize]).then(a.cmp(&b)));

        self.cells.clear();
        let mut start = 0usize;
        while start < self.order.len() {
            let key = self.keys[self.order[start] as usize];
            let mut end = start + 1;
            while end < self.order.len() && self.keys[self.order[end] as usize] == key {
                end += 1;
            }
            self.cells.insert(key, (start as u32, end as u32));
            start = end;
        }
    }

    /// Indices of all points within `eps` of indexed point `index`,
    /// including `index` itself, written into `out`.
    ///
    /// Results are ordered by cell then by point index, so they are stable
    /// for a given build.
    pub fn region_query(&self, index: usize, eps: f64, out: &mut Vec<usize>) {
        let [x, y, z] = self.positions[index];
        self.query_point(x, y, z, eps, out);
    }

    /// Indices of all indexed points within `eps` of (x, y, z).
    ///
    /// `eps` may exceed the cell size; the search block grows accordingly.
    pub fn query_point(&self, x: f64, y: f64, z: f64, eps: f64, out: &mut Vec<usize>) {
        out.clear();
        if self.positions.is_empty() {
            return;
        }

        let center = self.key_for(x, y, z);
        let reach = (eps / self.cell_size).ceil().max(1.0) as i64;
        let z_reach = if self.volumetric { reach } else { 0 };
        let eps_sq = eps * eps;

        for dx in -reach..=reach {
            for dy in -reach..=reach {
                for dz in -z_reach..=z_reach {
                    let key = CellKey {
                        x: center.x + dx,
                        y: center.y + dy,
                        z: center.z + dz,
                    };
                    let Some(&(start, end)) = self.cells.get(&key) else {
                        continue;
                    };
                    for &j in &self.order[start as usize..end as usize] {
                        let [px, py, pz] = self.positions[j as usize];
                        let (ddx, ddy) = (px - x, py - y);
                        let mut dist_sq = ddx * ddx + ddy * ddy;
                        if self.volumetric {
                            let ddz = pz - z;
                            dist_sq += ddz * ddz;
                        }
                        if dist_sq <= eps_sq {
                            out.push(j as usize);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeSet;

    fn random_points(n: usize, extent: f64, seed: u64) -> Vec<WorldPoint> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                WorldPoint::new(
                    rng.gen_range(-extent..extent),
                    rng.gen_range(-extent..extent),
                    rng.gen_range(0.0..3.0),
                )
            })
            .collect()
    }

    fn brute_force(points: &[WorldPoint], index: usize, eps: f64, volumetric: bool) -> BTreeSet<usize> {
        let q = &points[index];
        points
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                let d = if volumetric { q.distance_sq(p) } else { q.planar_distance_sq(p) };
                d <= eps * eps
            })
            .map(|(i, _)| i)
            .collect()
    }

    // ===== Agreement with brute force =====

    #[test]
    fn test_planar_matches_brute_force() {
        let points = random_points(500, 10.0, 7);
        let mut index = SpatialIndex::new(0.6, false);
        index.build(&points);

        let mut out = Vec::new();
        for i in (0..points.len()).step_by(13) {
            index.region_query(i, 0.6, &mut out);
            let got: BTreeSet<usize> = out.iter().copied().collect();
            assert_eq!(got, brute_force(&points, i, 0.6, false), "point {}", i);
            assert!(got.contains(&i));
        }
    }

    #[test]
    fn test_volumetric_matches_brute_force() {
        let points = random_points(500, 5.0, 11);
        let mut index = SpatialIndex::new(0.5, true);
        index.build(&points);

        let mut out = Vec::new();
        for i in (0..points.len()).step_by(17) {
            index.region_query(i, 0.5, &mut out);
            let got: BTreeSet<usize> = out.iter().copied().collect();
            assert_eq!(got, brute_force(&points, i, 0.5, true), "point {}", i);
        }
    }

    #[test]
    fn test_radius_larger_than_cell() {
        let points = random_points(300, 5.0, 3);
        let mut index = SpatialIndex::new(0.5, false);
        index.build(&points);

        let mut out = Vec::new();
        index.region_query(0, 1.7, &mut out);
        let got: BTreeSet<usize> = out.iter().copied().collect();
        assert_eq!(got, brute_force(&points, 0, 1.7, false));
    }

    // ===== Edge cases =====

    #[test]
    fn test_negative_coordinates_and_boundaries() {
        let points = vec![
            WorldPoint::new(-0.01, -0.01, 0.0),
            WorldPoint::new(0.01, 0.01, 0.0),
            WorldPoint::new(-1.0, 0.0, 0.0),
        ];
        let mut index = SpatialIndex::new(0.5, false);
        index.build(&points);

        let mut out = Vec::new();
        index.region_query(0, 0.5, &mut out);
        let got: BTreeSet<usize> = out.iter().copied().collect();
        assert_eq!(got, BTreeSet::from([0, 1]));
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let mut index = SpatialIndex::new(1.0, false);
        index.build(&random_points(100, 5.0, 1));
        assert_eq!(index.len(), 100);

        index.build(&[WorldPoint::new(0.0, 0.0, 0.0)]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.occupied_cells(), 1);

        index.build(&[]);
        let mut out = vec![42];
        index.query_point(0.0, 0.0, 0.0, 1.0, &mut out);
        assert!(out.is_empty());
    }
}
