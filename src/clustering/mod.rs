//! Density-based clustering of foreground world points.
//!
//! This module provides:
//! - `DbscanClusterer` - grid-indexed DBSCAN with deterministic output order
//! - `Cluster` - per-cluster shape and appearance features
//! - `ClusterSet` - one frame's ordered clusters, handed to the tracker

mod dbscan;
mod features;

pub use dbscan::{DbscanClusterer, PointLabel};
pub use features::{Cluster, ClusterSet};
