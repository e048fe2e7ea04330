//! Sensor-centric statistical background model.
//!
//! Each (ring, azimuth-bin) location keeps an adaptive estimate of the static
//! range seen there. Returns close to that estimate are background; returns
//! that diverge are foreground. Cells that see an extreme divergence while
//! still poorly learned are frozen for a while so that a lingering object
//! cannot be absorbed into the background.

mod cell;
mod grid;
mod model;

pub use cell::BackgroundCell;
pub use grid::{BackgroundGrid, BackgroundSnapshot, CellRecord};
pub use model::{BackgroundModel, ClassifyStats, FREEZE_GRACE_NS};
