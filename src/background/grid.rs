//! Fixed-size polar grid of background cells and its snapshot format.

use serde::{Deserialize, Serialize};

use super::cell::BackgroundCell;
use crate::{Error, Result};

/// One polar grid of background cells, `rings x azimuth_bins`, row-major by ring.
///
/// The dimensions are fixed at construction and never change.
#[derive(Clone, Debug)]
pub struct BackgroundGrid {
    rings: usize,
    azimuth_bins: usize,
    cells: Vec<BackgroundCell>,
}

impl BackgroundGrid {
    /// Create an unlearned grid.
    pub fn new(rings: usize, azimuth_bins: usize) -> Result<Self> {
        if rings == 0 || azimuth_bins == 0 {
            return Err(Error::MissingGrid);
        }
        Ok(Self {
            rings,
            azimuth_bins,
            cells: vec![BackgroundCell::default(); rings * azimuth_bins],
        })
    }

    pub fn rings(&self) -> usize {
        self.rings
    }

    pub fn azimuth_bins(&self) -> usize {
        self.azimuth_bins
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    fn index(&self, ring: usize, bin: usize) -> usize {
        ring * self.azimuth_bins + bin
    }

    /// Cell at (ring, bin). Panics if out of range.
    #[inline]
    pub fn cell(&self, ring: usize, bin: usize) -> &BackgroundCell {
        &self.cells[self.index(ring, bin)]
    }

    /// Mutable cell at (ring, bin). Panics if out of range.
    #[inline]
    pub fn cell_mut(&mut self, ring: usize, bin: usize) -> &mut BackgroundCell {
        let idx = self.index(ring, bin);
        &mut self.cells[idx]
    }

    /// Bin index `offset` bins away from `bin`, wrapping around the ring.
    #[inline]
    pub fn wrap_bin(&self, bin: usize, offset: isize) -> usize {
        (bin as isize + offset).rem_euclid(self.azimuth_bins as isize) as usize
    }

    /// Forget everything learned.
    pub fn reset(&mut self) {
        self.cells.fill(BackgroundCell::default());
    }

    /// Number of cells that have seen at least one return.
    pub fn initialized_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_initialized()).count()
    }

    /// Export every learned cell as a flat list.
    pub fn snapshot(&self) -> BackgroundSnapshot {
        let cells = self
            .cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.is_initialized())
            .map(|(idx, cell)| CellRecord {
                ring: (idx / self.azimuth_bins) as u32,
                azimuth_bin: (idx % self.azimuth_bins) as u32,
                stats: *cell,
            })
            .collect();

        BackgroundSnapshot {
            rings: self.rings,
            azimuth_bins: self.azimuth_bins,
            cells,
        }
    }

    /// Replace the grid contents with a snapshot of the same geometry.
    ///
    /// Freeze timers are dropped since they refer to the exporting session's
    /// clock. The grid is left untouched if the snapshot is rejected.
    pub fn restore(&mut self, snapshot: &BackgroundSnapshot) -> Result<()> {
        if snapshot.rings != self.rings || snapshot.azimuth_bins != self.azimuth_bins {
            return Err(Error::SnapshotMismatch {
                expected: format!("{}x{}", self.rings, self.azimuth_bins),
                got: format!("{}x{}", snapshot.rings, snapshot.azimuth_bins),
            });
        }
        if let Some(bad) = snapshot
            .cells
            .iter()
            .find(|r| r.ring as usize >= self.rings || r.azimuth_bin as usize >= self.azimuth_bins)
        {
            return Err(Error::SnapshotMismatch {
                expected: format!("cells within {}x{}", self.rings, self.azimuth_bins),
                got: format!("cell ({}, {})", bad.ring, bad.azimuth_bin),
            });
        }

        self.reset();
        for record in &snapshot.cells {
            let cell = self.cell_mut(record.ring as usize, record.azimuth_bin as usize);
            *cell = record.stats;
            cell.freeze_until_ns = None;
            cell.refreeze_guard_until_ns = None;
        }
        Ok(())
    }
}

/// Flat export of a background grid for external persistence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackgroundSnapshot {
    pub rings: usize,
    pub azimuth_bins: usize,
    pub cells: Vec<CellRecord>,
}

/// Statistics of one learned cell in a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub ring: u32,
    pub azimuth_bin: u32,
    pub stats: BackgroundCell,
}
