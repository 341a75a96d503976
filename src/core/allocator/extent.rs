//! Extent value type shared by every strategy

use serde::{Deserialize, Serialize};
use std::fmt;

/// A contiguous run of blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    /// First block of the run
    pub start: usize,
    /// Number of blocks in the run
    pub length: usize,
}

impl Extent {
    pub fn new(start: usize, length: usize) -> Self {
        Extent { start, length }
    }

    /// One past the last block
    pub fn end(&self) -> usize {
        self.start + self.length
    }

    /// Last block of the run (`None` for an empty extent)
    pub fn last(&self) -> Option<usize> {
        self.end().checked_sub(1).filter(|_| self.length > 0)
    }

    pub fn contains(&self, block: usize) -> bool {
        block >= self.start && block < self.end()
    }

    /// Check if this extent touches another end-to-start (can be coalesced)
    pub fn is_adjacent(&self, other: &Extent) -> bool {
        self.end() == other.start || other.end() == self.start
    }

    /// Check if the two extents share at least one block
    pub fn overlaps(&self, other: &Extent) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    /// Smallest extent covering both (meant for overlapping or adjacent extents)
    pub fn span(&self, other: &Extent) -> Extent {
        let start = self.start.min(other.start);
        Extent::new(start, self.end().max(other.end()) - start)
    }

    /// Iterate over the blocks covered by this extent
    pub fn blocks(&self) -> std::ops::Range<usize> {
        self.start..self.end()
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last() {
            Some(last) => write!(f, "[{}:{}]({})", self.start, last, self.length),
            None => write!(f, "[{}:-](0)", self.start),
        }
    }
}

/// Collect the maximal free runs of an occupancy sequence, in order
pub fn free_runs<I>(occupancy: I) -> Vec<Extent>
where
    I: IntoIterator<Item = bool>,
{
    let mut runs = Vec::new();
    let mut run_start = 0;
    let mut run_length = 0;
    let mut pos = 0;

    for occupied in occupancy {
        if occupied {
            if run_length > 0 {
                runs.push(Extent::new(run_start, run_length));
                run_length = 0;
            }
        } else {
            if run_length == 0 {
                run_start = pos;
            }
            run_length += 1;
        }
        pos += 1;
    }

    if run_length > 0 {
        runs.push(Extent::new(run_start, run_length));
    }

    runs
}

/// Check that extents are start-ordered with a gap between every pair
pub fn is_coalesced(extents: &[Extent]) -> bool {
    extents.windows(2).all(|pair| pair[0].end() < pair[1].start)
}
