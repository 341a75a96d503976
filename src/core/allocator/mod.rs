//! Free-space tracking strategies
//!
//! Three interchangeable strategies manage the same [`BlockDevice`]:
//! - [`bitmap`] - re-derives free runs by scanning the device on every call
//! - [`singly_linked`] - ordered singly-linked chain of free extents
//! - [`doubly_linked`] - arena-backed doubly-linked chain with a tail handle
//!
//! All three use first-fit allocation from the front of the matched run and
//! must return identical results for identical call sequences.

pub mod bitmap;
pub mod doubly_linked;
pub mod extent;
pub mod singly_linked;
pub mod stats;

use crate::device::BlockDevice;
use crate::error::{FreespaceError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use bitmap::BitmapStrategy;
pub use doubly_linked::DoublyLinkedFreeList;
pub use extent::Extent;
pub use singly_linked::SinglyLinkedFreeList;
pub use stats::{OpStats, StrategyStats};

/// Free-space manager interface
///
/// A strategy holds the only mutable borrow of its device for as long as it
/// lives, so its view of free space cannot drift from the device's occupancy.
pub trait FreeSpaceManager {
    /// Human-readable strategy name (for reports)
    fn name(&self) -> &'static str;

    /// Reserve `blocks` contiguous blocks using first-fit
    ///
    /// Returns `Ok(None)` when no free run is large enough (or `blocks` is 0);
    /// nothing is mutated in that case.
    fn allocate(&mut self, blocks: usize) -> Result<Option<Extent>>;

    /// Return `length` blocks starting at `start` to the free pool
    ///
    /// Returns `Ok(false)` for a range outside the device.
    fn release(&mut self, start: usize, length: usize) -> Result<bool>;

    /// Find the largest free run (leftmost on ties)
    fn largest_free_run(&mut self) -> Result<Option<Extent>>;

    /// Snapshot of the latency samples recorded so far
    fn stats(&self) -> StrategyStats;

    /// Discard recorded latency samples
    fn reset_stats(&mut self);

    /// The managed device
    fn device(&self) -> &BlockDevice;

    /// Current free extents in block order, without charging device I/O
    fn free_extents(&self) -> Vec<Extent>;
}

/// Check a release range against the device size
pub(crate) fn release_in_range(total_blocks: usize, start: usize, length: usize) -> bool {
    start < total_blocks
        && length > 0
        && start
            .checked_add(length)
            .map_or(false, |end| end <= total_blocks)
}

/// Selectable strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Bitmap,
    SinglyLinked,
    DoublyLinked,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Bitmap,
        StrategyKind::SinglyLinked,
        StrategyKind::DoublyLinked,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Bitmap => BitmapStrategy::NAME,
            StrategyKind::SinglyLinked => SinglyLinkedFreeList::NAME,
            StrategyKind::DoublyLinked => DoublyLinkedFreeList::NAME,
        }
    }

    /// Bind a new strategy of this kind to `device`
    ///
    /// List strategies scan the device once here, without charged reads.
    pub fn build<'a>(&self, device: &'a mut BlockDevice) -> Box<dyn FreeSpaceManager + 'a> {
        match self {
            StrategyKind::Bitmap => Box::new(BitmapStrategy::new(device)),
            StrategyKind::SinglyLinked => Box::new(SinglyLinkedFreeList::new(device)),
            StrategyKind::DoublyLinked => Box::new(DoublyLinkedFreeList::new(device)),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = FreespaceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bitmap" => Ok(StrategyKind::Bitmap),
            "singly-linked" | "singly_linked" | "singly" | "simple" => {
                Ok(StrategyKind::SinglyLinked)
            }
            "doubly-linked" | "doubly_linked" | "doubly" | "double" => {
                Ok(StrategyKind::DoublyLinked)
            }
            _ => Err(FreespaceError::UnknownStrategy(s.to_string())),
        }
    }
}
