//! # freespace - free-space management on a simulated block device
//!
//! `freespace-rs` models a fixed-size disk whose every block access costs a
//! simulated latency, and compares three ways of tracking free space on it:
//!
//! - **Bitmap** - no auxiliary state; every query scans the device
//! - **Singly-linked free list** - ordered chain of free extents
//! - **Doubly-linked free list** - the same chain with back links and a tail
//!
//! All strategies allocate first-fit and coalesce adjacent free extents on
//! release, so for the same calls they return the same extents. They differ
//! only in how many device accesses and how much time each call costs.
//!
//! ## Quick Start
//!
//! ```rust
//! use freespace_rs::{BlockDevice, FreeSpaceManager, StrategyKind, Result};
//!
//! # fn main() -> Result<()> {
//! let mut device = BlockDevice::from_pattern("0011000011100000")?;
//! let mut strategy = StrategyKind::DoublyLinked.build(&mut device);
//!
//! let extent = strategy.allocate(3)?.expect("space for 3 blocks");
//! assert_eq!((extent.start, extent.length), (4, 3));
//!
//! strategy.release(extent.start, extent.length)?;
//! assert_eq!(strategy.free_extents().len(), 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Comparing strategies
//!
//! ```rust,no_run
//! use freespace_rs::{compare, SimConfig, StrategyKind};
//!
//! # fn main() -> freespace_rs::Result<()> {
//! let config = SimConfig::from_file("freespace.toml")?;
//! let pattern = std::fs::read_to_string(&config.paths.pattern_file)?;
//! let report = compare(&config, pattern.trim_end(), &StrategyKind::ALL)?;
//! println!("{}", report.render_table());
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
pub(crate) use self::core::{allocator, config, device, error, workload};

pub use crate::core::{
    allocator::{
        BitmapStrategy, DoublyLinkedFreeList, Extent, FreeSpaceManager, OpStats,
        SinglyLinkedFreeList, StrategyKind, StrategyStats,
    },
    config::SimConfig,
    device::{BlockDevice, DeviceStats, IoKind, Latency, NoLatency, SleepLatency},
    error::{FreespaceError, Result},
    workload::{compare, run_workload, ComparisonReport, RunOutcome, StrategySummary, WorkloadSpec},
};
