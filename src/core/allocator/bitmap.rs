//! Bitmap strategy
//!
//! Keeps no state of its own: the device's occupancy array is the bitmap.
//! Every allocation and largest-run query scans the device with charged reads,
//! so each costs O(N) device I/O. Releases only write the covered blocks.

use crate::allocator::extent::{self, Extent};
use crate::allocator::stats::{Operation, PerfSamples, StrategyStats};
use crate::allocator::{release_in_range, FreeSpaceManager};
use crate::device::BlockDevice;
use crate::error::Result;
use std::time::Instant;
use tracing::debug;

/// Bitmap free-space manager
///
/// Represents free/allocated state directly in the device:
/// - `false` = free block
/// - `true` = allocated block
#[derive(Debug)]
pub struct BitmapStrategy<'a> {
    device: &'a mut BlockDevice,
    samples: PerfSamples,
}

impl<'a> BitmapStrategy<'a> {
    pub const NAME: &'static str = "Bitmap";

    pub fn new(device: &'a mut BlockDevice) -> Self {
        debug!(total_blocks = device.total_blocks(), "bitmap strategy bound to device");
        BitmapStrategy {
            device,
            samples: PerfSamples::new(),
        }
    }

    /// Scan for the first run of `blocks` free blocks, stopping as soon as it is complete
    fn find_first_fit(&mut self, blocks: usize) -> Result<Option<usize>> {
        let mut run_start = 0;
        let mut run_length = 0;

        for pos in 0..self.device.total_blocks() {
            if self.device.read(pos)? {
                run_length = 0;
                continue;
            }

            if run_length == 0 {
                run_start = pos;
            }
            run_length += 1;

            if run_length == blocks {
                return Ok(Some(run_start));
            }
        }

        Ok(None)
    }

    fn scan_largest(&mut self) -> Result<Option<Extent>> {
        let mut best: Option<Extent> = None;
        let mut run_start = 0;
        let mut run_length = 0;

        for pos in 0..self.device.total_blocks() {
            if self.device.read(pos)? {
                if run_length > best.map_or(0, |e| e.length) {
                    best = Some(Extent::new(run_start, run_length));
                }
                run_length = 0;
            } else {
                if run_length == 0 {
                    run_start = pos;
                }
                run_length += 1;
            }
        }

        // A run ending on the last block never sees an occupied block after it
        if run_length > best.map_or(0, |e| e.length) {
            best = Some(Extent::new(run_start, run_length));
        }

        Ok(best)
    }
}

impl FreeSpaceManager for BitmapStrategy<'_> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn allocate(&mut self, blocks: usize) -> Result<Option<Extent>> {
        let started = Instant::now();

        let found = if blocks == 0 {
            None
        } else {
            self.find_first_fit(blocks)?
        };

        let allocated = match found {
            Some(start) => {
                let extent = Extent::new(start, blocks);
                for pos in extent.blocks() {
                    self.device.write(pos, true)?;
                }
                Some(extent)
            }
            None => None,
        };

        self.samples.record(Operation::Allocate, started);
        Ok(allocated)
    }

    fn release(&mut self, start: usize, length: usize) -> Result<bool> {
        if !release_in_range(self.device.total_blocks(), start, length) {
            return Ok(false);
        }

        let started = Instant::now();
        for pos in Extent::new(start, length).blocks() {
            self.device.write(pos, false)?;
        }
        self.samples.record(Operation::Release, started);
        Ok(true)
    }

    fn largest_free_run(&mut self) -> Result<Option<Extent>> {
        let started = Instant::now();
        let largest = self.scan_largest()?;
        self.samples.record(Operation::LargestFreeRun, started);
        Ok(largest)
    }

    fn stats(&self) -> StrategyStats {
        StrategyStats::from_samples(Self::NAME, &self.samples)
    }

    fn reset_stats(&mut self) {
        self.samples.clear();
    }

    fn device(&self) -> &BlockDevice {
        &*self.device
    }

    fn free_extents(&self) -> Vec<Extent> {
        extent::free_runs(self.device.occupancy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_allocation() {
        let mut device = BlockDevice::new(16);
        let mut bitmap = BitmapStrategy::new(&mut device);

        let extent = bitmap.allocate(5).unwrap().unwrap();
        assert_eq!(extent, Extent::new(0, 5));
        assert_eq!(bitmap.largest_free_run().unwrap(), Some(Extent::new(5, 11)));
        assert_eq!(bitmap.device().stats().occupied, 5);
    }

    #[test]
    fn test_first_fit_skips_short_runs() {
        let mut device = BlockDevice::from_pattern("0010001000000000").unwrap();
        let mut bitmap = BitmapStrategy::new(&mut device);

        assert_eq!(bitmap.allocate(3).unwrap(), Some(Extent::new(3, 3)));
        assert_eq!(bitmap.allocate(2).unwrap(), Some(Extent::new(0, 2)));
        assert_eq!(bitmap.device().export_pattern(), "1111111000000000");
    }

    #[test]
    fn test_allocate_stops_scanning_early() {
        let mut device = BlockDevice::new(64);
        let mut bitmap = BitmapStrategy::new(&mut device);

        bitmap.allocate(4).unwrap();
        let stats = bitmap.device().stats();
        assert_eq!(stats.read_accesses, 4);
        assert_eq!(stats.write_accesses, 4);
    }

    #[test]
    fn test_out_of_space_does_not_mutate() {
        let mut device = BlockDevice::from_pattern("0101010101010101").unwrap();
        let mut bitmap = BitmapStrategy::new(&mut device);

        assert_eq!(bitmap.allocate(2).unwrap(), None);
        assert_eq!(bitmap.allocate(0).unwrap(), None);
        let stats = bitmap.device().stats();
        assert_eq!(stats.write_accesses, 0);
        assert_eq!(stats.read_accesses, 16);
    }

    #[test]
    fn test_release() {
        let mut device = BlockDevice::from_pattern("1111111111111111").unwrap();
        let mut bitmap = BitmapStrategy::new(&mut device);

        assert!(bitmap.release(4, 3).unwrap());
        assert_eq!(bitmap.device().export_pattern(), "1111000111111111");
        assert_eq!(bitmap.device().stats().write_accesses, 3);
        assert_eq!(bitmap.device().stats().read_accesses, 0);
    }

    #[test]
    fn test_release_out_of_range() {
        let mut device = BlockDevice::from_pattern("1111111111111111").unwrap();
        let mut bitmap = BitmapStrategy::new(&mut device);

        assert!(!bitmap.release(20, 1).unwrap());
        assert!(!bitmap.release(10, 7).unwrap());
        assert_eq!(bitmap.device().export_pattern(), "1111111111111111");
        assert_eq!(bitmap.device().stats().write_accesses, 0);
    }

    #[test]
    fn test_largest_run_at_end_of_device() {
        let mut device = BlockDevice::from_pattern("0010000100000000").unwrap();
        let mut bitmap = BitmapStrategy::new(&mut device);
        assert_eq!(bitmap.largest_free_run().unwrap(), Some(Extent::new(8, 8)));
    }

    #[test]
    fn test_largest_run_ties_prefer_leftmost() {
        let mut device = BlockDevice::from_pattern("0001000100011111").unwrap();
        let mut bitmap = BitmapStrategy::new(&mut device);
        assert_eq!(bitmap.largest_free_run().unwrap(), Some(Extent::new(0, 3)));
    }

    #[test]
    fn test_largest_run_on_full_device() {
        let mut device = BlockDevice::from_pattern("1111").unwrap();
        let mut bitmap = BitmapStrategy::new(&mut device);
        assert_eq!(bitmap.largest_free_run().unwrap(), None);
    }

    #[test]
    fn test_stats_and_reset() {
        let mut device = BlockDevice::new(8);
        let mut bitmap = BitmapStrategy::new(&mut device);

        bitmap.allocate(2).unwrap();
        bitmap.allocate(20).unwrap();
        bitmap.release(0, 2).unwrap();
        bitmap.largest_free_run().unwrap();

        let stats = bitmap.stats();
        assert_eq!(stats.name, "Bitmap");
        assert_eq!(stats.allocate.op_count, 2);
        assert_eq!(stats.release.op_count, 1);
        assert_eq!(stats.largest_free_run.op_count, 1);

        bitmap.reset_stats();
        assert_eq!(bitmap.stats().allocate.op_count, 0);
    }
}
