//! Singly-linked free-list strategy
//!
//! Tracks only the free space of the device, as a start-ordered chain of
//! maximal free extents. Allocation and release walk the chain instead of the
//! device, so their cost grows with the number of free extents rather than
//! with the device size. The device is only touched to mark blocks.

use crate::allocator::extent::{self, Extent};
use crate::allocator::stats::{Operation, PerfSamples, StrategyStats};
use crate::allocator::{release_in_range, FreeSpaceManager};
use crate::device::BlockDevice;
use crate::error::{FreespaceError, Result};
use std::time::Instant;
use tracing::{debug, warn};

type Link = Option<Box<Node>>;

#[derive(Debug)]
struct Node {
    extent: Extent,
    next: Link,
}

/// Borrowing iterator over the chain
pub struct Iter<'l> {
    next: Option<&'l Node>,
}

impl<'l> Iterator for Iter<'l> {
    type Item = &'l Extent;

    fn next(&mut self) -> Option<Self::Item> {
        self.next.map(|node| {
            self.next = node.next.as_deref();
            &node.extent
        })
    }
}

/// Advance past every node whose extent matches `skip`
///
/// Returns the link holding the first non-matching node, or the empty link at
/// the end of the chain.
fn seek<'l>(mut cursor: &'l mut Link, skip: impl Fn(&Extent) -> bool) -> Option<&'l mut Link> {
    while cursor.as_ref().map_or(false, |node| skip(&node.extent)) {
        cursor = &mut cursor.as_mut()?.next;
    }
    Some(cursor)
}

/// First-fit allocator over a singly-linked chain of free extents
#[derive(Debug)]
pub struct SinglyLinkedFreeList<'a> {
    device: &'a mut BlockDevice,
    head: Link,
    len: usize,
    samples: PerfSamples,
}

impl<'a> SinglyLinkedFreeList<'a> {
    pub const NAME: &'static str = "Singly-Linked List";

    /// Bind to `device`, building the chain with one latency-free scan
    pub fn new(device: &'a mut BlockDevice) -> Self {
        let runs = extent::free_runs(device.occupancy());
        let len = runs.len();

        // The scan is left to right, so every run is appended at the tail
        let mut head: Link = None;
        let mut tail = &mut head;
        for run in runs {
            tail = &mut tail
                .insert(Box::new(Node {
                    extent: run,
                    next: None,
                }))
                .next;
        }

        debug!(
            total_blocks = device.total_blocks(),
            extents = len,
            "built singly-linked free list"
        );

        SinglyLinkedFreeList {
            device,
            head,
            len,
            samples: PerfSamples::new(),
        }
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            next: self.head.as_deref(),
        }
    }

    /// Number of free extents in the chain
    pub fn extent_count(&self) -> usize {
        self.len
    }

    /// Verify ordering, coalescing and agreement with the device
    pub fn check_invariants(&self) -> Result<()> {
        let chain: Vec<Extent> = self.iter().copied().collect();
        if chain.len() != self.len {
            return Err(FreespaceError::ChainCorrupted(format!(
                "tracked length {} but chain holds {} extents",
                self.len,
                chain.len()
            )));
        }
        if !extent::is_coalesced(&chain) {
            return Err(FreespaceError::ChainCorrupted(
                "extents out of order, overlapping or adjacent".to_string(),
            ));
        }
        if chain != extent::free_runs(self.device.occupancy()) {
            return Err(FreespaceError::ChainCorrupted(
                "chain does not match device occupancy".to_string(),
            ));
        }
        Ok(())
    }

    /// Take `blocks` from the front of the first extent long enough
    fn take_first_fit(&mut self, blocks: usize) -> Option<Extent> {
        let cursor = seek(&mut self.head, |e| e.length < blocks)?;

        let mut node = cursor.take()?;
        let start = node.extent.start;
        if node.extent.length == blocks {
            *cursor = node.next.take();
            self.len -= 1;
        } else {
            node.extent.start += blocks;
            node.extent.length -= blocks;
            *cursor = Some(node);
        }

        Some(Extent::new(start, blocks))
    }

    /// Merge a freed range into the chain in a single walk
    ///
    /// Every extent the range touches or overlaps is folded into one entry.
    /// The first such entry is reused (a predecessor grows forward, a
    /// successor grows backwards); later ones are unlinked. With no neighbour
    /// a new entry is inserted in order. Returns the resulting free extent.
    fn coalesce(&mut self, freed: Extent) -> Option<Extent> {
        let cursor = seek(&mut self.head, |e| e.end() < freed.start)?;

        let mut merged = freed;
        let mut kept: Option<Box<Node>> = None;
        let mut absorbed = 0;
        let mut overlapped = false;
        while cursor
            .as_ref()
            .map_or(false, |node| node.extent.start <= merged.end())
        {
            let mut node = cursor.take()?;
            *cursor = node.next.take();
            overlapped |= node.extent.overlaps(&freed);
            merged = merged.span(&node.extent);
            if kept.is_none() {
                kept = Some(node);
            } else {
                absorbed += 1;
            }
        }

        let mut node = match kept {
            Some(node) => node,
            None => {
                self.len += 1;
                Box::new(Node {
                    extent: merged,
                    next: None,
                })
            }
        };
        node.extent = merged;
        node.next = cursor.take();
        *cursor = Some(node);

        self.len -= absorbed;
        if overlapped {
            warn!(freed = %freed, "released range overlaps free space");
        }
        if absorbed > 0 {
            debug!(merged = %merged, absorbed, "released range joined free extents");
        }
        Some(merged)
    }

    fn is_coalesced(&self) -> bool {
        let chain: Vec<Extent> = self.iter().copied().collect();
        extent::is_coalesced(&chain)
    }
}

impl FreeSpaceManager for SinglyLinkedFreeList<'_> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn allocate(&mut self, blocks: usize) -> Result<Option<Extent>> {
        let started = Instant::now();

        let allocated = if blocks == 0 {
            None
        } else {
            self.take_first_fit(blocks)
        };

        if let Some(extent) = allocated {
            for pos in extent.blocks() {
                self.device.write(pos, true)?;
            }
        }

        self.samples.record(Operation::Allocate, started);
        Ok(allocated)
    }

    fn release(&mut self, start: usize, length: usize) -> Result<bool> {
        if !release_in_range(self.device.total_blocks(), start, length) {
            return Ok(false);
        }

        let started = Instant::now();
        let freed = Extent::new(start, length);
        for pos in freed.blocks() {
            self.device.write(pos, false)?;
        }
        self.coalesce(freed);
        debug_assert!(self.is_coalesced(), "free list left with adjacent extents");

        self.samples.record(Operation::Release, started);
        Ok(true)
    }

    fn largest_free_run(&mut self) -> Result<Option<Extent>> {
        let started = Instant::now();

        let mut largest: Option<Extent> = None;
        for extent in self.iter() {
            if largest.map_or(true, |best| extent.length > best.length) {
                largest = Some(*extent);
            }
        }

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
        self.iter().copied().collect()
    }
}

impl Drop for SinglyLinkedFreeList<'_> {
    fn drop(&mut self) {
        // Unlink iteratively so long chains don't recurse through Box drops
        let mut link = self.head.take();
        while let Some(mut node) = link {
            link = node.next.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(list: &SinglyLinkedFreeList<'_>) -> Vec<(usize, usize)> {
        list.iter().map(|e| (e.start, e.length)).collect()
    }

    #[test]
    fn test_build_from_device() {
        let mut device = BlockDevice::from_pattern("0011000011100000").unwrap();
        let list = SinglyLinkedFreeList::new(&mut device);
        assert_eq!(chain(&list), vec![(0, 2), (4, 4), (11, 5)]);
        assert_eq!(list.extent_count(), 3);
        list.check_invariants().unwrap();
        assert_eq!(list.device().stats().total_accesses(), 0);
    }

    #[test]
    fn test_allocate_splits_front() {
        let mut device = BlockDevice::new(16);
        let mut list = SinglyLinkedFreeList::new(&mut device);

        assert_eq!(list.allocate(5).unwrap(), Some(Extent::new(0, 5)));
        assert_eq!(chain(&list), vec![(5, 11)]);
        assert_eq!(list.largest_free_run().unwrap(), Some(Extent::new(5, 11)));
        assert_eq!(list.device().stats().write_accesses, 5);
        assert_eq!(list.device().stats().read_accesses, 0);
        list.check_invariants().unwrap();
    }

    #[test]
    fn test_allocate_consumes_whole_extent() {
        let mut device = BlockDevice::from_pattern("1111000000111111").unwrap();
        let mut list = SinglyLinkedFreeList::new(&mut device);

        assert_eq!(chain(&list), vec![(4, 6)]);
        assert_eq!(list.allocate(6).unwrap(), Some(Extent::new(4, 6)));
        assert!(chain(&list).is_empty());
        assert_eq!(list.largest_free_run().unwrap(), None);
        list.check_invariants().unwrap();
    }

    #[test]
    fn test_allocate_unlinks_middle_entry() {
        let mut device = BlockDevice::from_pattern("0100011000100000").unwrap();
        let mut list = SinglyLinkedFreeList::new(&mut device);
        assert_eq!(chain(&list), vec![(0, 1), (2, 3), (7, 3), (11, 5)]);

        assert_eq!(list.allocate(3).unwrap(), Some(Extent::new(2, 3)));
        assert_eq!(chain(&list), vec![(0, 1), (7, 3), (11, 5)]);
        list.check_invariants().unwrap();
    }

    #[test]
    fn test_allocate_no_fit() {
        let mut device = BlockDevice::from_pattern("0010010010010010").unwrap();
        let mut list = SinglyLinkedFreeList::new(&mut device);
        let before = chain(&list);

        assert_eq!(list.allocate(3).unwrap(), None);
        assert_eq!(chain(&list), before);
        assert_eq!(list.device().stats().write_accesses, 0);
    }

    #[test]
    fn test_release_merges_both_neighbours() {
        let mut device = BlockDevice::from_pattern("0001100011111111").unwrap();
        let mut list = SinglyLinkedFreeList::new(&mut device);
        assert_eq!(chain(&list), vec![(0, 3), (5, 3)]);

        assert!(list.release(3, 2).unwrap());
        assert_eq!(chain(&list), vec![(0, 8)]);
        assert_eq!(list.extent_count(), 1);
        list.check_invariants().unwrap();
    }

    #[test]
    fn test_release_merges_predecessor_only() {
        let mut device = BlockDevice::from_pattern("0011110000111111").unwrap();
        let mut list = SinglyLinkedFreeList::new(&mut device);

        assert!(list.release(2, 2).unwrap());
        assert_eq!(chain(&list), vec![(0, 4), (6, 4)]);
        list.check_invariants().unwrap();
    }

    #[test]
    fn test_release_merges_successor_only() {
        let mut device = BlockDevice::from_pattern("0011110000111111").unwrap();
        let mut list = SinglyLinkedFreeList::new(&mut device);

        assert!(list.release(4, 2).unwrap());
        assert_eq!(chain(&list), vec![(0, 2), (4, 6)]);
        list.check_invariants().unwrap();
    }

    #[test]
    fn test_release_inserts_in_order() {
        let mut device = BlockDevice::from_pattern("1111111100111111").unwrap();
        let mut list = SinglyLinkedFreeList::new(&mut device);

        assert!(list.release(2, 2).unwrap()); // before head
        assert!(list.release(13, 2).unwrap()); // after tail
        assert!(list.release(5, 1).unwrap()); // middle
        assert_eq!(chain(&list), vec![(2, 2), (5, 1), (8, 2), (13, 2)]);
        list.check_invariants().unwrap();
    }

    #[test]
    fn test_release_into_empty_chain() {
        let mut device = BlockDevice::from_pattern("11111111").unwrap();
        let mut list = SinglyLinkedFreeList::new(&mut device);

        assert!(list.release(0, 8).unwrap());
        assert_eq!(chain(&list), vec![(0, 8)]);
    }

    #[test]
    fn test_release_out_of_range() {
        let mut device = BlockDevice::from_pattern("1111111111110000").unwrap();
        let mut list = SinglyLinkedFreeList::new(&mut device);

        assert!(!list.release(20, 2).unwrap());
        assert!(!list.release(14, 4).unwrap());
        assert_eq!(chain(&list), vec![(12, 4)]);
        assert_eq!(list.device().stats().write_accesses, 0);
    }

    #[test]
    fn test_release_overlapping_free_space_merges_union() {
        let mut device = BlockDevice::from_pattern("1111000011111111").unwrap();
        let mut list = SinglyLinkedFreeList::new(&mut device);

        assert!(list.release(2, 4).unwrap());
        assert_eq!(chain(&list), vec![(2, 6)]);
        assert_eq!(list.device().export_pattern(), "1100000011111111");
        assert_eq!(list.device().stats().write_accesses, 4);
        list.check_invariants().unwrap();
    }

    #[test]
    fn test_release_spanning_several_extents() {
        let mut device = BlockDevice::from_pattern("0011001100110011").unwrap();
        let mut list = SinglyLinkedFreeList::new(&mut device);
        assert_eq!(list.extent_count(), 4);

        assert!(list.release(1, 10).unwrap());
        assert_eq!(chain(&list), vec![(0, 11), (12, 2)]);
        assert_eq!(list.extent_count(), 2);
        list.check_invariants().unwrap();
    }

    #[test]
    fn test_release_inside_free_extent() {
        let mut device = BlockDevice::from_pattern("1111000011111111").unwrap();
        let mut list = SinglyLinkedFreeList::new(&mut device);

        assert!(list.release(5, 2).unwrap());
        assert_eq!(chain(&list), vec![(4, 4)]);
        assert_eq!(list.extent_count(), 1);
        list.check_invariants().unwrap();
    }

    #[test]
    fn test_release_timer_covers_merge() {
        let mut device = BlockDevice::from_pattern("1111000011111111").unwrap();
        let mut list = SinglyLinkedFreeList::new(&mut device);

        list.release(2, 4).unwrap();
        list.release(30, 1).unwrap();
        assert_eq!(list.stats().release.op_count, 1);
    }

    #[test]
    fn test_allocate_release_round_trip() {
        let mut device = BlockDevice::from_pattern("0100011000100000").unwrap();
        let mut list = SinglyLinkedFreeList::new(&mut device);
        let before = chain(&list);

        let extent = list.allocate(4).unwrap().unwrap();
        assert_eq!(extent, Extent::new(11, 4));
        assert!(list.release(extent.start, extent.length).unwrap());

        assert_eq!(chain(&list), before);
        assert_eq!(list.device().export_pattern(), "0100011000100000");
    }
}
