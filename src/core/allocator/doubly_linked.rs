//! Doubly-linked free-list strategy
//!
//! Same first-fit contract as the singly-linked list, but every free extent
//! record also knows its predecessor and the list tracks its tail.
//!
//! Records live in an arena and refer to each other through [`NodeId`]
//! handles rather than references. Unlinking a record therefore only touches
//! its two neighbours, whichever way the chain was reached:
//!
//! ```text
//! head -> [0:2] <-> [4:7] <-> [11:15] <- tail
//! ```
//!
//! Vacant arena slots are recycled by later insertions.

use crate::allocator::extent::{self, Extent};
use crate::allocator::stats::{Operation, PerfSamples, StrategyStats};
use crate::allocator::{release_in_range, FreeSpaceManager};
use crate::device::BlockDevice;
use crate::error::{FreespaceError, Result};
use std::ops::{Index, IndexMut};
use std::time::Instant;
use tracing::{debug, warn};

/// Stable handle to an extent record in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    extent: Extent,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Option<Node>>,
    vacant: Vec<usize>,
}

impl Arena {
    fn insert(&mut self, node: Node) -> NodeId {
        match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    fn remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.slots.get_mut(id.0)?.take()?;
        self.vacant.push(id.0);
        Some(node)
    }

    fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(id.0)?.as_ref()
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Index<NodeId> for Arena {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        self.slots[id.0]
            .as_ref()
            .expect("free-list handle points at a vacant slot")
    }
}

impl IndexMut<NodeId> for Arena {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        self.slots[id.0]
            .as_mut()
            .expect("free-list handle points at a vacant slot")
    }
}

/// Walks the chain by handle, front to back or back to front
pub struct Iter<'l> {
    nodes: &'l Arena,
    next: Option<NodeId>,
    forward: bool,
}

impl<'l> Iterator for Iter<'l> {
    type Item = &'l Extent;

    fn next(&mut self) -> Option<Self::Item> {
        let nodes = self.nodes;
        let node = &nodes[self.next?];
        self.next = if self.forward { node.next } else { node.prev };
        Some(&node.extent)
    }
}

/// First-fit allocator over a doubly-linked chain of free extents
#[derive(Debug)]
pub struct DoublyLinkedFreeList<'a> {
    device: &'a mut BlockDevice,
    nodes: Arena,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
    samples: PerfSamples,
}

impl<'a> DoublyLinkedFreeList<'a> {
    pub const NAME: &'static str = "Doubly-Linked List";

    /// Bind to `device`, building the chain with one latency-free scan
    pub fn new(device: &'a mut BlockDevice) -> Self {
        let runs = extent::free_runs(device.occupancy());
        let total_blocks = device.total_blocks();

        let mut list = DoublyLinkedFreeList {
            device,
            nodes: Arena::default(),
            head: None,
            tail: None,
            len: 0,
            samples: PerfSamples::new(),
        };
        for run in runs {
            list.push_back(run);
        }

        debug!(
            total_blocks,
            extents = list.len,
            "built doubly-linked free list"
        );
        list
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            nodes: &self.nodes,
            next: self.head,
            forward: true,
        }
    }

    /// Iterate from the tail back to the head
    pub fn iter_rev(&self) -> Iter<'_> {
        Iter {
            nodes: &self.nodes,
            next: self.tail,
            forward: false,
        }
    }

    /// Number of free extents in the chain
    pub fn extent_count(&self) -> usize {
        self.len
    }

    /// The extent the tail handle points at
    pub fn tail_extent(&self) -> Option<Extent> {
        self.tail.map(|id| self.nodes[id].extent)
    }

    fn push_back(&mut self, extent: Extent) -> NodeId {
        self.insert_after(self.tail, extent)
    }

    /// Link a new record right after `prev` (or at the head for `None`)
    fn insert_after(&mut self, prev: Option<NodeId>, extent: Extent) -> NodeId {
        let next = match prev {
            Some(p) => self.nodes[p].next,
            None => self.head,
        };
        let id = self.nodes.insert(Node { extent, prev, next });

        match prev {
            Some(p) => self.nodes[p].next = Some(id),
            None => self.head = Some(id),
        }
        match next {
            Some(n) => self.nodes[n].prev = Some(id),
            None => self.tail = Some(id),
        }

        self.len += 1;
        id
    }

    /// O(1) removal given only the handle
    fn unlink(&mut self, id: NodeId) -> Option<Extent> {
        let Node { extent, prev, next } = self.nodes.remove(id)?;

        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }

        self.len -= 1;
        Some(extent)
    }

    fn take_first_fit(&mut self, blocks: usize) -> Option<Extent> {
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let node = &mut self.nodes[id];
            if node.extent.length >= blocks {
                let start = node.extent.start;
                if node.extent.length == blocks {
                    self.unlink(id);
                } else {
                    node.extent.start += blocks;
                    node.extent.length -= blocks;
                }
                return Some(Extent::new(start, blocks));
            }
            cursor = node.next;
        }
        None
    }

    /// Merge a freed range into the chain
    ///
    /// Every extent the range touches or overlaps is folded into the first of
    /// them; the rest are unlinked in O(1) each. With no neighbour a new record
    /// is linked in order. Returns the resulting free extent.
    fn coalesce(&mut self, freed: Extent) -> Extent {
        // At or past the tail's start nothing can follow the range, so no walk is needed
        if let Some(tail) = self.tail {
            let last = self.nodes[tail].extent;
            if last.start <= freed.start {
                if last.end() < freed.start {
                    self.insert_after(Some(tail), freed);
                    return freed;
                }
                if last.overlaps(&freed) {
                    warn!(freed = %freed, free = %last, "released range overlaps free space");
                }
                let merged = last.span(&freed);
                self.nodes[tail].extent = merged;
                return merged;
            }
        }

        let mut before = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let node = &self.nodes[id];
            if node.extent.end() >= freed.start {
                break;
            }
            before = Some(id);
            cursor = node.next;
        }

        let mut merged = freed;
        let mut kept = None;
        let mut absorbed = 0;
        let mut overlapped = false;
        while let Some(id) = cursor {
            let node = &self.nodes[id];
            if node.extent.start > merged.end() {
                break;
            }
            overlapped |= node.extent.overlaps(&freed);
            merged = merged.span(&node.extent);
            cursor = node.next;
            if kept.is_none() {
                kept = Some(id);
            } else {
                self.unlink(id);
                absorbed += 1;
            }
        }

        match kept {
            Some(id) => self.nodes[id].extent = merged,
            None => {
                self.insert_after(before, merged);
            }
        }
        if overlapped {
            warn!(freed = %freed, "released range overlaps free space");
        }
        if absorbed > 0 {
            debug!(merged = %merged, absorbed, "released range joined free extents");
        }
        merged
    }

    /// Verify the bidirectional links
    ///
    /// Every successor must point back at its predecessor, the forward walk
    /// must end on the tracked tail, and the backward walk from the tail must
    /// visit the same records in reverse.
    pub fn check_links(&self) -> Result<()> {
        let limit = self.nodes.capacity();

        let mut forward = Vec::with_capacity(self.len);
        let mut prev: Option<NodeId> = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            if forward.len() > limit {
                return Err(FreespaceError::ChainCorrupted(
                    "cycle in forward links".to_string(),
                ));
            }
            let node = self.nodes.get(id).ok_or_else(|| {
                FreespaceError::ChainCorrupted(format!("dangling handle {:?}", id))
            })?;
            if node.prev != prev {
                return Err(FreespaceError::ChainCorrupted(format!(
                    "record {} has back link {:?}, expected {:?}",
                    node.extent, node.prev, prev
                )));
            }
            forward.push(id);
            prev = Some(id);
            cursor = node.next;
        }

        if prev != self.tail {
            return Err(FreespaceError::ChainCorrupted(format!(
                "forward walk ends at {:?} but tail is {:?}",
                prev, self.tail
            )));
        }
        if forward.len() != self.len {
            return Err(FreespaceError::ChainCorrupted(format!(
                "tracked length {} but chain holds {} extents",
                self.len,
                forward.len()
            )));
        }

        let mut backward = Vec::with_capacity(self.len);
        let mut cursor = self.tail;
        while let Some(id) = cursor {
            if backward.len() > limit {
                return Err(FreespaceError::ChainCorrupted(
                    "cycle in backward links".to_string(),
                ));
            }
            let node = self.nodes.get(id).ok_or_else(|| {
                FreespaceError::ChainCorrupted(format!("dangling handle {:?}", id))
            })?;
            backward.push(id);
            cursor = node.prev;
        }
        backward.reverse();

        if forward != backward {
            return Err(FreespaceError::ChainCorrupted(
                "backward walk differs from forward walk".to_string(),
            ));
        }
        Ok(())
    }

    /// Links, ordering, coalescing and agreement with the device
    pub fn check_invariants(&self) -> Result<()> {
        self.check_links()?;
        let chain: Vec<Extent> = self.iter().copied().collect();
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

    fn is_coalesced(&self) -> bool {
        let chain: Vec<Extent> = self.iter().copied().collect();
        extent::is_coalesced(&chain)
    }
}

impl FreeSpaceManager for DoublyLinkedFreeList<'_> {
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
