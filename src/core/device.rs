//! Simulated block device
//!
//! Holds one occupancy flag per block and charges a simulated latency on every
//! observation or mutation made through [`BlockDevice::read`] and
//! [`BlockDevice::write`]. The `*_fast` variants skip both the latency and the
//! access counters; they exist for bookkeeping that must not show up as device
//! I/O (building a free-extent chain, verification, rendering).

use crate::error::{FreespaceError, Result};
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Pattern character for an occupied block
pub const OCCUPIED_MARKER: char = '1';

/// Pattern character for a free block
pub const FREE_MARKER: char = '0';

/// Kind of charged device access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoKind {
    Read,
    Write,
}

/// Delay model invoked on every charged access
///
/// Implementations block the caller for as long as the simulated access takes.
/// There is no cancellation: callers always wait for the full delay.
pub trait Latency {
    fn charge(&self, kind: IoKind);
}

impl<L: Latency + ?Sized> Latency for Box<L> {
    fn charge(&self, kind: IoKind) {
        (**self).charge(kind)
    }
}

/// Latency model that never waits (tests, fast benchmarks)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLatency;

impl Latency for NoLatency {
    fn charge(&self, _kind: IoKind) {}
}

/// Latency model that sleeps the current thread, like a mechanical disk head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepLatency {
    pub read: Duration,
    pub write: Duration,
}

impl SleepLatency {
    pub fn new(read: Duration, write: Duration) -> Self {
        SleepLatency { read, write }
    }

    pub fn from_millis(read_ms: u64, write_ms: u64) -> Self {
        SleepLatency::new(
            Duration::from_millis(read_ms),
            Duration::from_millis(write_ms),
        )
    }
}

impl Latency for SleepLatency {
    fn charge(&self, kind: IoKind) {
        let delay = match kind {
            IoKind::Read => self.read,
            IoKind::Write => self.write,
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

/// Snapshot of device occupancy and access counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub total_blocks: usize,
    pub occupied: usize,
    pub free: usize,
    pub read_accesses: u64,
    pub write_accesses: u64,
}

impl DeviceStats {
    pub fn total_accesses(&self) -> u64 {
        self.read_accesses + self.write_accesses
    }

    /// Fraction of blocks currently occupied (0.0 for a zero-sized device)
    pub fn occupancy_ratio(&self) -> f64 {
        if self.total_blocks == 0 {
            return 0.0;
        }
        self.occupied as f64 / self.total_blocks as f64
    }
}

/// Fixed-size array of blocks with simulated access latency
pub struct BlockDevice {
    /// `true` = occupied
    blocks: Vec<bool>,

    read_accesses: u64,
    write_accesses: u64,

    latency: Box<dyn Latency>,
}

impl BlockDevice {
    /// Create a device with every block free and no simulated latency
    pub fn new(total_blocks: usize) -> Self {
        BlockDevice::with_latency(total_blocks, NoLatency)
    }

    /// Create a device with every block free and the given latency model
    pub fn with_latency(total_blocks: usize, latency: impl Latency + 'static) -> Self {
        debug!(total_blocks, "creating block device");
        BlockDevice {
            blocks: vec![false; total_blocks],
            read_accesses: 0,
            write_accesses: 0,
            latency: Box::new(latency),
        }
    }

    /// Create a latency-free device whose size and occupancy come from a pattern
    pub fn from_pattern(pattern: &str) -> Result<Self> {
        let mut device = BlockDevice::new(pattern.chars().count());
        device.import_pattern(pattern)?;
        Ok(device)
    }

    /// Replace the latency model
    pub fn set_latency(&mut self, latency: impl Latency + 'static) {
        self.latency = Box::new(latency);
    }

    pub fn total_blocks(&self) -> usize {
        self.blocks.len()
    }

    fn check_range(&self, pos: usize) -> Result<()> {
        if pos >= self.blocks.len() {
            return Err(FreespaceError::OutOfRange {
                pos,
                total: self.blocks.len(),
            });
        }
        Ok(())
    }

    /// Read a block's occupancy, paying read latency
    pub fn read(&mut self, pos: usize) -> Result<bool> {
        self.check_range(pos)?;
        self.latency.charge(IoKind::Read);
        self.read_accesses += 1;
        trace!(pos, occupied = self.blocks[pos], "read block");
        Ok(self.blocks[pos])
    }

    /// Set a block's occupancy, paying write latency
    pub fn write(&mut self, pos: usize, occupied: bool) -> Result<()> {
        self.check_range(pos)?;
        self.latency.charge(IoKind::Write);
        self.write_accesses += 1;
        trace!(pos, occupied, "write block");
        self.blocks[pos] = occupied;
        Ok(())
    }

    /// Read without latency or accounting
    pub fn read_fast(&self, pos: usize) -> Result<bool> {
        self.check_range(pos)?;
        Ok(self.blocks[pos])
    }

    /// Write without latency or accounting
    pub fn write_fast(&mut self, pos: usize, occupied: bool) -> Result<()> {
        self.check_range(pos)?;
        self.blocks[pos] = occupied;
        Ok(())
    }

    /// Every block's occupancy in index order, without latency or accounting
    pub fn occupancy(&self) -> impl Iterator<Item = bool> + '_ {
        self.blocks.iter().copied()
    }

    /// Occupy `round(N * fraction)` uniformly random blocks, freeing the rest
    pub fn seed_random(&mut self, fraction: f64) -> Result<()> {
        self.seed_random_with(fraction, &mut rand::thread_rng())
    }

    /// Like [`seed_random`](Self::seed_random) with a caller-supplied RNG
    pub fn seed_random_with<R: Rng + ?Sized>(&mut self, fraction: f64, rng: &mut R) -> Result<()> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(FreespaceError::InvalidFraction(fraction));
        }

        let total = self.blocks.len();
        let to_occupy = ((total as f64) * fraction).round() as usize;

        self.blocks.iter_mut().for_each(|block| *block = false);
        for pos in index::sample(rng, total, to_occupy.min(total)) {
            self.blocks[pos] = true;
        }

        debug!(
            total_blocks = total,
            occupied = to_occupy,
            fraction,
            "seeded device with random occupancy"
        );
        Ok(())
    }

    /// Encode occupancy as one marker character per block
    pub fn export_pattern(&self) -> String {
        self.blocks
            .iter()
            .map(|&occupied| if occupied { OCCUPIED_MARKER } else { FREE_MARKER })
            .collect()
    }

    /// Restore occupancy from a pattern and reset the access counters
    ///
    /// # Errors
    ///
    /// Returns `Format` if the pattern length differs from the block count or
    /// contains anything other than the two markers. The device is untouched
    /// on error.
    pub fn import_pattern(&mut self, pattern: &str) -> Result<()> {
        let len = pattern.chars().count();
        if len != self.blocks.len() {
            return Err(FreespaceError::Format(format!(
                "expected {} characters, found {}",
                self.blocks.len(),
                len
            )));
        }

        let mut decoded = Vec::with_capacity(len);
        for (pos, c) in pattern.chars().enumerate() {
            match c {
                OCCUPIED_MARKER => decoded.push(true),
                FREE_MARKER => decoded.push(false),
                other => {
                    return Err(FreespaceError::Format(format!(
                        "invalid marker {:?} at position {}",
                        other, pos
                    )))
                }
            }
        }

        self.blocks = decoded;
        self.reset_counters();
        Ok(())
    }

    /// Write the occupancy pattern to a text file, creating parent directories
    pub fn save_pattern<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.export_pattern())?;
        debug!(path = %path.display(), "saved device pattern");
        Ok(())
    }

    /// Load an occupancy pattern from a text file (trailing whitespace ignored)
    pub fn load_pattern<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        self.import_pattern(content.trim_end())?;
        debug!(path = %path.display(), "loaded device pattern");
        Ok(())
    }

    pub fn occupied_count(&self) -> usize {
        self.blocks.iter().filter(|&&occupied| occupied).count()
    }

    pub fn stats(&self) -> DeviceStats {
        let occupied = self.occupied_count();
        DeviceStats {
            total_blocks: self.blocks.len(),
            occupied,
            free: self.blocks.len() - occupied,
            read_accesses: self.read_accesses,
            write_accesses: self.write_accesses,
        }
    }

    pub fn reset_counters(&mut self) {
        self.read_accesses = 0;
        self.write_accesses = 0;
    }

    /// Render the device as rows of `#` (occupied) and `.` (free)
    pub fn render_map(&self, blocks_per_line: usize) -> String {
        let width = blocks_per_line.max(1);
        let mut out = String::new();
        for (row, chunk) in self.blocks.chunks(width).enumerate() {
            let line: String = chunk
                .iter()
                .map(|&occupied| if occupied { '#' } else { '.' })
                .collect();
            out.push_str(&format!("{:5}: {}\n", row * width, line));
        }
        out
    }
}

impl fmt::Debug for BlockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDevice")
            .field("total_blocks", &self.blocks.len())
            .field("occupied", &self.occupied_count())
            .field("read_accesses", &self.read_accesses)
            .field("write_accesses", &self.write_accesses)
            .finish()
    }
}
