//! Randomized workload harness
//!
//! Runs the same allocate/release workload against each strategy, each time
//! on a fresh device restored from one occupancy pattern, and aggregates the
//! per-operation latencies and device access counts into a report.

use crate::allocator::{Extent, FreeSpaceManager, StrategyKind, StrategyStats};
use crate::config::SimConfig;
use crate::device::{BlockDevice, DeviceStats};
use crate::error::{FreespaceError, Result};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Shape of one workload run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub allocations: usize,
    /// Upper bound on releases; capped by the number of successful allocations
    pub releases: usize,
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        WorkloadSpec {
            allocations: 50,
            releases: 30,
            min_size: 1,
            max_size: 32,
        }
    }
}

/// Result of a single run against one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub stats: StrategyStats,
    pub device: DeviceStats,
    pub successful_allocations: usize,
    pub failed_allocations: usize,
    pub released: usize,
    pub largest_free_run: Option<Extent>,
}

/// Run `spec` against `strategy`
///
/// Sizes are drawn uniformly from `min_size..=max_size`. After all allocations
/// a random subset of the successful ones is released, highest index first,
/// and the largest free run is queried once.
pub fn run_workload<R: Rng + ?Sized>(
    strategy: &mut dyn FreeSpaceManager,
    spec: &WorkloadSpec,
    rng: &mut R,
) -> Result<RunOutcome> {
    if spec.min_size == 0 || spec.min_size > spec.max_size {
        return Err(FreespaceError::InvalidConfig(format!(
            "workload sizes must satisfy 1 <= min_size <= max_size, got {}..={}",
            spec.min_size, spec.max_size
        )));
    }
    strategy.reset_stats();

    let mut allocated: Vec<Extent> = Vec::with_capacity(spec.allocations);
    let mut failed = 0;
    for _ in 0..spec.allocations {
        let size = rng.gen_range(spec.min_size..=spec.max_size);
        match strategy.allocate(size)? {
            Some(extent) => allocated.push(extent),
            None => failed += 1,
        }
    }

    let to_release = spec.releases.min(allocated.len());
    let mut picked = index::sample(rng, allocated.len(), to_release).into_vec();
    picked.sort_unstable_by(|a, b| b.cmp(a));

    let mut released = 0;
    for i in picked {
        let extent = allocated[i];
        if strategy.release(extent.start, extent.length)? {
            released += 1;
        }
    }

    let largest_free_run = strategy.largest_free_run()?;

    debug!(
        strategy = strategy.name(),
        allocated = allocated.len(),
        failed,
        released,
        "workload run finished"
    );

    Ok(RunOutcome {
        stats: strategy.stats(),
        device: strategy.device().stats(),
        successful_allocations: allocated.len(),
        failed_allocations: failed,
        released,
        largest_free_run,
    })
}

/// Averages over all runs of one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySummary {
    pub strategy: StrategyKind,
    pub name: String,
    pub runs: usize,
    pub avg_allocate_ms: f64,
    pub avg_release_ms: f64,
    pub avg_largest_free_run_ms: f64,
    pub avg_read_accesses: f64,
    pub avg_write_accesses: f64,
    pub avg_successful_allocations: f64,
    /// Free extents left on the device after the last run
    pub final_free_extents: usize,
    pub final_largest_free_run: Option<Extent>,
}

impl StrategySummary {
    pub fn avg_total_accesses(&self) -> f64 {
        self.avg_read_accesses + self.avg_write_accesses
    }

    fn from_outcomes(kind: StrategyKind, outcomes: &[RunOutcome], final_free_extents: usize) -> Self {
        let mean = |f: fn(&RunOutcome) -> f64| -> f64 {
            if outcomes.is_empty() {
                0.0
            } else {
                outcomes.iter().map(f).sum::<f64>() / outcomes.len() as f64
            }
        };

        StrategySummary {
            strategy: kind,
            name: kind.name().to_string(),
            runs: outcomes.len(),
            avg_allocate_ms: mean(|o| o.stats.allocate.avg_millis()),
            avg_release_ms: mean(|o| o.stats.release.avg_millis()),
            avg_largest_free_run_ms: mean(|o| o.stats.largest_free_run.avg_millis()),
            avg_read_accesses: mean(|o| o.device.read_accesses as f64),
            avg_write_accesses: mean(|o| o.device.write_accesses as f64),
            avg_successful_allocations: mean(|o| o.successful_allocations as f64),
            final_free_extents,
            final_largest_free_run: outcomes.last().and_then(|o| o.largest_free_run),
        }
    }
}

/// Side-by-side results for every compared strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// RFC 3339 timestamp
    pub generated_at: String,
    pub seed: u64,
    pub total_blocks: usize,
    pub initial_occupied: usize,
    pub latency_simulated: bool,
    pub workload: WorkloadSpec,
    pub results: Vec<StrategySummary>,
}

impl ComparisonReport {
    pub fn summary(&self, kind: StrategyKind) -> Option<&StrategySummary> {
        self.results.iter().find(|s| s.strategy == kind)
    }

    /// Plain-text table, one row per strategy
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Device: {} blocks, {} occupied ({:.1}%), latency {}",
            self.total_blocks,
            self.initial_occupied,
            if self.total_blocks == 0 {
                0.0
            } else {
                100.0 * self.initial_occupied as f64 / self.total_blocks as f64
            },
            if self.latency_simulated { "on" } else { "off" }
        );
        let _ = writeln!(
            out,
            "Workload: {} allocations of {}..={} blocks, up to {} releases (seed {})",
            self.workload.allocations,
            self.workload.min_size,
            self.workload.max_size,
            self.workload.releases,
            self.seed
        );
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:<20} {:>5} {:>12} {:>12} {:>12} {:>10} {:>10} {:>8}",
            "Strategy", "Runs", "Alloc ms", "Release ms", "Largest ms", "Reads", "Writes", "Allocs"
        );
        let _ = writeln!(out, "{}", "-".repeat(95));
        for s in &self.results {
            let _ = writeln!(
                out,
                "{:<20} {:>5} {:>12.4} {:>12.4} {:>12.4} {:>10.1} {:>10.1} {:>8.1}",
                s.name,
                s.runs,
                s.avg_allocate_ms,
                s.avg_release_ms,
                s.avg_largest_free_run_ms,
                s.avg_read_accesses,
                s.avg_write_accesses,
                s.avg_successful_allocations
            );
        }
        out
    }

    /// Write the report as pretty JSON, creating parent directories
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "saved comparison report");
        Ok(())
    }
}

/// Seed for the `run`-th repetition; shared by every strategy
fn run_seed(base: u64, run: usize) -> u64 {
    base.wrapping_add(run as u64)
}

/// Run the configured workload against each of `kinds`
///
/// Every run restores `pattern` into a fresh device, so all strategies start
/// from the same occupancy and, run for run, see the same request sequence.
pub fn compare(config: &SimConfig, pattern: &str, kinds: &[StrategyKind]) -> Result<ComparisonReport> {
    config.validate()?;

    let initial = BlockDevice::from_pattern(pattern)?;
    let total_blocks = initial.total_blocks();
    let initial_occupied = initial.occupied_count();
    let spec = config.workload();
    let seed = config.workload.seed.unwrap_or_else(rand::random);

    info!(
        total_blocks,
        initial_occupied,
        seed,
        strategies = kinds.len(),
        "starting strategy comparison"
    );

    let mut results = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        let runs = match kind {
            StrategyKind::Bitmap => config.workload.bitmap_runs,
            _ => config.workload.runs,
        };

        let mut outcomes = Vec::with_capacity(runs);
        let mut final_free_extents = 0;
        for run in 0..runs {
            let mut device = BlockDevice::from_pattern(pattern)?;
            device.set_latency(config.latency());

            let mut rng = StdRng::seed_from_u64(run_seed(seed, run));
            let mut strategy = kind.build(&mut device);
            let outcome = run_workload(strategy.as_mut(), &spec, &mut rng)?;
            final_free_extents = strategy.free_extents().len();

            info!(
                strategy = kind.name(),
                run = run + 1,
                of = runs,
                allocate_ms = outcome.stats.allocate.avg_millis(),
                release_ms = outcome.stats.release.avg_millis(),
                accesses = outcome.device.total_accesses(),
                "run complete"
            );
            outcomes.push(outcome);
        }

        results.push(StrategySummary::from_outcomes(kind, &outcomes, final_free_extents));
    }

    Ok(ComparisonReport {
        generated_at: chrono::Utc::now().to_rfc3339(),
        seed,
        total_blocks,
        initial_occupied,
        latency_simulated: config.device.simulate_latency,
        workload: spec,
        results,
    })
}
