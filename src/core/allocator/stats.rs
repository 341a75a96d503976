//! Operation latency samples kept by each strategy

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Which strategy operation a sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Allocate,
    Release,
    LargestFreeRun,
}

/// Elapsed-time samples per operation kind
#[derive(Debug, Clone, Default)]
pub struct PerfSamples {
    allocate: Vec<Duration>,
    release: Vec<Duration>,
    largest_free_run: Vec<Duration>,
}

impl PerfSamples {
    pub fn new() -> Self {
        PerfSamples::default()
    }

    /// Record the time elapsed since `started` for `op`
    pub fn record(&mut self, op: Operation, started: Instant) {
        self.samples_mut(op).push(started.elapsed());
    }

    pub fn samples(&self, op: Operation) -> &[Duration] {
        match op {
            Operation::Allocate => &self.allocate,
            Operation::Release => &self.release,
            Operation::LargestFreeRun => &self.largest_free_run,
        }
    }

    fn samples_mut(&mut self, op: Operation) -> &mut Vec<Duration> {
        match op {
            Operation::Allocate => &mut self.allocate,
            Operation::Release => &mut self.release,
            Operation::LargestFreeRun => &mut self.largest_free_run,
        }
    }

    pub fn summary(&self, op: Operation) -> OpStats {
        OpStats::from_samples(self.samples(op))
    }

    pub fn clear(&mut self) {
        self.allocate.clear();
        self.release.clear();
        self.largest_free_run.clear();
    }
}

/// Count and mean latency for one operation kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpStats {
    pub op_count: usize,
    pub avg_latency: Duration,
}

impl OpStats {
    pub fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return OpStats::default();
        }
        let total: Duration = samples.iter().sum();
        OpStats {
            op_count: samples.len(),
            avg_latency: total / samples.len() as u32,
        }
    }

    pub fn avg_millis(&self) -> f64 {
        self.avg_latency.as_secs_f64() * 1000.0
    }
}

/// Statistics snapshot for one strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub name: String,
    pub allocate: OpStats,
    pub release: OpStats,
    pub largest_free_run: OpStats,
}

impl StrategyStats {
    pub fn from_samples(name: &str, samples: &PerfSamples) -> Self {
        StrategyStats {
            name: name.to_string(),
            allocate: samples.summary(Operation::Allocate),
            release: samples.summary(Operation::Release),
            largest_free_run: samples.summary(Operation::LargestFreeRun),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_summary() {
        let samples = PerfSamples::new();
        let stats = samples.summary(Operation::Allocate);
        assert_eq!(stats.op_count, 0);
        assert_eq!(stats.avg_latency, Duration::ZERO);
    }

    #[test]
    fn test_average() {
        let stats = OpStats::from_samples(&[
            Duration::from_millis(2),
            Duration::from_millis(4),
            Duration::from_millis(6),
        ]);
        assert_eq!(stats.op_count, 3);
        assert_eq!(stats.avg_latency, Duration::from_millis(4));
        assert!((stats.avg_millis() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_record_and_clear() {
        let mut samples = PerfSamples::new();
        samples.record(Operation::Release, Instant::now());
        samples.record(Operation::Release, Instant::now());
        samples.record(Operation::LargestFreeRun, Instant::now());

        assert_eq!(samples.samples(Operation::Release).len(), 2);
        assert_eq!(samples.summary(Operation::LargestFreeRun).op_count, 1);
        assert_eq!(samples.summary(Operation::Allocate).op_count, 0);

        samples.clear();
        assert!(samples.samples(Operation::Release).is_empty());
    }
}
