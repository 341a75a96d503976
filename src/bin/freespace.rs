//! freespace CLI
//!
//! Seed occupancy patterns, inspect them, and compare the free-space
//! strategies against a simulated block device.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use freespace_rs::{compare, BlockDevice, SimConfig, StrategyKind};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "freespace")]
#[command(about = "Free-space management strategies on a simulated block device")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a random occupancy pattern
    Seed {
        /// Number of blocks
        #[arg(short = 'b', long, default_value = "1024")]
        blocks: usize,

        /// Fraction of blocks to occupy (0.0 - 1.0)
        #[arg(short = 'f', long, default_value = "0.7")]
        fill: f64,

        /// RNG seed for a reproducible pattern
        #[arg(long)]
        seed: Option<u64>,

        /// Output pattern file
        #[arg(short = 'o', long, default_value = "data/disk.txt")]
        out: PathBuf,
    },

    /// Print a device map, its statistics and its free extents
    Show {
        #[arg(short = 'p', long)]
        pattern: PathBuf,

        /// Blocks per map row
        #[arg(short = 'w', long, default_value = "64")]
        width: usize,
    },

    /// Run the randomized workload against each strategy
    Compare {
        /// TOML configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Pattern file (seeded from the configuration if it does not exist)
        #[arg(short = 'p', long)]
        pattern: Option<PathBuf>,

        /// Disable simulated device latency
        #[arg(long)]
        no_latency: bool,

        /// Save the report as JSON (defaults to the configured results file)
        #[arg(long, num_args = 0..=1)]
        json: Option<Option<PathBuf>>,

        /// Strategies to compare (bitmap, singly-linked, doubly-linked) [default: all]
        #[arg(short = 's', long = "strategy")]
        strategies: Vec<StrategyKind>,
    },

    /// Run allocations on one strategy and report the outcome
    Run {
        #[arg(short = 'p', long)]
        pattern: PathBuf,

        #[arg(short = 's', long, default_value = "doubly-linked")]
        strategy: StrategyKind,

        /// Block counts to allocate, in order
        #[arg(short = 'a', long, num_args = 1.., required = true)]
        allocate: Vec<usize>,
    },
}

fn load_device(path: &Path) -> Result<BlockDevice> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read pattern file {}", path.display()))?;
    let device = BlockDevice::from_pattern(content.trim_end())
        .with_context(|| format!("invalid pattern in {}", path.display()))?;
    Ok(device)
}

fn seed(blocks: usize, fill: f64, seed: Option<u64>, out: &Path) -> Result<()> {
    if blocks == 0 {
        bail!("--blocks must be positive");
    }

    let mut device = BlockDevice::new(blocks);
    match seed {
        Some(seed) => device.seed_random_with(fill, &mut StdRng::seed_from_u64(seed))?,
        None => device.seed_random(fill)?,
    }
    device.save_pattern(out)?;

    let stats = device.stats();
    info!(
        path = %out.display(),
        blocks,
        occupied = stats.occupied,
        "wrote occupancy pattern"
    );
    println!(
        "{} blocks, {} occupied ({:.1}%) -> {}",
        stats.total_blocks,
        stats.occupied,
        stats.occupancy_ratio() * 100.0,
        out.display()
    );
    Ok(())
}

fn show(pattern: &Path, width: usize) -> Result<()> {
    let mut device = load_device(pattern)?;
    print!("{}", device.render_map(width));

    let stats = device.stats();
    println!();
    println!(
        "{} blocks: {} occupied, {} free ({:.1}% occupied)",
        stats.total_blocks,
        stats.occupied,
        stats.free,
        stats.occupancy_ratio() * 100.0
    );

    let strategy = StrategyKind::SinglyLinked.build(&mut device);
    let extents = strategy.free_extents();
    println!("{} free extents:", extents.len());
    for extent in &extents {
        println!("  {}", extent);
    }
    Ok(())
}

fn run_compare(
    config_path: Option<&Path>,
    pattern_path: Option<&Path>,
    no_latency: bool,
    json: Option<Option<PathBuf>>,
    strategies: Vec<StrategyKind>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => SimConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SimConfig::default(),
    };
    if no_latency {
        config = config.without_latency();
    }

    let pattern_path = pattern_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.paths.pattern_file.clone());

    let device = if pattern_path.exists() {
        load_device(&pattern_path)?
    } else {
        info!(path = %pattern_path.display(), "pattern file missing, seeding a new one");
        let mut device = BlockDevice::new(config.device.blocks);
        match config.workload.seed {
            Some(seed) => device.seed_random_with(
                config.device.initial_fill,
                &mut StdRng::seed_from_u64(seed),
            )?,
            None => device.seed_random(config.device.initial_fill)?,
        }
        device.save_pattern(&pattern_path)?;
        device
    };

    let kinds = if strategies.is_empty() {
        StrategyKind::ALL.to_vec()
    } else {
        strategies
    };

    let report = compare(&config, &device.export_pattern(), &kinds)?;
    print!("{}", report.render_table());

    if let Some(target) = json {
        let path = target.unwrap_or_else(|| config.paths.results_file.clone());
        report.save_json(&path)?;
        println!("\nReport saved to {}", path.display());
    }
    Ok(())
}

fn run_allocations(pattern: &Path, kind: StrategyKind, sizes: &[usize]) -> Result<()> {
    let mut device = load_device(pattern)?;
    let mut strategy = kind.build(&mut device);

    println!("Strategy: {}", strategy.name());
    for &size in sizes {
        match strategy.allocate(size)? {
            Some(extent) => println!("  allocate({:>4}) -> {}", size, extent),
            None => println!("  allocate({:>4}) -> no fit", size),
        }
    }

    match strategy.largest_free_run()? {
        Some(extent) => println!("Largest free run: {}", extent),
        None => println!("Largest free run: none"),
    }

    let stats = strategy.device().stats();
    println!(
        "Device: {} reads, {} writes, {} free extents",
        stats.read_accesses,
        stats.write_accesses,
        strategy.free_extents().len()
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Seed {
            blocks,
            fill,
            seed: rng_seed,
            out,
        } => seed(blocks, fill, rng_seed, &out),
        Command::Show { pattern, width } => show(&pattern, width),
        Command::Compare {
            config,
            pattern,
            no_latency,
            json,
            strategies,
        } => run_compare(
            config.as_deref(),
            pattern.as_deref(),
            no_latency,
            json,
            strategies,
        ),
        Command::Run {
            pattern,
            strategy,
            allocate,
        } => run_allocations(&pattern, strategy, &allocate),
    }
}
