//! Walk through each strategy on a small device
//!
//! Run with: cargo run --example basic

use freespace_rs::{BlockDevice, StrategyKind};

fn main() -> freespace_rs::Result<()> {
    let pattern = "1100011100001111000000001110000011111111000011111100000000000011";

    for kind in StrategyKind::ALL {
        let mut device = BlockDevice::from_pattern(pattern)?;
        let mut strategy = kind.build(&mut device);

        println!("== {} ==", strategy.name());
        print!("{}", strategy.device().render_map(32));

        for size in [3, 8, 5] {
            match strategy.allocate(size)? {
                Some(extent) => println!("allocate({}) -> {}", size, extent),
                None => println!("allocate({}) -> no fit", size),
            }
        }

        strategy.release(16, 8)?;
        println!("released [16:23]");

        if let Some(largest) = strategy.largest_free_run()? {
            println!("largest free run: {}", largest);
        }

        let stats = strategy.device().stats();
        println!(
            "free extents: {}  reads: {}  writes: {}\n",
            strategy.free_extents().len(),
            stats.read_accesses,
            stats.write_accesses
        );
    }

    Ok(())
}
