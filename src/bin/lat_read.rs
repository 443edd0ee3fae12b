//! Memory read latency host program.
//!
//! Drives the `latency_read` kernel with randomized, burst-aligned
//! addresses and reports the average access latency in cycles and
//! nanoseconds.

use std::env;
use std::fs::File;
use std::process;

use anyhow::Context;
use memmap2::Mmap;

use fpga_bench::bench::{run_latency_read, AccessPatternGenerator, ExperimentDescriptor};
use fpga_bench::device::{DeviceSession, EmulatedDevice};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() == 1 {
        println!("usage: lat_read <image> <datanum> <try_num> <frequency_mhz>");
        return Ok(());
    }
    if args.len() != 5 {
        eprintln!("Error! The number of arguments is wrong.");
        process::exit(1);
    }

    let datanum: usize = args[2].parse().context("datanum must be an integer")?;
    let try_num: usize = args[3].parse().context("try_num must be an integer")?;
    let frequency: f64 = args[4].parse().context("frequency must be a number")?;

    let file = File::open(&args[1]).with_context(|| format!("opening image {}", args[1]))?;
    let image = unsafe { Mmap::map(&file) }.context("mapping image")?;
    println!("Using image: {}", args[1]);

    let device = EmulatedDevice::new("emu0");
    let mut session = DeviceSession::open(Box::new(device), &image)?;

    let desc = ExperimentDescriptor::latency_read(datanum, try_num, frequency);
    let mut pattern = AccessPatternGenerator::from_entropy();
    let report = run_latency_read(&mut session, &desc, &mut pattern)?;

    println!();
    if let (Some(m), Some(ns)) = (&report.measurement, report.avg_ns_per_access) {
        println!("{}", "-".repeat(30));
        println!("Avg. cycles: {} ({} nsec)", m.avg_cycles, ns);
        println!("time : {} sec.", report.profiled_seconds);
    } else {
        println!("Error! Evaluation failed...");
        if let Some(index) = report.zero_sample {
            println!("Trial {} recorded no measurement.", index);
        }
    }

    Ok(())
}
