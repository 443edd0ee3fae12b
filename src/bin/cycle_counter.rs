//! Cycle counter host program.
//!
//! Runs the self-timed `cycle_counter` kernel and reports the cycle count
//! the device expected against what it measured.

use std::env;
use std::fs::File;
use std::process;

use anyhow::Context;
use memmap2::Mmap;

use fpga_bench::bench::{run_cycle_counter, ExperimentDescriptor};
use fpga_bench::device::{DeviceSession, EmulatedDevice};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() == 1 {
        println!("usage: cycle_counter <image> <datanum>");
        return Ok(());
    }
    if args.len() != 3 {
        eprintln!("Error! The number of arguments is wrong.");
        process::exit(1);
    }

    let datanum: usize = args[2].parse().context("datanum must be an integer")?;

    let file = File::open(&args[1]).with_context(|| format!("opening image {}", args[1]))?;
    let image = unsafe { Mmap::map(&file) }.context("mapping image")?;
    println!("Using image: {}", args[1]);

    let device = EmulatedDevice::new("emu0");
    let mut session = DeviceSession::open(Box::new(device), &image)?;

    let desc = ExperimentDescriptor::cycle_counter(datanum);
    let report = run_cycle_counter(&mut session, &desc)?;

    println!();
    if report.passed() {
        println!("expected_cycles: {}", report.expected_cycles);
        println!("measured_cycles: {}", report.measured_cycles);
        println!("time : {} sec.", report.profiled_seconds);
    } else {
        println!("Error! Evaluation failed...");
    }

    Ok(())
}
