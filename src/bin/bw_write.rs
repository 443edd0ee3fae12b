//! Memory write bandwidth host program.
//!
//! Runs the `bandwidth_write` kernel once, verifies the copied data on the
//! host, and reports write bandwidth from the profiled kernel time.

use std::env;
use std::fs::File;
use std::process;

use anyhow::Context;
use memmap2::Mmap;

use fpga_bench::bench::{run_bandwidth_write, ExperimentDescriptor};
use fpga_bench::device::{DeviceSession, EmulatedDevice};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() == 1 {
        println!("usage: bw_write <image> <datanum>");
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

    let desc = ExperimentDescriptor::bandwidth_write(datanum);
    let report = run_bandwidth_write(&mut session, &desc)?;

    println!();
    if let Some(m) = report.verification.first_mismatch {
        println!("Failed verification!!!");
        println!("Y[{}]: {}, expected: {}", m.index, m.actual, m.expected);
    }
    println!(
        "Verification: {}",
        if report.verification.pass { "PASS" } else { "FAIL" }
    );
    if let Some(m) = &report.measurement {
        println!(
            "Memory write bandwidth: {} GB/s ({} sec)",
            m.throughput_gb_per_sec(),
            m.elapsed_seconds
        );
    }

    Ok(())
}
