//! Two-participant relay host program.
//!
//! Spawns both participants on linked emulated devices connected by an
//! in-process transport: rank 0 stages a payload and runs the `send`
//! kernel, rank 1 runs the `recv` kernel and returns what arrived, and
//! rank 0 verifies the round trip lane by lane.

use std::env;
use std::fs::File;
use std::process;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use memmap2::Mmap;

use fpga_bench::device::{DeviceSession, EmulatedDevice};
use fpga_bench::relay::{LocalTransport, RelayCoordinator, RelayPayload, RelayReport};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() == 1 {
        println!("usage: relay <image> [lane_width]");
        return Ok(());
    }
    if args.len() > 3 {
        eprintln!("Error! The number of arguments is wrong.");
        process::exit(1);
    }

    let width: usize = match args.get(2) {
        Some(raw) => raw.parse().context("lane_width must be an integer")?,
        None => RelayPayload::WIDE,
    };

    let file = File::open(&args[1]).with_context(|| format!("opening image {}", args[1]))?;
    let image = Arc::new(unsafe { Mmap::map(&file) }.context("mapping image")?);
    println!("Using image: {}", args[1]);

    let mut dev0 = EmulatedDevice::new("emu0");
    let mut dev1 = EmulatedDevice::new("emu1");
    EmulatedDevice::link_pair(&mut dev0, &mut dev1);
    let (transport0, transport1) = LocalTransport::pair();

    let image0 = Arc::clone(&image);
    let sender = thread::spawn(move || participant(dev0, transport0, image0, width));
    let receiver = thread::spawn(move || participant(dev1, transport1, image, width));

    let report0 = sender
        .join()
        .expect("sender participant panicked")
        .context("sender participant failed")?;
    let report1 = receiver
        .join()
        .expect("receiver participant panicked")
        .context("receiver participant failed")?;

    println!();
    println!("rank {} ran as {:?}", report0.rank, report0.role);
    println!("rank {} ran as {:?}", report1.rank, report1.role);

    match report0.verification {
        Some(v) if v.pass => println!("Verification: PASS"),
        Some(v) => {
            for lane in &v.mismatched_lanes {
                println!("ERROR at {}", lane);
            }
            println!("Verification: FAIL");
        }
        None => println!("Verification: (no originator report)"),
    }

    Ok(())
}

fn participant(
    device: EmulatedDevice,
    transport: LocalTransport,
    image: Arc<Mmap>,
    width: usize,
) -> anyhow::Result<RelayReport> {
    let mut session = DeviceSession::open(Box::new(device), &image)?;
    let mut coordinator = RelayCoordinator::new(transport, width);
    let report = coordinator.run(&mut session)?;
    Ok(report)
}
