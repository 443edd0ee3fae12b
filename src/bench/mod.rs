//! Benchmark layer: experiment descriptors, the execution pipeline, and the
//! per-variant drivers.
//!
//! An experiment is one configuration of the device (buffers, kernel,
//! arguments) plus one or more trials of the write → execute → read chain.
//! The device does all timing itself; the host stages data, enforces
//! ordering through completion signals, accumulates the per-trial cycle
//! counts, and reduces them into derived quantities.
//!
//! # Example
//!
//! ```no_run
//! use fpga_bench::bench::{run_bandwidth_read, ExperimentDescriptor};
//! use fpga_bench::device::{DeviceSession, EmulatedDevice};
//!
//! let device = EmulatedDevice::new("emu0");
//! let mut session = DeviceSession::open(Box::new(device), b"image").unwrap();
//! let desc = ExperimentDescriptor::bandwidth_read(1 << 20, 100, 200.0);
//! let report = run_bandwidth_read(&mut session, &desc).unwrap();
//! println!("avg cycles: {:?}", report.measurement);
//! ```

pub mod descriptor;
pub mod pattern;
pub mod pipeline;
pub mod runner;
pub mod samples;
pub mod stats;

pub use descriptor::{ExperimentDescriptor, ExperimentKind, InputShape};
pub use pattern::AccessPatternGenerator;
pub use pipeline::ExecutionPipeline;
pub use runner::{
    run_bandwidth_read, run_bandwidth_write, run_cycle_counter, run_latency_read,
    BandwidthReadReport, BandwidthWriteReport, CycleCounterReport, LatencyReport, Mismatch,
    RunError, Verification,
};
pub use samples::SampleSet;
pub use stats::{reduce, Measurement, ReduceError};
