//! Experiment drivers.
//!
//! One driver per experiment variant, all built on the same
//! [`ExecutionPipeline`]. The drivers own buffer setup, input data, the
//! per-trial chains, verification, and reduction; the variant differences
//! are confined to what gets staged and what gets read back.
//!
//! Device errors abort the run immediately: a failed stage leaves the
//! downstream stages without a valid wait condition, so there is nothing
//! meaningful left to measure. Verification failures do not abort; they
//! mark the run failed and are reported.

use thiserror::Error;

use crate::device::{
    BufferAccess, DeviceError, DeviceSession, KernelArg, MemoryChannel, TransferMode,
};

use super::descriptor::{ExperimentDescriptor, ExperimentKind};
use super::pattern::AccessPatternGenerator;
use super::pipeline::ExecutionPipeline;
use super::samples::SampleSet;
use super::stats::{reduce, Measurement, ReduceError};

/// Why a driver could not run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The accelerator runtime failed; fatal for the run.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A descriptor of the wrong variant was handed to a driver.
    #[error("descriptor kind does not match driver (expected {expected})")]
    DescriptorMismatch { expected: &'static str },

    /// The descriptor's parameters cannot produce a runnable experiment.
    #[error("invalid descriptor: {reason}")]
    InvalidDescriptor { reason: &'static str },
}

/// The first host-side comparison failure of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Element index of the first mismatch.
    pub index: usize,
    /// What the host staged.
    pub expected: i32,
    /// What the device returned.
    pub actual: i32,
}

/// Host-side verification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    /// Whether every element matched.
    pub pass: bool,
    /// The first mismatch, on failure.
    pub first_mismatch: Option<Mismatch>,
}

impl Verification {
    /// Compare staged input against read-back output, element by element.
    pub fn compare(expected: &[i32], actual: &[i32]) -> Self {
        if expected.len() != actual.len() {
            // A short read-back counts as a mismatch at the first missing index.
            let index = expected.len().min(actual.len());
            return Self {
                pass: false,
                first_mismatch: Some(Mismatch {
                    index,
                    expected: expected.get(index).copied().unwrap_or(0),
                    actual: actual.get(index).copied().unwrap_or(0),
                }),
            };
        }
        for (index, (&e, &a)) in expected.iter().zip(actual.iter()).enumerate() {
            if e != a {
                return Self {
                    pass: false,
                    first_mismatch: Some(Mismatch {
                        index,
                        expected: e,
                        actual: a,
                    }),
                };
            }
        }
        Self {
            pass: true,
            first_mismatch: None,
        }
    }
}

fn split_reduce(result: Result<Measurement, ReduceError>) -> (Option<Measurement>, Option<usize>) {
    match result {
        Ok(m) => (Some(m), None),
        Err(ReduceError::ZeroSample { index }) => (None, Some(index)),
        Err(ReduceError::Empty) => (None, None),
    }
}

/// Outcome of a bandwidth-read run.
#[derive(Debug, Clone)]
pub struct BandwidthReadReport {
    /// Per-trial cycle counts as the device reported them.
    pub samples: SampleSet,
    /// Reduced quantities; `None` when the run failed validity.
    pub measurement: Option<Measurement>,
    /// Index of the first zero sample, when that is why reduction failed.
    pub zero_sample: Option<usize>,
}

impl BandwidthReadReport {
    /// Whether the run produced a valid measurement.
    pub fn passed(&self) -> bool {
        self.measurement.is_some()
    }
}

/// Outcome of a bandwidth-write run.
#[derive(Debug, Clone)]
pub struct BandwidthWriteReport {
    /// Elementwise comparison of read-back output against staged input.
    pub verification: Verification,
    /// Reduced quantities from the profiled kernel time; `None` when the
    /// profile recorded no time.
    pub measurement: Option<Measurement>,
}

impl BandwidthWriteReport {
    /// Whether the data verified and a measurement was produced.
    pub fn passed(&self) -> bool {
        self.verification.pass && self.measurement.is_some()
    }
}

/// Outcome of a latency-read run.
#[derive(Debug, Clone)]
pub struct LatencyReport {
    /// Per-trial cycle counts as the device reported them.
    pub samples: SampleSet,
    /// Reduced quantities; `None` when the run failed validity.
    pub measurement: Option<Measurement>,
    /// Index of the first zero sample, when that is why reduction failed.
    pub zero_sample: Option<usize>,
    /// Mean nanoseconds per access, derived from the average cycle count.
    pub avg_ns_per_access: Option<f64>,
    /// Profiled wall time of the kernel, in seconds.
    pub profiled_seconds: f64,
}

impl LatencyReport {
    /// Whether the run produced a valid measurement.
    pub fn passed(&self) -> bool {
        self.measurement.is_some()
    }
}

/// Outcome of a cycle-counter run.
#[derive(Debug, Clone, Copy)]
pub struct CycleCounterReport {
    /// Cycles the counter was programmed to run.
    pub expected_cycles: i64,
    /// Cycles the counter observed.
    pub measured_cycles: i64,
    /// Profiled wall time of the kernel, in seconds.
    pub profiled_seconds: f64,
}

impl CycleCounterReport {
    /// Whether both counters recorded a valid (non-zero) value.
    pub fn passed(&self) -> bool {
        self.expected_cycles > 0 && self.measured_cycles > 0
    }
}

/// Run the repeated-trial bandwidth-read experiment.
///
/// Each trial re-invokes the whole write → execute → read chain; signals
/// are never replayed across trials.
pub fn run_bandwidth_read(
    session: &mut DeviceSession,
    desc: &ExperimentDescriptor,
) -> Result<BandwidthReadReport, RunError> {
    if desc.kind != ExperimentKind::BandwidthRead {
        return Err(RunError::DescriptorMismatch {
            expected: "bandwidth_read",
        });
    }
    let n = desc.element_count;

    let kernel = session.create_kernel(desc.kind.kernel_name())?;
    let y = session.create_buffer(4, BufferAccess::WriteOnly, MemoryChannel::Bank2)?;
    let x = session.create_buffer(n * 4, BufferAccess::ReadOnly, MemoryChannel::Bank1)?;
    session.set_args(
        kernel,
        &[
            KernelArg::Buffer(y),
            KernelArg::Buffer(x),
            KernelArg::Uint(n as u32),
        ],
    )?;

    let xs: Vec<i32> = (0..n).map(|i| i as i32 + 1).collect();
    let mut samples = SampleSet::with_capacity(desc.trial_count);

    let mut pipe = ExecutionPipeline::new(session, kernel);
    for trial in 0..desc.trial_count {
        // The transfer is not part of what the device times, so it may
        // block; the kernel still gates on its signal.
        let w = pipe.write_i32s(x, &xs, TransferMode::Blocking, &[])?;
        let k = pipe.execute(&[w])?;
        let (cycles, _done) = pipe.read_i32s(y, 1, &[k])?;
        samples.push(u64::from(cycles[0] as u32));
        log::debug!("trial {}: {} cycles", trial, cycles[0]);
    }

    let (measurement, zero_sample) =
        split_reduce(reduce(&samples, desc.frequency_mhz, desc.payload_bytes()));
    Ok(BandwidthReadReport {
        samples,
        measurement,
        zero_sample,
    })
}

/// Run the single-shot bandwidth-write experiment.
pub fn run_bandwidth_write(
    session: &mut DeviceSession,
    desc: &ExperimentDescriptor,
) -> Result<BandwidthWriteReport, RunError> {
    if desc.kind != ExperimentKind::BandwidthWrite {
        return Err(RunError::DescriptorMismatch {
            expected: "bandwidth_write",
        });
    }
    let n = desc.element_count;

    let kernel = session.create_kernel(desc.kind.kernel_name())?;
    let y = session.create_buffer(n * 4, BufferAccess::WriteOnly, MemoryChannel::Bank2)?;
    let x = session.create_buffer(n * 4, BufferAccess::ReadOnly, MemoryChannel::Bank1)?;
    session.set_args(
        kernel,
        &[
            KernelArg::Buffer(y),
            KernelArg::Buffer(x),
            KernelArg::Uint(n as u32),
        ],
    )?;

    let xs: Vec<i32> = (0..n).map(|i| i as i32).collect();

    let mut pipe = ExecutionPipeline::new(session, kernel);
    let w = pipe.write_i32s(x, &xs, TransferMode::Blocking, &[])?;
    let k = pipe.execute(&[w])?;
    let (ys, _done) = pipe.read_i32s(y, n, &[k])?;

    let verification = Verification::compare(&xs, &ys);
    if let Some(m) = verification.first_mismatch {
        log::warn!(
            "verification failed at index {}: got {}, expected {}",
            m.index,
            m.actual,
            m.expected
        );
    }

    // The write kernel does not export a cycle counter; its elapsed time
    // comes from the profiled kernel signal and flows through the same
    // one-sample reduction as every other variant.
    let elapsed_ns = session.profile_elapsed_ns(k)?;
    let cycles = (elapsed_ns as f64 * 1.0e-9 * desc.frequency_mhz * 1.0e6).round() as u64;
    let samples = SampleSet::from(vec![cycles]);
    let (measurement, _zero) =
        split_reduce(reduce(&samples, desc.frequency_mhz, desc.payload_bytes()));

    Ok(BandwidthWriteReport {
        verification,
        measurement,
    })
}

/// Run the randomized-address latency experiment.
///
/// One chain stages both the data buffer and the index array; the kernel
/// gates on both write signals and reports one cycle count per trial.
pub fn run_latency_read(
    session: &mut DeviceSession,
    desc: &ExperimentDescriptor,
    pattern: &mut AccessPatternGenerator,
) -> Result<LatencyReport, RunError> {
    let ExperimentKind::LatencyRead { alignment_elems } = desc.kind else {
        return Err(RunError::DescriptorMismatch {
            expected: "latency_read",
        });
    };
    let n = desc.element_count;
    let trials = desc.trial_count;

    if trials == 0 {
        return Ok(LatencyReport {
            samples: SampleSet::new(),
            measurement: None,
            zero_sample: None,
            avg_ns_per_access: None,
            profiled_seconds: 0.0,
        });
    }
    if n == 0 {
        return Err(RunError::InvalidDescriptor {
            reason: "latency domain must hold at least one element",
        });
    }

    let kernel = session.create_kernel(desc.kind.kernel_name())?;
    let y = session.create_buffer(trials * 4, BufferAccess::WriteOnly, MemoryChannel::Bank2)?;
    let x = session.create_buffer(n * 4, BufferAccess::ReadOnly, MemoryChannel::Bank1)?;
    let i = session.create_buffer(trials * 4, BufferAccess::ReadOnly, MemoryChannel::Bank2)?;
    session.set_args(
        kernel,
        &[
            KernelArg::Buffer(y),
            KernelArg::Buffer(x),
            KernelArg::Buffer(i),
            KernelArg::Uint(trials as u32),
        ],
    )?;

    let xs: Vec<i32> = (0..n).map(|j| j as i32 + 1).collect();
    let indices = pattern.generate(trials, n as u32, alignment_elems as u32);

    let mut pipe = ExecutionPipeline::new(session, kernel);
    let w_data = pipe.write_i32s(x, &xs, TransferMode::NonBlocking, &[])?;
    let w_index = pipe.write_u32s(i, &indices, TransferMode::NonBlocking, &[])?;
    let k = pipe.execute(&[w_data, w_index])?;
    let (per_trial, _done) = pipe.read_i32s(y, trials, &[k])?;

    let mut samples = SampleSet::with_capacity(trials);
    for cycles in &per_trial {
        samples.push(u64::from(*cycles as u32));
    }

    let profiled_seconds = session.profile_elapsed_ns(k)? as f64 * 1.0e-9;
    let (measurement, zero_sample) =
        split_reduce(reduce(&samples, desc.frequency_mhz, desc.payload_bytes()));
    let avg_ns_per_access = measurement
        .as_ref()
        .map(|m| m.avg_cycles * 1000.0 / desc.frequency_mhz);

    Ok(LatencyReport {
        samples,
        measurement,
        zero_sample,
        avg_ns_per_access,
        profiled_seconds,
    })
}

/// Run the self-timed cycle-counter experiment.
///
/// The pipeline degenerates to execute → read: the device needs no
/// host-originated input and exposes its expected and measured counts as
/// two single-element buffers.
pub fn run_cycle_counter(
    session: &mut DeviceSession,
    desc: &ExperimentDescriptor,
) -> Result<CycleCounterReport, RunError> {
    if desc.kind != ExperimentKind::CycleCounter {
        return Err(RunError::DescriptorMismatch {
            expected: "cycle_counter",
        });
    }

    let kernel = session.create_kernel(desc.kind.kernel_name())?;
    let e = session.create_buffer(8, BufferAccess::ReadWrite, MemoryChannel::Bank1)?;
    let m = session.create_buffer(8, BufferAccess::ReadWrite, MemoryChannel::Bank1)?;
    session.set_args(
        kernel,
        &[
            KernelArg::Buffer(e),
            KernelArg::Buffer(m),
            KernelArg::Ulong(desc.element_count as u64),
        ],
    )?;

    let mut pipe = ExecutionPipeline::new(session, kernel);
    let k = pipe.execute(&[])?;
    let (expected, _sig_e) = pipe.read_i64s(e, 1, &[k])?;
    let (measured, _sig_m) = pipe.read_i64s(m, 1, &[k])?;

    let profiled_seconds = session.profile_elapsed_ns(k)? as f64 * 1.0e-9;

    Ok(CycleCounterReport {
        expected_cycles: expected[0],
        measured_cycles: measured[0],
        profiled_seconds,
    })
}
