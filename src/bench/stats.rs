//! Reduction of raw cycle counts into derived quantities.
//!
//! A zero cycle count is the device's sentinel for "no valid measurement was
//! recorded"; averaging it in would silently skew the result, so the whole
//! reduction reports failure instead. Accumulation happens in `u64` and the
//! average in `f64`: trial counts times per-trial cycles overflow 32 bits
//! long before they trouble either.

use thiserror::Error;

use super::samples::SampleSet;

/// Why a reduction could not produce a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReduceError {
    /// No trials were recorded.
    #[error("no samples to reduce")]
    Empty,

    /// A trial recorded zero cycles: the device did not produce a valid
    /// measurement for it.
    #[error("sample {index} is zero: the device recorded no valid measurement")]
    ZeroSample { index: usize },
}

/// Derived quantities of one experiment run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Mean cycles per trial.
    pub avg_cycles: f64,
    /// Mean elapsed time per trial, in seconds.
    pub elapsed_seconds: f64,
    /// Payload bytes per elapsed second.
    pub throughput_bytes_per_sec: f64,
}

impl Measurement {
    /// Throughput in GB/s, for reporting.
    pub fn throughput_gb_per_sec(&self) -> f64 {
        self.throughput_bytes_per_sec * 1.0e-9
    }
}

/// Reduce per-trial cycle counts against an operating frequency.
///
/// `frequency_mhz` is the device clock the cycles were counted at;
/// `payload_bytes` is the data volume one trial moved. The single-shot
/// variants pass a one-entry sample set and get the identical formula.
pub fn reduce(
    samples: &SampleSet,
    frequency_mhz: f64,
    payload_bytes: u64,
) -> Result<Measurement, ReduceError> {
    if samples.is_empty() {
        return Err(ReduceError::Empty);
    }

    let mut sum: u64 = 0;
    for (index, cycles) in samples.iter().enumerate() {
        if cycles == 0 {
            return Err(ReduceError::ZeroSample { index });
        }
        sum += cycles;
    }

    let avg_cycles = sum as f64 / samples.len() as f64;
    let elapsed_seconds = avg_cycles / (frequency_mhz * 1.0e6);
    let throughput_bytes_per_sec = payload_bytes as f64 / elapsed_seconds;

    Ok(Measurement {
        avg_cycles,
        elapsed_seconds,
        throughput_bytes_per_sec,
    })
}
