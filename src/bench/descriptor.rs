//! Experiment descriptors.
//!
//! A descriptor carries the fixed parameters of one experiment run: element
//! count, trial count, operating frequency, and the variant-specific shape.
//! Descriptors are immutable once a run starts; the drivers only read them.

use crate::config::Config;

/// The input shape a variant feeds the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    /// The kernel needs no host-originated input.
    NoInput,
    /// One data buffer is staged before execution.
    SingleInput,
    /// A data buffer plus an index array are staged before execution.
    DualInputIndexed,
}

/// Which experiment a descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentKind {
    /// Repeated-trial memory read bandwidth; the device reports cycles per trial.
    BandwidthRead,
    /// Single-shot memory write bandwidth with host-side verification.
    BandwidthWrite,
    /// Repeated randomized loads at burst-aligned addresses.
    LatencyRead {
        /// Minimum addressable granularity, in elements.
        alignment_elems: usize,
    },
    /// The device self-times a programmed cycle count; no host input.
    CycleCounter,
}

impl ExperimentKind {
    /// Name of the device kernel this variant launches.
    pub fn kernel_name(&self) -> &'static str {
        match self {
            ExperimentKind::BandwidthRead => "bandwidth_read",
            ExperimentKind::BandwidthWrite => "bandwidth_write",
            ExperimentKind::LatencyRead { .. } => "latency_read",
            ExperimentKind::CycleCounter => "cycle_counter",
        }
    }

    /// The input shape of this variant.
    pub fn input_shape(&self) -> InputShape {
        match self {
            ExperimentKind::BandwidthRead | ExperimentKind::BandwidthWrite => {
                InputShape::SingleInput
            }
            ExperimentKind::LatencyRead { .. } => InputShape::DualInputIndexed,
            ExperimentKind::CycleCounter => InputShape::NoInput,
        }
    }
}

/// Fixed parameters of one experiment run.
#[derive(Debug, Clone)]
pub struct ExperimentDescriptor {
    /// Number of data elements the experiment operates on.
    pub element_count: usize,
    /// Number of trials (1 for single-shot variants).
    pub trial_count: usize,
    /// Operating frequency of the device clock, in MHz.
    pub frequency_mhz: f64,
    /// Variant-specific shape.
    pub kind: ExperimentKind,
}

impl ExperimentDescriptor {
    /// Repeated-trial bandwidth-read experiment.
    pub fn bandwidth_read(element_count: usize, trial_count: usize, frequency_mhz: f64) -> Self {
        Self {
            element_count,
            trial_count,
            frequency_mhz,
            kind: ExperimentKind::BandwidthRead,
        }
    }

    /// Single-shot bandwidth-write experiment.
    ///
    /// Frequency comes from configuration; the variant derives elapsed time
    /// from the profiled kernel signal rather than device cycle counts.
    pub fn bandwidth_write(element_count: usize) -> Self {
        Self {
            element_count,
            trial_count: 1,
            frequency_mhz: Config::get().default_frequency_mhz(),
            kind: ExperimentKind::BandwidthWrite,
        }
    }

    /// Randomized-address latency experiment.
    ///
    /// The alignment stride is the device's native transfer width over
    /// 32-bit elements, from configuration.
    pub fn latency_read(element_count: usize, trial_count: usize, frequency_mhz: f64) -> Self {
        Self {
            element_count,
            trial_count,
            frequency_mhz,
            kind: ExperimentKind::LatencyRead {
                alignment_elems: Config::get().alignment_elems(4),
            },
        }
    }

    /// Self-timed cycle-counter experiment.
    pub fn cycle_counter(element_count: usize) -> Self {
        Self {
            element_count,
            trial_count: 1,
            frequency_mhz: Config::get().default_frequency_mhz(),
            kind: ExperimentKind::CycleCounter,
        }
    }

    /// Bytes of payload one trial moves.
    pub fn payload_bytes(&self) -> u64 {
        match self.kind {
            ExperimentKind::BandwidthRead | ExperimentKind::BandwidthWrite => {
                (self.element_count * 4) as u64
            }
            // One aligned burst per access.
            ExperimentKind::LatencyRead { alignment_elems } => (alignment_elems * 4) as u64,
            ExperimentKind::CycleCounter => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_names() {
        assert_eq!(
            ExperimentKind::BandwidthRead.kernel_name(),
            "bandwidth_read"
        );
        assert_eq!(
            ExperimentKind::LatencyRead { alignment_elems: 16 }.kernel_name(),
            "latency_read"
        );
        assert_eq!(ExperimentKind::CycleCounter.kernel_name(), "cycle_counter");
    }

    #[test]
    fn test_input_shapes() {
        assert_eq!(
            ExperimentKind::CycleCounter.input_shape(),
            InputShape::NoInput
        );
        assert_eq!(
            ExperimentKind::BandwidthWrite.input_shape(),
            InputShape::SingleInput
        );
        assert_eq!(
            ExperimentKind::LatencyRead { alignment_elems: 16 }.input_shape(),
            InputShape::DualInputIndexed
        );
    }

    #[test]
    fn test_payload_bytes() {
        let desc = ExperimentDescriptor::bandwidth_read(1024, 10, 200.0);
        assert_eq!(desc.payload_bytes(), 4096);

        let desc = ExperimentDescriptor {
            element_count: 1024,
            trial_count: 100,
            frequency_mhz: 200.0,
            kind: ExperimentKind::LatencyRead { alignment_elems: 16 },
        };
        assert_eq!(desc.payload_bytes(), 64);
    }
}
