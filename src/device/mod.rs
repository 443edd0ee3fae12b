//! Device layer: the accelerator runtime boundary and its software backend.
//!
//! This module provides:
//! - The [`AcceleratorRuntime`] capability trait the harness drives devices
//!   through (build program, buffers, kernels, enqueue with wait lists)
//! - [`CompletionSignal`] handles that order dependent operations
//! - [`DeviceSession`], scoped ownership of one run's handles
//! - [`EmulatedDevice`], a software runtime with simulated external memory
//!
//! # Ordering model
//!
//! Within one submission queue, dependent operations are gated by signal
//! wait lists, not by submission order: a queue is free to reorder
//! independent operations, so anything that must happen-after names its
//! predecessor's signal explicitly. A device-to-host read is the one call
//! that also blocks the host, because the caller needs the data.

pub mod emulated;
pub mod memory;
pub mod runtime;
pub mod session;
pub mod signal;

pub use emulated::EmulatedDevice;
pub use memory::{Allocation, DeviceMemory};
pub use runtime::{
    AcceleratorRuntime, BufferAccess, BufferId, DeviceError, KernelArg, KernelId, MemoryChannel,
    ProgramId, QueueId, TransferMode,
};
pub use session::DeviceSession;
pub use signal::CompletionSignal;
