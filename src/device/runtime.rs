//! The accelerator runtime capability boundary.
//!
//! `AcceleratorRuntime` is the seam between the harness and whatever actually
//! executes device work: a vendor OpenCL runtime on real hardware, or the
//! in-process emulated backend used for development and tests. The trait is
//! deliberately minimal:
//!
//! - build an executable program from an opaque vendor binary image
//! - create command queues, buffers (with memory-channel affinity), kernels
//! - set positional kernel arguments
//! - enqueue write / execute / read with explicit wait lists
//! - query profiled elapsed time for a completed operation
//!
//! Every runtime call that reports a non-success status surfaces as a
//! [`DeviceError`], and any such failure is fatal to the current run: there
//! is no retry, because downstream stages would have no valid wait condition.

use thiserror::Error;

use super::signal::CompletionSignal;

/// Handle to a built program (executable image loaded onto the device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// Handle to a command submission queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub u32);

/// Handle to a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Handle to a kernel created from a built program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelId(pub u32);

/// Device-side access permission for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    /// The kernel only loads from this buffer.
    ReadOnly,
    /// The kernel only stores to this buffer.
    WriteOnly,
    /// The kernel both loads and stores.
    ReadWrite,
}

/// External-memory channel a buffer is pinned to.
///
/// Mirrors the per-bank placement the vendor runtime exposes; the harness
/// keeps timed input data and result buffers on separate banks so they do
/// not contend for the same memory controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryChannel {
    /// First external memory bank.
    Bank1,
    /// Second external memory bank.
    Bank2,
}

impl std::fmt::Display for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryChannel::Bank1 => write!(f, "bank1"),
            MemoryChannel::Bank2 => write!(f, "bank2"),
        }
    }
}

/// Whether a host-to-device transfer blocks the caller.
///
/// Blocking transfers are used when the transfer itself is not being timed;
/// non-blocking transfers return immediately and downstream operations gate
/// on the returned signal instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Return only after the host data has been consumed.
    Blocking,
    /// Return immediately; completion is observable via the signal.
    NonBlocking,
}

/// A positional kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    /// A device buffer handle.
    Buffer(BufferId),
    /// A 32-bit scalar.
    Uint(u32),
    /// A 64-bit scalar.
    Ulong(u64),
}

/// Errors reported by an accelerator runtime.
///
/// All of these are fatal to the current run.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No platform matching the configured selection substring.
    #[error("no accelerator platform matching \"{wanted}\"")]
    PlatformNotFound { wanted: String },

    /// The vendor binary image was rejected.
    #[error("invalid program image: {0}")]
    InvalidProgram(String),

    /// The program does not contain a kernel with this name.
    #[error("no kernel named \"{name}\" in program")]
    NoSuchKernel { name: String },

    /// A handle does not belong to this runtime.
    #[error("unknown {kind} handle #{id}")]
    InvalidHandle { kind: &'static str, id: u32 },

    /// A wait list referenced a signal this runtime never issued.
    ///
    /// An operation that depends on a signal must not be issued until all of
    /// its dependency signals exist.
    #[error("wait list references unknown {0}")]
    UnknownSignal(CompletionSignal),

    /// A transfer did not fit the fixed capacity of a device buffer.
    #[error("transfer of {requested} bytes does not fit buffer of {capacity} bytes")]
    BufferSizeMismatch { capacity: usize, requested: usize },

    /// A memory bank has no room for another allocation.
    #[error("memory {channel} exhausted: {requested} bytes requested")]
    BankExhausted {
        channel: MemoryChannel,
        requested: usize,
    },

    /// A kernel was launched with a positional argument unset.
    #[error("kernel \"{kernel}\" launched with argument {index} unset")]
    ArgumentUnset { kernel: String, index: usize },

    /// A kernel argument had the wrong shape for its slot.
    #[error("kernel \"{kernel}\" argument {index}: {reason}")]
    BadArgument {
        kernel: String,
        index: usize,
        reason: String,
    },

    /// The point-to-point channel behind a send/recv kernel is not wired up
    /// or the peer went away.
    #[error("device channel disconnected")]
    ChannelDisconnected,
}

/// Capability surface of an accelerator runtime.
///
/// Implementations own all device-side resources they hand out; dropping the
/// runtime releases everything. Runtimes move to whichever thread runs their
/// participant, hence the `Send` bound. See
/// [`crate::device::EmulatedDevice`] for the software implementation.
pub trait AcceleratorRuntime: Send {
    /// Name of the platform this runtime drives.
    fn platform_name(&self) -> &str;

    /// Name of the selected device.
    fn device_name(&self) -> &str;

    /// Build an executable program from an opaque vendor binary image.
    fn build_program(&mut self, image: &[u8]) -> Result<ProgramId, DeviceError>;

    /// Create a command submission queue.
    fn create_queue(&mut self) -> Result<QueueId, DeviceError>;

    /// Create a device buffer of fixed capacity on the given memory channel.
    ///
    /// Capacity is fixed at creation and never resized.
    fn create_buffer(
        &mut self,
        size_bytes: usize,
        access: BufferAccess,
        channel: MemoryChannel,
    ) -> Result<BufferId, DeviceError>;

    /// Create a kernel handle by name from a built program.
    fn create_kernel(&mut self, program: ProgramId, name: &str) -> Result<KernelId, DeviceError>;

    /// Set a positional kernel argument.
    fn set_arg(&mut self, kernel: KernelId, index: usize, arg: KernelArg)
        -> Result<(), DeviceError>;

    /// Enqueue a host-to-device transfer.
    ///
    /// Returns a signal that fires when the copy has completed. With
    /// [`TransferMode::Blocking`] the call itself does not return until then.
    fn enqueue_write(
        &mut self,
        queue: QueueId,
        buffer: BufferId,
        data: &[u8],
        mode: TransferMode,
        wait: &[CompletionSignal],
    ) -> Result<CompletionSignal, DeviceError>;

    /// Enqueue a kernel launch gated on zero or more wait signals.
    fn enqueue_kernel(
        &mut self,
        queue: QueueId,
        kernel: KernelId,
        wait: &[CompletionSignal],
    ) -> Result<CompletionSignal, DeviceError>;

    /// Enqueue a device-to-host transfer and block until `out` is filled.
    ///
    /// This is the one hard synchronization point per trial: the call only
    /// returns once the data is materialized in host memory.
    fn enqueue_read(
        &mut self,
        queue: QueueId,
        buffer: BufferId,
        out: &mut [u8],
        wait: &[CompletionSignal],
    ) -> Result<CompletionSignal, DeviceError>;

    /// Block until every operation submitted to the queue has completed.
    fn finish(&mut self, queue: QueueId) -> Result<(), DeviceError>;

    /// Profiled wall time of the operation behind a signal, in nanoseconds.
    fn profile_elapsed_ns(&self, signal: CompletionSignal) -> Result<u64, DeviceError>;
}
