//! Scoped ownership of one run's device resources.
//!
//! A `DeviceSession` binds the runtime handles a run needs (the built
//! program, a default submission queue, and any kernels and buffers created
//! through it) into one object whose lifetime is the run. Nothing device-
//! related lives in process-global state: when the session drops, the
//! backing runtime drops with it and releases everything it handed out, on
//! every exit path including verification failure.

use super::runtime::{
    AcceleratorRuntime, BufferAccess, BufferId, DeviceError, KernelArg, KernelId, ProgramId,
    QueueId,
};
use super::signal::CompletionSignal;

/// One run's view of an accelerator.
pub struct DeviceSession {
    runtime: Box<dyn AcceleratorRuntime>,
    program: ProgramId,
    queue: QueueId,
}

impl DeviceSession {
    /// Open a session: build the vendor image and create the default queue.
    pub fn open(
        mut runtime: Box<dyn AcceleratorRuntime>,
        image: &[u8],
    ) -> Result<Self, DeviceError> {
        log::info!(
            "opening session on {} ({})",
            runtime.device_name(),
            runtime.platform_name()
        );
        let program = runtime.build_program(image)?;
        let queue = runtime.create_queue()?;
        Ok(Self {
            runtime,
            program,
            queue,
        })
    }

    /// The default submission queue.
    pub fn queue(&self) -> QueueId {
        self.queue
    }

    /// The built program.
    pub fn program(&self) -> ProgramId {
        self.program
    }

    /// Create an additional submission queue.
    pub fn create_queue(&mut self) -> Result<QueueId, DeviceError> {
        self.runtime.create_queue()
    }

    /// Create a kernel from the session's program.
    pub fn create_kernel(&mut self, name: &str) -> Result<KernelId, DeviceError> {
        self.runtime.create_kernel(self.program, name)
    }

    /// Create a device buffer.
    pub fn create_buffer(
        &mut self,
        size_bytes: usize,
        access: BufferAccess,
        channel: super::runtime::MemoryChannel,
    ) -> Result<BufferId, DeviceError> {
        self.runtime.create_buffer(size_bytes, access, channel)
    }

    /// Set all positional arguments of a kernel, in order.
    pub fn set_args(&mut self, kernel: KernelId, args: &[KernelArg]) -> Result<(), DeviceError> {
        for (index, arg) in args.iter().enumerate() {
            self.runtime.set_arg(kernel, index, *arg)?;
        }
        Ok(())
    }

    /// Direct access to the backing runtime.
    pub fn runtime_mut(&mut self) -> &mut dyn AcceleratorRuntime {
        self.runtime.as_mut()
    }

    /// Profiled wall time of a completed operation, in nanoseconds.
    pub fn profile_elapsed_ns(&self, signal: CompletionSignal) -> Result<u64, DeviceError> {
        self.runtime.profile_elapsed_ns(signal)
    }

    /// Block until the default queue has drained.
    pub fn finish(&mut self) -> Result<(), DeviceError> {
        let queue = self.queue;
        self.runtime.finish(queue)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        // Best-effort drain before the runtime (and all its handles) is
        // released; a failure here must not panic a teardown path.
        let queue = self.queue;
        if let Err(e) = self.runtime.finish(queue) {
            log::warn!("session teardown: queue drain failed: {}", e);
        }
        log::debug!("session on {} closed", self.runtime.device_name());
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", &self.runtime.device_name())
            .field("program", &self.program)
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::emulated::EmulatedDevice;
    use crate::device::runtime::MemoryChannel;

    fn session() -> DeviceSession {
        let dev = EmulatedDevice::with_clock("emu-test", 5.0);
        DeviceSession::open(Box::new(dev), &[0xAB; 8]).unwrap()
    }

    #[test]
    fn test_open_builds_program_and_queue() {
        let s = session();
        assert_eq!(s.program(), ProgramId(0));
        assert_eq!(s.queue(), QueueId(0));
    }

    #[test]
    fn test_open_fails_on_bad_image() {
        let dev = EmulatedDevice::with_clock("emu-test", 5.0);
        assert!(matches!(
            DeviceSession::open(Box::new(dev), &[]),
            Err(DeviceError::InvalidProgram(_))
        ));
    }

    #[test]
    fn test_set_args_positionally() {
        let mut s = session();
        let kernel = s.create_kernel("bandwidth_read").unwrap();
        let y = s
            .create_buffer(4, BufferAccess::WriteOnly, MemoryChannel::Bank2)
            .unwrap();
        let x = s
            .create_buffer(64, BufferAccess::ReadOnly, MemoryChannel::Bank1)
            .unwrap();
        s.set_args(
            kernel,
            &[
                KernelArg::Buffer(y),
                KernelArg::Buffer(x),
                KernelArg::Uint(16),
            ],
        )
        .unwrap();

        // The kernel now launches cleanly: every positional slot is filled.
        let queue = s.queue();
        assert!(s.runtime_mut().enqueue_kernel(queue, kernel, &[]).is_ok());
    }

    #[test]
    fn test_additional_queue() {
        let mut s = session();
        let q1 = s.create_queue().unwrap();
        assert_ne!(s.queue(), q1);
    }
}
