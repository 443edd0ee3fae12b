//! The write → execute → read execution pipeline.
//!
//! One pipeline drives one kernel through a session. Stages are chained by
//! completion signals, not submission order: `execute` waits on the signals
//! of the staging writes it consumes, and `stage_read` waits on the kernel
//! signal. Reading results before the kernel signal fires is a correctness
//! violation, not a performance one: device-side counters are not stable
//! mid-execution.
//!
//! The pipeline performs no timing of its own. It only provides the event
//! ordering the device needs to self-time, plus the host-side blocking
//! point of the final read.

use crate::device::{
    BufferId, CompletionSignal, DeviceError, DeviceSession, KernelId, QueueId, TransferMode,
};

/// Signal-chained driver for one kernel's write/execute/read stages.
pub struct ExecutionPipeline<'a> {
    session: &'a mut DeviceSession,
    kernel: KernelId,
    queue: QueueId,
}

impl<'a> ExecutionPipeline<'a> {
    /// Build a pipeline on the session's default queue.
    pub fn new(session: &'a mut DeviceSession, kernel: KernelId) -> Self {
        let queue = session.queue();
        Self {
            session,
            kernel,
            queue,
        }
    }

    /// Build a pipeline on an explicit queue.
    pub fn on_queue(session: &'a mut DeviceSession, kernel: KernelId, queue: QueueId) -> Self {
        Self {
            session,
            kernel,
            queue,
        }
    }

    /// Stage host data into a device buffer.
    ///
    /// Returns the signal that fires on copy completion. Does not block the
    /// caller unless `mode` is [`TransferMode::Blocking`], which is used
    /// when the transfer itself is not being timed.
    pub fn stage_write(
        &mut self,
        buffer: BufferId,
        data: &[u8],
        mode: TransferMode,
        wait: &[CompletionSignal],
    ) -> Result<CompletionSignal, DeviceError> {
        let queue = self.queue;
        self.session
            .runtime_mut()
            .enqueue_write(queue, buffer, data, mode, wait)
    }

    /// Submit the kernel, gated on zero or more wait signals.
    ///
    /// Variants without host-originated input submit with an empty wait
    /// list. Returns the kernel-completion signal.
    pub fn execute(&mut self, wait: &[CompletionSignal]) -> Result<CompletionSignal, DeviceError> {
        let (queue, kernel) = (self.queue, self.kernel);
        self.session.runtime_mut().enqueue_kernel(queue, kernel, wait)
    }

    /// Copy results back to the host, strictly after `wait` has fired.
    ///
    /// Blocks until `out` is materialized in host memory.
    pub fn stage_read(
        &mut self,
        buffer: BufferId,
        out: &mut [u8],
        wait: &[CompletionSignal],
    ) -> Result<CompletionSignal, DeviceError> {
        let queue = self.queue;
        self.session
            .runtime_mut()
            .enqueue_read(queue, buffer, out, wait)
    }

    /// Stage a slice of `i32` values.
    pub fn write_i32s(
        &mut self,
        buffer: BufferId,
        values: &[i32],
        mode: TransferMode,
        wait: &[CompletionSignal],
    ) -> Result<CompletionSignal, DeviceError> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.stage_write(buffer, &bytes, mode, wait)
    }

    /// Stage a slice of `u32` values.
    pub fn write_u32s(
        &mut self,
        buffer: BufferId,
        values: &[u32],
        mode: TransferMode,
        wait: &[CompletionSignal],
    ) -> Result<CompletionSignal, DeviceError> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.stage_write(buffer, &bytes, mode, wait)
    }

    /// Stage a slice of `f32` values.
    pub fn write_f32s(
        &mut self,
        buffer: BufferId,
        values: &[f32],
        mode: TransferMode,
        wait: &[CompletionSignal],
    ) -> Result<CompletionSignal, DeviceError> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.stage_write(buffer, &bytes, mode, wait)
    }

    /// Read back `count` `i32` values.
    pub fn read_i32s(
        &mut self,
        buffer: BufferId,
        count: usize,
        wait: &[CompletionSignal],
    ) -> Result<(Vec<i32>, CompletionSignal), DeviceError> {
        let mut bytes = vec![0u8; count * 4];
        let signal = self.stage_read(buffer, &mut bytes, wait)?;
        let values = bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok((values, signal))
    }

    /// Read back `count` `i64` values.
    pub fn read_i64s(
        &mut self,
        buffer: BufferId,
        count: usize,
        wait: &[CompletionSignal],
    ) -> Result<(Vec<i64>, CompletionSignal), DeviceError> {
        let mut bytes = vec![0u8; count * 8];
        let signal = self.stage_read(buffer, &mut bytes, wait)?;
        let values = bytes
            .chunks_exact(8)
            .map(|c| {
                i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
            })
            .collect();
        Ok((values, signal))
    }

    /// Read back `count` `f32` values.
    pub fn read_f32s(
        &mut self,
        buffer: BufferId,
        count: usize,
        wait: &[CompletionSignal],
    ) -> Result<(Vec<f32>, CompletionSignal), DeviceError> {
        let mut bytes = vec![0u8; count * 4];
        let signal = self.stage_read(buffer, &mut bytes, wait)?;
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok((values, signal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BufferAccess, EmulatedDevice, KernelArg, MemoryChannel};

    fn session() -> DeviceSession {
        let dev = EmulatedDevice::with_clock("emu-test", 5.0);
        DeviceSession::open(Box::new(dev), &[0xCD; 4]).unwrap()
    }

    #[test]
    fn test_full_chain_round_trips_data() {
        let mut s = session();
        let n = 16usize;
        let kernel = s.create_kernel("bandwidth_write").unwrap();
        let y = s
            .create_buffer(n * 4, BufferAccess::WriteOnly, MemoryChannel::Bank2)
            .unwrap();
        let x = s
            .create_buffer(n * 4, BufferAccess::ReadOnly, MemoryChannel::Bank1)
            .unwrap();
        s.set_args(
            kernel,
            &[
                KernelArg::Buffer(y),
                KernelArg::Buffer(x),
                KernelArg::Uint(n as u32),
            ],
        )
        .unwrap();

        let xs: Vec<i32> = (0..n as i32).collect();
        let mut pipe = ExecutionPipeline::new(&mut s, kernel);
        let w = pipe
            .write_i32s(x, &xs, TransferMode::Blocking, &[])
            .unwrap();
        let k = pipe.execute(&[w]).unwrap();
        let (ys, _done) = pipe.read_i32s(y, n, &[k]).unwrap();

        assert_eq!(ys, xs);
    }

    #[test]
    fn test_read_gated_on_unknown_signal_fails() {
        let mut s = session();
        let kernel = s.create_kernel("bandwidth_write").unwrap();
        let y = s
            .create_buffer(4, BufferAccess::WriteOnly, MemoryChannel::Bank2)
            .unwrap();

        let mut pipe = ExecutionPipeline::new(&mut s, kernel);
        let ghost = CompletionSignal::from_raw(1234);
        let result = pipe.read_i32s(y, 1, &[ghost]);
        assert!(matches!(result, Err(DeviceError::UnknownSignal(_))));
    }

    #[test]
    fn test_i64_and_f32_round_trip() {
        let mut s = session();
        let kernel = s.create_kernel("bandwidth_write").unwrap();
        let buf = s
            .create_buffer(64, BufferAccess::ReadWrite, MemoryChannel::Bank1)
            .unwrap();

        let mut pipe = ExecutionPipeline::new(&mut s, kernel);

        let longs = [i64::MIN, -1, 0, i64::MAX];
        let bytes: Vec<u8> = longs.iter().flat_map(|v| v.to_le_bytes()).collect();
        let w = pipe
            .stage_write(buf, &bytes, TransferMode::Blocking, &[])
            .unwrap();
        let (back, _sig) = pipe.read_i64s(buf, 4, &[w]).unwrap();
        assert_eq!(back, longs);

        let floats = [0.0f32, -1.5, 3.25, f32::MAX];
        let w = pipe
            .write_f32s(buf, &floats, TransferMode::Blocking, &[])
            .unwrap();
        let (back, _sig) = pipe.read_f32s(buf, 4, &[w]).unwrap();
        assert_eq!(back, floats);
    }
}
