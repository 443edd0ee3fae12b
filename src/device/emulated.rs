//! Software implementation of the accelerator runtime.
//!
//! `EmulatedDevice` stands in for a real board so the harness can run
//! end-to-end on any machine. Operations execute eagerly and in submission
//! order, but the runtime still enforces the signal discipline: a wait list
//! referencing a signal that was never issued is rejected, exactly as a
//! reordering hardware queue would make such a submission unsound.
//!
//! The built-in kernels model only what the harness observes from the RTL
//! modules they stand in for: deterministic cycle counts and data movement.
//! They are not models of the hardware internals.
//!
//! # Timing model
//!
//! The device keeps an emulated nanosecond timeline. Each operation costs a
//! deterministic number of cycles (a fixed access latency plus one cycle per
//! 64-byte burst), converted through the configured clock period. Profiled
//! elapsed times are read off this timeline.

use std::sync::mpsc::{channel, Receiver, Sender};

use super::memory::DeviceMemory;
use super::runtime::{
    AcceleratorRuntime, BufferAccess, BufferId, DeviceError, KernelArg, KernelId, MemoryChannel,
    ProgramId, QueueId, TransferMode,
};
use super::signal::CompletionSignal;

/// Round-trip latency of one external-memory access, in cycles.
const MEM_LATENCY_CYCLES: u64 = 37;

/// Setup overhead of a host transfer, in cycles.
const TRANSFER_SETUP_CYCLES: u64 = 100;

/// Latency of the point-to-point channel between linked devices, in cycles.
const CHANNEL_LATENCY_CYCLES: u64 = 24;

/// Extra cycles the self-timing counter observes beyond its programmed count.
const COUNTER_DRAIN_CYCLES: u64 = 2;

/// Bytes moved per burst (512-bit data path).
const BURST_BYTES: u64 = 64;

/// Kernel names the emulated program exposes.
const KNOWN_KERNELS: &[&str] = &[
    "bandwidth_read",
    "bandwidth_write",
    "latency_read",
    "cycle_counter",
    "send",
    "recv",
];

fn burst_cycles(bytes: u64) -> u64 {
    bytes.div_ceil(BURST_BYTES)
}

/// One half of a duplex point-to-point link between two devices.
struct ChannelLink {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

#[derive(Debug, Clone, Copy)]
struct BufferRecord {
    base: u64,
    size: usize,
    #[allow(dead_code)]
    access: BufferAccess,
    channel: MemoryChannel,
}

#[derive(Debug, Clone)]
struct KernelRecord {
    name: String,
    args: Vec<Option<KernelArg>>,
}

#[derive(Debug, Clone, Copy)]
struct SignalRecord {
    start_ns: u64,
    end_ns: u64,
}

/// Emulated accelerator device.
///
/// Implements [`AcceleratorRuntime`] entirely in software. Two devices can
/// be wired together with [`EmulatedDevice::link_pair`] so their `send` and
/// `recv` kernels rendezvous over an in-process channel; `recv` blocks until
/// data arrives, with no timeout, like the fixed-function hardware channel.
pub struct EmulatedDevice {
    device_name: String,
    ns_per_cycle: f64,
    memory: DeviceMemory,
    programs: u32,
    queues: u32,
    buffers: Vec<BufferRecord>,
    kernels: Vec<KernelRecord>,
    signals: Vec<SignalRecord>,
    now_ns: u64,
    link: Option<ChannelLink>,
}

impl EmulatedDevice {
    /// Create an emulated device with the configured clock.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, crate::config::Config::get().emulated_ns_per_cycle())
    }

    /// Create an emulated device with an explicit clock period.
    pub fn with_clock(name: impl Into<String>, ns_per_cycle: f64) -> Self {
        Self {
            device_name: name.into(),
            ns_per_cycle,
            memory: DeviceMemory::new(),
            programs: 0,
            queues: 0,
            buffers: Vec::new(),
            kernels: Vec::new(),
            signals: Vec::new(),
            now_ns: 0,
            link: None,
        }
    }

    /// Wire two devices together with a duplex point-to-point link.
    ///
    /// Replaces any link either device previously had.
    pub fn link_pair(a: &mut EmulatedDevice, b: &mut EmulatedDevice) {
        let (tx_ab, rx_ab) = channel();
        let (tx_ba, rx_ba) = channel();
        a.link = Some(ChannelLink {
            tx: tx_ab,
            rx: rx_ba,
        });
        b.link = Some(ChannelLink {
            tx: tx_ba,
            rx: rx_ab,
        });
    }

    /// Wire a device's channel back to itself.
    ///
    /// Used by the loopback relay variant where the `send` and `recv`
    /// kernels run on the same device.
    pub fn link_loopback(dev: &mut EmulatedDevice) {
        let (tx, rx) = channel();
        dev.link = Some(ChannelLink { tx, rx });
    }

    fn check_queue(&self, queue: QueueId) -> Result<(), DeviceError> {
        if queue.0 < self.queues {
            Ok(())
        } else {
            Err(DeviceError::InvalidHandle {
                kind: "queue",
                id: queue.0,
            })
        }
    }

    fn buffer(&self, buffer: BufferId) -> Result<BufferRecord, DeviceError> {
        self.buffers
            .get(buffer.0 as usize)
            .copied()
            .ok_or(DeviceError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            })
    }

    fn check_wait(&self, wait: &[CompletionSignal]) -> Result<(), DeviceError> {
        for signal in wait {
            if signal.raw() >= self.signals.len() as u64 {
                return Err(DeviceError::UnknownSignal(*signal));
            }
        }
        Ok(())
    }

    /// Record an operation of `cycles` cycles on the emulated timeline.
    fn complete(&mut self, cycles: u64) -> CompletionSignal {
        let start_ns = self.now_ns;
        let duration_ns = ((cycles as f64) * self.ns_per_cycle).ceil() as u64;
        self.now_ns += duration_ns.max(1);
        self.signals.push(SignalRecord {
            start_ns,
            end_ns: self.now_ns,
        });
        CompletionSignal::from_raw(self.signals.len() as u64 - 1)
    }

    fn buffer_arg(&self, rec: &KernelRecord, index: usize) -> Result<BufferRecord, DeviceError> {
        match rec.args.get(index).copied().flatten() {
            Some(KernelArg::Buffer(id)) => self.buffer(id),
            Some(_) => Err(DeviceError::BadArgument {
                kernel: rec.name.clone(),
                index,
                reason: "expected a buffer".to_string(),
            }),
            None => Err(DeviceError::ArgumentUnset {
                kernel: rec.name.clone(),
                index,
            }),
        }
    }

    fn scalar_arg(&self, rec: &KernelRecord, index: usize) -> Result<u64, DeviceError> {
        match rec.args.get(index).copied().flatten() {
            Some(KernelArg::Uint(v)) => Ok(v as u64),
            Some(KernelArg::Ulong(v)) => Ok(v),
            Some(_) => Err(DeviceError::BadArgument {
                kernel: rec.name.clone(),
                index,
                reason: "expected a scalar".to_string(),
            }),
            None => Err(DeviceError::ArgumentUnset {
                kernel: rec.name.clone(),
                index,
            }),
        }
    }

    fn write_i32(&mut self, addr: u64, value: i32) {
        self.memory.write_bytes(addr, &value.to_le_bytes());
    }

    fn write_i64(&mut self, addr: u64, value: i64) {
        self.memory.write_bytes(addr, &value.to_le_bytes());
    }

    /// Execute a kernel, returning the cycles it self-reports.
    fn run_kernel(&mut self, rec: &KernelRecord) -> Result<u64, DeviceError> {
        match rec.name.as_str() {
            "bandwidth_read" => {
                let y = self.buffer_arg(rec, 0)?;
                let x = self.buffer_arg(rec, 1)?;
                let n = self.scalar_arg(rec, 2)?;

                // Stream n elements out of X's bank; Y receives the cycle count.
                let bytes = n * 4;
                let mut sink = vec![0u8; bytes as usize];
                self.memory.read_bytes(x.base, &mut sink);

                let cycles = MEM_LATENCY_CYCLES + burst_cycles(bytes);
                self.write_i32(y.base, cycles as i32);
                log::debug!("bandwidth_read: {} elements, {} cycles", n, cycles);
                Ok(cycles)
            }

            "bandwidth_write" => {
                let y = self.buffer_arg(rec, 0)?;
                let x = self.buffer_arg(rec, 1)?;
                let n = self.scalar_arg(rec, 2)?;

                let bytes = (n * 4) as usize;
                if bytes > x.size || bytes > y.size {
                    return Err(DeviceError::BufferSizeMismatch {
                        capacity: x.size.min(y.size),
                        requested: bytes,
                    });
                }
                self.memory.copy_bytes(x.base, y.base, bytes);

                let cycles = MEM_LATENCY_CYCLES + burst_cycles(bytes as u64);
                log::debug!("bandwidth_write: {} elements, {} cycles", n, cycles);
                Ok(cycles)
            }

            "latency_read" => {
                let y = self.buffer_arg(rec, 0)?;
                let x = self.buffer_arg(rec, 1)?;
                let i = self.buffer_arg(rec, 2)?;
                let trials = self.scalar_arg(rec, 3)?;

                let domain = (x.size / 4) as u64;
                let mut total = 0u64;
                for j in 0..trials {
                    let mut raw = [0u8; 4];
                    self.memory.read_bytes(i.base + j * 4, &mut raw);
                    let idx = u32::from_le_bytes(raw) as u64;
                    if idx >= domain {
                        return Err(DeviceError::BadArgument {
                            kernel: rec.name.clone(),
                            index: 2,
                            reason: format!("index {} outside domain {}", idx, domain),
                        });
                    }
                    // One burst per access at fixed latency.
                    let cycles = MEM_LATENCY_CYCLES + 1;
                    self.write_i32(y.base + j * 4, cycles as i32);
                    total += cycles;
                }
                log::debug!("latency_read: {} trials, {} cycles total", trials, total);
                Ok(total.max(1))
            }

            "cycle_counter" => {
                let e = self.buffer_arg(rec, 0)?;
                let m = self.buffer_arg(rec, 1)?;
                let n = self.scalar_arg(rec, 2)?;

                // The counter is programmed to run n cycles and reports what
                // it actually observed.
                let expected = n;
                let measured = n + COUNTER_DRAIN_CYCLES;
                self.write_i64(e.base, expected as i64);
                self.write_i64(m.base, measured as i64);
                log::debug!("cycle_counter: expected {}, measured {}", expected, measured);
                Ok(measured.max(1))
            }

            "send" => {
                let b = self.buffer_arg(rec, 0)?;
                let lanes = self.scalar_arg(rec, 1)?;
                let rank = self.scalar_arg(rec, 2)?;

                let bytes = (lanes * 4).min(b.size as u64) as usize;
                let mut data = vec![0u8; bytes];
                self.memory.read_bytes(b.base, &mut data);

                let link = self.link.as_ref().ok_or(DeviceError::ChannelDisconnected)?;
                link.tx
                    .send(data)
                    .map_err(|_| DeviceError::ChannelDisconnected)?;
                log::debug!("send kernel: {} bytes pushed (rank {})", bytes, rank);
                Ok(CHANNEL_LATENCY_CYCLES + burst_cycles(bytes as u64))
            }

            "recv" => {
                let b = self.buffer_arg(rec, 0)?;
                let lanes = self.scalar_arg(rec, 1)?;
                let rank = self.scalar_arg(rec, 2)?;

                let link = self.link.as_ref().ok_or(DeviceError::ChannelDisconnected)?;
                // Blocks until the peer's send kernel has produced data.
                let data = link.rx.recv().map_err(|_| DeviceError::ChannelDisconnected)?;
                if data.len() > b.size {
                    return Err(DeviceError::BufferSizeMismatch {
                        capacity: b.size,
                        requested: data.len(),
                    });
                }
                let expected = (lanes * 4) as usize;
                if data.len() != expected {
                    log::warn!(
                        "recv kernel: got {} bytes, expected {} (rank {})",
                        data.len(),
                        expected,
                        rank
                    );
                }
                self.memory.write_bytes(b.base, &data);
                log::debug!("recv kernel: {} bytes landed (rank {})", data.len(), rank);
                Ok(CHANNEL_LATENCY_CYCLES + burst_cycles(data.len() as u64))
            }

            other => Err(DeviceError::NoSuchKernel {
                name: other.to_string(),
            }),
        }
    }
}

impl AcceleratorRuntime for EmulatedDevice {
    fn platform_name(&self) -> &str {
        "Emulated FPGA Platform"
    }

    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn build_program(&mut self, image: &[u8]) -> Result<ProgramId, DeviceError> {
        if image.is_empty() {
            return Err(DeviceError::InvalidProgram("empty image".to_string()));
        }
        let id = ProgramId(self.programs);
        self.programs += 1;
        log::info!(
            "built program #{} from {} byte image on {}",
            id.0,
            image.len(),
            self.device_name
        );
        Ok(id)
    }

    fn create_queue(&mut self) -> Result<QueueId, DeviceError> {
        let id = QueueId(self.queues);
        self.queues += 1;
        Ok(id)
    }

    fn create_buffer(
        &mut self,
        size_bytes: usize,
        access: BufferAccess,
        channel: MemoryChannel,
    ) -> Result<BufferId, DeviceError> {
        let base = self
            .memory
            .allocate(size_bytes, channel)
            .ok_or(DeviceError::BankExhausted {
                channel,
                requested: size_bytes,
            })?;
        self.buffers.push(BufferRecord {
            base,
            size: size_bytes,
            access,
            channel,
        });
        let id = BufferId(self.buffers.len() as u32 - 1);
        log::debug!(
            "buffer #{}: {} bytes at 0x{:08x} on {}",
            id.0,
            size_bytes,
            base,
            channel
        );
        Ok(id)
    }

    fn create_kernel(&mut self, program: ProgramId, name: &str) -> Result<KernelId, DeviceError> {
        if program.0 >= self.programs {
            return Err(DeviceError::InvalidHandle {
                kind: "program",
                id: program.0,
            });
        }
        if !KNOWN_KERNELS.contains(&name) {
            return Err(DeviceError::NoSuchKernel {
                name: name.to_string(),
            });
        }
        self.kernels.push(KernelRecord {
            name: name.to_string(),
            args: Vec::new(),
        });
        Ok(KernelId(self.kernels.len() as u32 - 1))
    }

    fn set_arg(
        &mut self,
        kernel: KernelId,
        index: usize,
        arg: KernelArg,
    ) -> Result<(), DeviceError> {
        let rec = self
            .kernels
            .get_mut(kernel.0 as usize)
            .ok_or(DeviceError::InvalidHandle {
                kind: "kernel",
                id: kernel.0,
            })?;
        if rec.args.len() <= index {
            rec.args.resize(index + 1, None);
        }
        rec.args[index] = Some(arg);
        Ok(())
    }

    fn enqueue_write(
        &mut self,
        queue: QueueId,
        buffer: BufferId,
        data: &[u8],
        mode: TransferMode,
        wait: &[CompletionSignal],
    ) -> Result<CompletionSignal, DeviceError> {
        self.check_queue(queue)?;
        self.check_wait(wait)?;
        let rec = self.buffer(buffer)?;
        if data.len() > rec.size {
            return Err(DeviceError::BufferSizeMismatch {
                capacity: rec.size,
                requested: data.len(),
            });
        }

        self.memory.write_bytes(rec.base, data);
        let signal = self.complete(TRANSFER_SETUP_CYCLES + burst_cycles(data.len() as u64));
        log::debug!(
            "write: {} bytes -> buffer #{} ({:?}, {} waits) -> {}",
            data.len(),
            buffer.0,
            mode,
            wait.len(),
            signal
        );
        Ok(signal)
    }

    fn enqueue_kernel(
        &mut self,
        queue: QueueId,
        kernel: KernelId,
        wait: &[CompletionSignal],
    ) -> Result<CompletionSignal, DeviceError> {
        self.check_queue(queue)?;
        self.check_wait(wait)?;
        let rec = self
            .kernels
            .get(kernel.0 as usize)
            .cloned()
            .ok_or(DeviceError::InvalidHandle {
                kind: "kernel",
                id: kernel.0,
            })?;

        let cycles = self.run_kernel(&rec)?;
        let signal = self.complete(cycles);
        log::debug!(
            "kernel \"{}\": {} cycles ({} waits) -> {}",
            rec.name,
            cycles,
            wait.len(),
            signal
        );
        Ok(signal)
    }

    fn enqueue_read(
        &mut self,
        queue: QueueId,
        buffer: BufferId,
        out: &mut [u8],
        wait: &[CompletionSignal],
    ) -> Result<CompletionSignal, DeviceError> {
        self.check_queue(queue)?;
        self.check_wait(wait)?;
        let rec = self.buffer(buffer)?;
        if out.len() > rec.size {
            return Err(DeviceError::BufferSizeMismatch {
                capacity: rec.size,
                requested: out.len(),
            });
        }

        self.memory.read_bytes(rec.base, out);
        let signal = self.complete(TRANSFER_SETUP_CYCLES + burst_cycles(out.len() as u64));
        log::debug!(
            "read: buffer #{} -> {} bytes ({} waits) -> {}",
            buffer.0,
            out.len(),
            wait.len(),
            signal
        );
        Ok(signal)
    }

    fn finish(&mut self, queue: QueueId) -> Result<(), DeviceError> {
        // Operations execute eagerly in submission order; once an enqueue
        // returns there is nothing left in flight.
        self.check_queue(queue)
    }

    fn profile_elapsed_ns(&self, signal: CompletionSignal) -> Result<u64, DeviceError> {
        let rec = self
            .signals
            .get(signal.raw() as usize)
            .ok_or(DeviceError::UnknownSignal(signal))?;
        Ok(rec.end_ns - rec.start_ns)
    }
}

impl std::fmt::Debug for EmulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedDevice")
            .field("device_name", &self.device_name)
            .field("buffers", &self.buffers.len())
            .field("kernels", &self.kernels.len())
            .field("signals", &self.signals.len())
            .field("linked", &self.link.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> EmulatedDevice {
        EmulatedDevice::with_clock("emu-test", 5.0)
    }

    #[test]
    fn test_build_program_rejects_empty_image() {
        let mut dev = device();
        assert!(matches!(
            dev.build_program(&[]),
            Err(DeviceError::InvalidProgram(_))
        ));
        assert!(dev.build_program(&[0xAA; 16]).is_ok());
    }

    #[test]
    fn test_unknown_kernel_name() {
        let mut dev = device();
        let prog = dev.build_program(&[1, 2, 3]).unwrap();
        assert!(matches!(
            dev.create_kernel(prog, "nonsense"),
            Err(DeviceError::NoSuchKernel { .. })
        ));
    }

    #[test]
    fn test_unknown_wait_signal_rejected() {
        let mut dev = device();
        let _prog = dev.build_program(&[1]).unwrap();
        let queue = dev.create_queue().unwrap();
        let buf = dev
            .create_buffer(64, BufferAccess::ReadOnly, MemoryChannel::Bank1)
            .unwrap();

        let ghost = CompletionSignal::from_raw(99);
        let result = dev.enqueue_write(queue, buf, &[0u8; 64], TransferMode::Blocking, &[ghost]);
        assert!(matches!(result, Err(DeviceError::UnknownSignal(_))));
    }

    #[test]
    fn test_write_too_large_rejected() {
        let mut dev = device();
        let queue = dev.create_queue().unwrap();
        let buf = dev
            .create_buffer(16, BufferAccess::ReadOnly, MemoryChannel::Bank1)
            .unwrap();
        let result = dev.enqueue_write(queue, buf, &[0u8; 32], TransferMode::Blocking, &[]);
        assert!(matches!(
            result,
            Err(DeviceError::BufferSizeMismatch {
                capacity: 16,
                requested: 32
            })
        ));
    }

    #[test]
    fn test_bandwidth_write_kernel_copies() {
        let mut dev = device();
        let prog = dev.build_program(&[1]).unwrap();
        let queue = dev.create_queue().unwrap();
        let n = 16usize;
        let y = dev
            .create_buffer(n * 4, BufferAccess::WriteOnly, MemoryChannel::Bank2)
            .unwrap();
        let x = dev
            .create_buffer(n * 4, BufferAccess::ReadOnly, MemoryChannel::Bank1)
            .unwrap();
        let kernel = dev.create_kernel(prog, "bandwidth_write").unwrap();
        dev.set_arg(kernel, 0, KernelArg::Buffer(y)).unwrap();
        dev.set_arg(kernel, 1, KernelArg::Buffer(x)).unwrap();
        dev.set_arg(kernel, 2, KernelArg::Uint(n as u32)).unwrap();

        let data: Vec<u8> = (0..n * 4).map(|i| i as u8).collect();
        let w = dev
            .enqueue_write(queue, x, &data, TransferMode::Blocking, &[])
            .unwrap();
        let k = dev.enqueue_kernel(queue, kernel, &[w]).unwrap();

        let mut out = vec![0u8; n * 4];
        dev.enqueue_read(queue, y, &mut out, &[k]).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_kernel_with_unset_argument() {
        let mut dev = device();
        let prog = dev.build_program(&[1]).unwrap();
        let queue = dev.create_queue().unwrap();
        let kernel = dev.create_kernel(prog, "bandwidth_read").unwrap();
        let result = dev.enqueue_kernel(queue, kernel, &[]);
        assert!(matches!(result, Err(DeviceError::ArgumentUnset { .. })));
    }

    #[test]
    fn test_profiled_time_is_positive_and_ordered() {
        let mut dev = device();
        let queue = dev.create_queue().unwrap();
        let buf = dev
            .create_buffer(256, BufferAccess::ReadOnly, MemoryChannel::Bank1)
            .unwrap();
        let s1 = dev
            .enqueue_write(queue, buf, &[0u8; 256], TransferMode::NonBlocking, &[])
            .unwrap();
        let s2 = dev
            .enqueue_write(queue, buf, &[0u8; 256], TransferMode::NonBlocking, &[s1])
            .unwrap();

        assert!(dev.profile_elapsed_ns(s1).unwrap() > 0);
        assert!(dev.profile_elapsed_ns(s2).unwrap() > 0);
    }

    #[test]
    fn test_send_without_link_fails() {
        let mut dev = device();
        let prog = dev.build_program(&[1]).unwrap();
        let queue = dev.create_queue().unwrap();
        let b = dev
            .create_buffer(32, BufferAccess::ReadWrite, MemoryChannel::Bank1)
            .unwrap();
        let kernel = dev.create_kernel(prog, "send").unwrap();
        dev.set_arg(kernel, 0, KernelArg::Buffer(b)).unwrap();
        dev.set_arg(kernel, 1, KernelArg::Uint(8)).unwrap();
        dev.set_arg(kernel, 2, KernelArg::Uint(0)).unwrap();
        assert!(matches!(
            dev.enqueue_kernel(queue, kernel, &[]),
            Err(DeviceError::ChannelDisconnected)
        ));
    }

    #[test]
    fn test_loopback_send_recv() {
        let mut dev = device();
        EmulatedDevice::link_loopback(&mut dev);

        let prog = dev.build_program(&[1]).unwrap();
        let queue = dev.create_queue().unwrap();
        let b_send = dev
            .create_buffer(32, BufferAccess::ReadWrite, MemoryChannel::Bank1)
            .unwrap();
        let b_recv = dev
            .create_buffer(32, BufferAccess::ReadWrite, MemoryChannel::Bank1)
            .unwrap();

        let send = dev.create_kernel(prog, "send").unwrap();
        dev.set_arg(send, 0, KernelArg::Buffer(b_send)).unwrap();
        dev.set_arg(send, 1, KernelArg::Uint(8)).unwrap();
        dev.set_arg(send, 2, KernelArg::Uint(0)).unwrap();

        let recv = dev.create_kernel(prog, "recv").unwrap();
        dev.set_arg(recv, 0, KernelArg::Buffer(b_recv)).unwrap();
        dev.set_arg(recv, 1, KernelArg::Uint(8)).unwrap();
        dev.set_arg(recv, 2, KernelArg::Uint(0)).unwrap();

        let payload: Vec<u8> = (0..32).collect();
        let w = dev
            .enqueue_write(queue, b_send, &payload, TransferMode::Blocking, &[])
            .unwrap();
        let ks = dev.enqueue_kernel(queue, send, &[w]).unwrap();
        let kr = dev.enqueue_kernel(queue, recv, &[ks]).unwrap();

        let mut out = vec![0u8; 32];
        dev.enqueue_read(queue, b_recv, &mut out, &[kr]).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_linked_pair_across_threads() {
        let mut a = device();
        let mut b = device();
        EmulatedDevice::link_pair(&mut a, &mut b);

        let payload: Vec<u8> = (0..64).rev().collect();
        let expected = payload.clone();

        let sender = std::thread::spawn(move || {
            let prog = a.build_program(&[1]).unwrap();
            let queue = a.create_queue().unwrap();
            let buf = a
                .create_buffer(64, BufferAccess::ReadWrite, MemoryChannel::Bank1)
                .unwrap();
            let k = a.create_kernel(prog, "send").unwrap();
            a.set_arg(k, 0, KernelArg::Buffer(buf)).unwrap();
            a.set_arg(k, 1, KernelArg::Uint(16)).unwrap();
            a.set_arg(k, 2, KernelArg::Uint(0)).unwrap();
            let w = a
                .enqueue_write(queue, buf, &payload, TransferMode::Blocking, &[])
                .unwrap();
            a.enqueue_kernel(queue, k, &[w]).unwrap();
        });

        let receiver = std::thread::spawn(move || {
            let prog = b.build_program(&[1]).unwrap();
            let queue = b.create_queue().unwrap();
            let buf = b
                .create_buffer(64, BufferAccess::ReadWrite, MemoryChannel::Bank1)
                .unwrap();
            let k = b.create_kernel(prog, "recv").unwrap();
            b.set_arg(k, 0, KernelArg::Buffer(buf)).unwrap();
            b.set_arg(k, 1, KernelArg::Uint(16)).unwrap();
            b.set_arg(k, 2, KernelArg::Uint(1)).unwrap();
            let kr = b.enqueue_kernel(queue, k, &[]).unwrap();
            let mut out = vec![0u8; 64];
            b.enqueue_read(queue, buf, &mut out, &[kr]).unwrap();
            out
        });

        sender.join().unwrap();
        let received = receiver.join().unwrap();
        assert_eq!(received, expected);
    }
}
