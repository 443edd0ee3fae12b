//! Two-participant data relay between accelerator-owning processes.
//!
//! Each participant owns a private device. The originating participant
//! stages a payload into its device and runs the `send` kernel, which pushes
//! the payload into the device's point-to-point channel; the other
//! participant's `recv` kernel pulls it into its own device memory. The
//! receiver then reads its device buffer back and ships the copy to the
//! originator over the process-group transport, so the originator can check
//! lane-for-lane what the far end actually received — the receiver's
//! device-resident copy is not otherwise observable to the sender.
//!
//! # Protocol
//!
//! Per participant the run walks `Idle -> Loaded -> Dispatched -> Exchanged
//! -> Verified`. Barriers bracket the kernel window: every participant must
//! finish loading before any kernel opens the channel, every kernel must
//! retire before the exchange, and a closing barrier keeps devices alive
//! until nobody is still transmitting.
//!
//! Verification failures mark the run failed but do not abort it; device
//! and transport failures are fatal.

pub mod transport;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::bench::ExecutionPipeline;
use crate::device::{
    BufferAccess, DeviceError, DeviceSession, KernelArg, MemoryChannel, TransferMode,
};

pub use transport::{LocalTransport, Transport, TransportError};

/// Rank of the participant that originates the payload.
pub const SENDER_RANK: usize = 0;
/// Rank of the participant that receives it.
pub const RECEIVER_RANK: usize = 1;

/// Fixed-width vector of `f32` lanes exchanged between participants.
///
/// The final lane is excluded from random generation and pinned to zero;
/// the channel hardware reserves it.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayPayload {
    lanes: Vec<f32>,
}

impl RelayPayload {
    /// Lane width used by the relay host program.
    pub const WIDE: usize = 16;
    /// Narrow lane width used by the loopback variant and tests.
    pub const NARROW: usize = 8;

    /// Seed the host programs fill payloads with.
    pub const DEFAULT_SEED: u64 = 12345;

    /// An all-zero payload of the given width.
    pub fn zeroed(width: usize) -> Self {
        Self {
            lanes: vec![0.0; width],
        }
    }

    /// A payload with uniform random lanes in `[0, 1)` and a zero final lane.
    ///
    /// Deterministic for a fixed seed, so the expected value of a run is
    /// reproducible.
    pub fn random(width: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut lanes = vec![0.0f32; width];
        for lane in lanes.iter_mut().take(width.saturating_sub(1)) {
            *lane = rng.gen::<f32>();
        }
        Self { lanes }
    }

    /// Wrap an existing lane vector.
    pub fn from_lanes(lanes: Vec<f32>) -> Self {
        Self { lanes }
    }

    /// Number of lanes.
    pub fn width(&self) -> usize {
        self.lanes.len()
    }

    /// All lanes.
    pub fn lanes(&self) -> &[f32] {
        &self.lanes
    }

    /// One lane, if in range.
    pub fn lane(&self, index: usize) -> Option<f32> {
        self.lanes.get(index).copied()
    }

    /// Indices of lanes that differ from `other`, bitwise.
    ///
    /// A width difference marks every index of the wider payload from the
    /// point the narrower one ends.
    pub fn mismatched_lanes(&self, other: &RelayPayload) -> Vec<usize> {
        let shared = self.width().min(other.width());
        let widest = self.width().max(other.width());
        let mut mismatched: Vec<usize> = (0..shared)
            .filter(|&i| self.lanes[i].to_bits() != other.lanes[i].to_bits())
            .collect();
        mismatched.extend(shared..widest);
        mismatched
    }
}

/// Relay protocol state, per participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    /// Nothing staged yet.
    Idle,
    /// Payload resides in this participant's device buffer.
    Loaded,
    /// This participant's kernel has retired.
    Dispatched,
    /// The receiver's copy has crossed the transport.
    Exchanged,
    /// The originator has compared the copies.
    Verified,
}

/// What a participant contributes to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayRole {
    /// Stages the payload and runs the `send` kernel.
    Sender,
    /// Runs the `recv` kernel and returns what arrived.
    Receiver,
}

impl RelayRole {
    /// Role of a rank in the two-participant group.
    pub fn from_rank(rank: usize) -> Self {
        if rank == SENDER_RANK {
            RelayRole::Sender
        } else {
            RelayRole::Receiver
        }
    }

    /// Name of the device kernel this role launches.
    pub fn kernel_name(&self) -> &'static str {
        match self {
            RelayRole::Sender => "send",
            RelayRole::Receiver => "recv",
        }
    }
}

/// Errors that abort a relay run.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The accelerator runtime failed.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The process-group transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The relay protocol is defined for exactly two participants.
    #[error("relay needs exactly two participants, got {size}")]
    WrongWorldSize { size: usize },
}

/// Lane-by-lane comparison of the original payload against the relayed copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayVerification {
    /// Whether every lane matched.
    pub pass: bool,
    /// Indices of lanes that did not match.
    pub mismatched_lanes: Vec<usize>,
}

impl RelayVerification {
    fn compare(original: &RelayPayload, relayed: &RelayPayload) -> Self {
        let mismatched_lanes = original.mismatched_lanes(relayed);
        Self {
            pass: mismatched_lanes.is_empty(),
            mismatched_lanes,
        }
    }
}

/// Outcome of one participant's relay run.
#[derive(Debug, Clone)]
pub struct RelayReport {
    /// This participant's rank.
    pub rank: usize,
    /// This participant's role.
    pub role: RelayRole,
    /// Lane comparison; only the originator verifies.
    pub verification: Option<RelayVerification>,
}

impl RelayReport {
    /// Whether this participant considers the run passed.
    ///
    /// The receiver has no verification duty and always passes unless an
    /// error aborted the run before a report existed.
    pub fn passed(&self) -> bool {
        self.verification.as_ref().map_or(true, |v| v.pass)
    }
}

/// Drives one participant through the relay protocol.
pub struct RelayCoordinator<T: Transport> {
    transport: T,
    width: usize,
    seed: u64,
    phase: RelayPhase,
}

impl<T: Transport> RelayCoordinator<T> {
    /// Create a coordinator with the default payload seed.
    pub fn new(transport: T, width: usize) -> Self {
        Self::with_seed(transport, width, RelayPayload::DEFAULT_SEED)
    }

    /// Create a coordinator with an explicit payload seed.
    pub fn with_seed(transport: T, width: usize, seed: u64) -> Self {
        Self {
            transport,
            width,
            seed,
            phase: RelayPhase::Idle,
        }
    }

    /// Current protocol state.
    pub fn phase(&self) -> RelayPhase {
        self.phase
    }

    fn advance(&mut self, next: RelayPhase) {
        log::debug!(
            "rank {}: {:?} -> {:?}",
            self.transport.rank(),
            self.phase,
            next
        );
        self.phase = next;
    }

    /// Run the relay protocol on this participant's device session.
    ///
    /// The session's device must have its point-to-point channel wired to
    /// the peer participant's device.
    pub fn run(&mut self, session: &mut DeviceSession) -> Result<RelayReport, RelayError> {
        let size = self.transport.size();
        if size != 2 {
            return Err(RelayError::WrongWorldSize { size });
        }
        let rank = self.transport.rank();
        let role = RelayRole::from_rank(rank);
        log::info!("rank {}/{} running as {:?}", rank, size, role);

        // Idle -> Loaded: stage this participant's buffer. The sender loads
        // the generated payload, the receiver a zeroed landing buffer.
        let payload = match role {
            RelayRole::Sender => RelayPayload::random(self.width, self.seed),
            RelayRole::Receiver => RelayPayload::zeroed(self.width),
        };
        let buffer = session.create_buffer(
            self.width * 4,
            BufferAccess::ReadWrite,
            MemoryChannel::Bank1,
        )?;
        let kernel = session.create_kernel(role.kernel_name())?;
        session.set_args(
            kernel,
            &[
                KernelArg::Buffer(buffer),
                KernelArg::Uint(self.width as u32),
                KernelArg::Uint(rank as u32),
            ],
        )?;

        let mut pipe = ExecutionPipeline::new(session, kernel);
        let loaded = pipe.stage_write(
            buffer,
            &encode_lanes(payload.lanes()),
            TransferMode::Blocking,
            &[],
        )?;
        self.advance(RelayPhase::Loaded);

        // Nobody opens the channel window until everyone has loaded;
        // otherwise the receiver's kernel could start waiting on a channel
        // the sender has not produced into.
        self.transport.barrier()?;

        // Loaded -> Dispatched: run this participant's kernel.
        let dispatched = pipe.execute(&[loaded])?;
        self.advance(RelayPhase::Dispatched);

        // All kernels retire before anyone touches the exchanged data.
        self.transport.barrier()?;

        // Dispatched -> Exchanged -> Verified: the receiver reads its device
        // buffer back and ships the copy to the originator, who compares.
        let verification = match role {
            RelayRole::Receiver => {
                let (lanes, _sig) = pipe.read_f32s(buffer, self.width, &[dispatched])?;
                let relayed = RelayPayload::from_lanes(lanes);
                self.transport.send_payload(SENDER_RANK, &relayed)?;
                self.advance(RelayPhase::Exchanged);
                None
            }
            RelayRole::Sender => {
                let relayed = self.transport.recv_payload(RECEIVER_RANK)?;
                self.advance(RelayPhase::Exchanged);
                let verification = RelayVerification::compare(&payload, &relayed);
                if !verification.pass {
                    log::warn!(
                        "relay verification failed at lanes {:?}",
                        verification.mismatched_lanes
                    );
                }
                Some(verification)
            }
        };
        self.advance(RelayPhase::Verified);

        // Closing barrier: no participant tears its device down while the
        // other may still be transmitting.
        self.transport.barrier()?;

        Ok(RelayReport {
            rank,
            role,
            verification,
        })
    }
}

/// Run the loopback variant: both kernels on one device, two queues.
///
/// The payload round-trips through the device's internal channel and is
/// verified locally. The session's device must have its channel linked back
/// to itself.
pub fn run_loopback(
    session: &mut DeviceSession,
    width: usize,
    seed: u64,
) -> Result<RelayVerification, RelayError> {
    let payload = RelayPayload::random(width, seed);

    let b_send = session.create_buffer(width * 4, BufferAccess::ReadWrite, MemoryChannel::Bank1)?;
    let b_recv = session.create_buffer(width * 4, BufferAccess::ReadWrite, MemoryChannel::Bank1)?;

    let k_send = session.create_kernel("send")?;
    session.set_args(
        k_send,
        &[
            KernelArg::Buffer(b_send),
            KernelArg::Uint(width as u32),
            KernelArg::Uint(0),
        ],
    )?;
    let k_recv = session.create_kernel("recv")?;
    session.set_args(
        k_recv,
        &[
            KernelArg::Buffer(b_recv),
            KernelArg::Uint(width as u32),
            KernelArg::Uint(0),
        ],
    )?;

    let recv_queue = session.create_queue()?;

    // The send kernel must reach the channel before the recv kernel drains
    // it; the two queues are otherwise independent.
    let relayed = {
        let mut send_pipe = ExecutionPipeline::new(session, k_send);
        let loaded = send_pipe.write_f32s(b_send, payload.lanes(), TransferMode::Blocking, &[])?;
        send_pipe.execute(&[loaded])?;

        let mut recv_pipe = ExecutionPipeline::on_queue(session, k_recv, recv_queue);
        let done = recv_pipe.execute(&[])?;
        let (lanes, _sig) = recv_pipe.read_f32s(b_recv, width, &[done])?;
        RelayPayload::from_lanes(lanes)
    };

    Ok(RelayVerification::compare(&payload, &relayed))
}

fn encode_lanes(lanes: &[f32]) -> Vec<u8> {
    lanes.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::EmulatedDevice;

    fn open_session(dev: EmulatedDevice) -> DeviceSession {
        DeviceSession::open(Box::new(dev), &[0x55; 8]).unwrap()
    }

    fn linked_sessions() -> (DeviceSession, DeviceSession) {
        let mut a = EmulatedDevice::with_clock("emu0", 5.0);
        let mut b = EmulatedDevice::with_clock("emu1", 5.0);
        EmulatedDevice::link_pair(&mut a, &mut b);
        (open_session(a), open_session(b))
    }

    #[test]
    fn test_payload_sentinel_lane_is_zero() {
        let payload = RelayPayload::random(RelayPayload::NARROW, 42);
        assert_eq!(payload.width(), 8);
        assert_eq!(payload.lane(7), Some(0.0));
        // Other lanes did get filled.
        assert!(payload.lanes()[..7].iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_payload_deterministic_per_seed() {
        let a = RelayPayload::random(16, 7);
        let b = RelayPayload::random(16, 7);
        let c = RelayPayload::random(16, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_mismatched_lanes() {
        let a = RelayPayload::from_lanes(vec![1.0, 2.0, 3.0]);
        let mut lanes = a.lanes().to_vec();
        lanes[1] = 9.0;
        let b = RelayPayload::from_lanes(lanes);
        assert_eq!(a.mismatched_lanes(&b), vec![1]);
        assert!(a.mismatched_lanes(&a).is_empty());
    }

    #[test]
    fn test_mismatched_lanes_width_difference() {
        let a = RelayPayload::from_lanes(vec![1.0, 2.0, 3.0]);
        let b = RelayPayload::from_lanes(vec![1.0, 2.0]);
        assert_eq!(a.mismatched_lanes(&b), vec![2]);
    }

    #[test]
    fn test_round_trip_across_threads() {
        let (session_a, session_b) = linked_sessions();
        let (transport_a, transport_b) = LocalTransport::pair();

        let sender = std::thread::spawn(move || {
            let mut session = session_a;
            let mut coordinator =
                RelayCoordinator::with_seed(transport_a, RelayPayload::NARROW, 99);
            coordinator.run(&mut session).unwrap()
        });
        let receiver = std::thread::spawn(move || {
            let mut session = session_b;
            let mut coordinator =
                RelayCoordinator::with_seed(transport_b, RelayPayload::NARROW, 99);
            coordinator.run(&mut session).unwrap()
        });

        let report_a = sender.join().unwrap();
        let report_b = receiver.join().unwrap();

        assert_eq!(report_a.role, RelayRole::Sender);
        assert_eq!(report_b.role, RelayRole::Receiver);
        let verification = report_a.verification.expect("originator verifies");
        assert!(verification.pass, "lanes: {:?}", verification.mismatched_lanes);
        assert!(report_b.verification.is_none());
        assert!(report_b.passed());
    }

    /// Transport wrapper that corrupts one lane of every received payload.
    struct CorruptingTransport<T: Transport> {
        inner: T,
        lane: usize,
    }

    impl<T: Transport> Transport for CorruptingTransport<T> {
        fn rank(&self) -> usize {
            self.inner.rank()
        }
        fn size(&self) -> usize {
            self.inner.size()
        }
        fn barrier(&mut self) -> Result<(), TransportError> {
            self.inner.barrier()
        }
        fn send_payload(
            &mut self,
            to: usize,
            payload: &RelayPayload,
        ) -> Result<(), TransportError> {
            self.inner.send_payload(to, payload)
        }
        fn recv_payload(&mut self, from: usize) -> Result<RelayPayload, TransportError> {
            let payload = self.inner.recv_payload(from)?;
            let mut lanes = payload.lanes().to_vec();
            lanes[self.lane] += 1.0;
            Ok(RelayPayload::from_lanes(lanes))
        }
    }

    #[test]
    fn test_single_lane_corruption_detected_at_that_lane() {
        let (session_a, session_b) = linked_sessions();
        let (transport_a, transport_b) = LocalTransport::pair();
        let corrupted = CorruptingTransport {
            inner: transport_a,
            lane: 3,
        };

        let sender = std::thread::spawn(move || {
            let mut session = session_a;
            let mut coordinator =
                RelayCoordinator::with_seed(corrupted, RelayPayload::NARROW, 99);
            coordinator.run(&mut session).unwrap()
        });
        let receiver = std::thread::spawn(move || {
            let mut session = session_b;
            let mut coordinator =
                RelayCoordinator::with_seed(transport_b, RelayPayload::NARROW, 99);
            coordinator.run(&mut session).unwrap()
        });

        let report_a = sender.join().unwrap();
        receiver.join().unwrap();

        let verification = report_a.verification.clone().unwrap();
        assert!(!verification.pass);
        assert_eq!(verification.mismatched_lanes, vec![3]);
        assert!(!report_a.passed());
    }

    #[test]
    fn test_loopback_round_trip() {
        let mut dev = EmulatedDevice::with_clock("emu-loop", 5.0);
        EmulatedDevice::link_loopback(&mut dev);
        let mut session = open_session(dev);

        let verification = run_loopback(&mut session, RelayPayload::NARROW, 7).unwrap();
        assert!(verification.pass);
    }

    /// Transport stub reporting a world of one.
    struct LonelyTransport;

    impl Transport for LonelyTransport {
        fn rank(&self) -> usize {
            0
        }
        fn size(&self) -> usize {
            1
        }
        fn barrier(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn send_payload(&mut self, to: usize, _: &RelayPayload) -> Result<(), TransportError> {
            Err(TransportError::NoRoute(to))
        }
        fn recv_payload(&mut self, from: usize) -> Result<RelayPayload, TransportError> {
            Err(TransportError::NoRoute(from))
        }
    }

    #[test]
    fn test_wrong_world_size_rejected() {
        let dev = EmulatedDevice::with_clock("emu-solo", 5.0);
        let mut session = open_session(dev);
        let mut coordinator = RelayCoordinator::new(LonelyTransport, 8);
        assert!(matches!(
            coordinator.run(&mut session),
            Err(RelayError::WrongWorldSize { size: 1 })
        ));
    }
}
