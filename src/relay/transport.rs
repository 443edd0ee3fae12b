//! Process-group transport for the relay protocol.
//!
//! The relay needs very little from its transport: rank and world size, a
//! collective barrier, and ordered point-to-point delivery of one payload
//! per message between a fixed pair of participants. Any failure is fatal
//! to the run for every participant, because the barrier/message protocol
//! cannot proceed asymmetrically.
//!
//! Messages between the same ordered pair are never reordered, and at least
//! one message per ordered pair may be in flight. There are no timeouts: a
//! vanished peer blocks the caller indefinitely.

use std::io::Cursor;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier};

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

use super::RelayPayload;

/// Errors reported by a transport. All fatal.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer's endpoint is gone.
    #[error("participant {0} disconnected")]
    Disconnected(usize),

    /// No channel exists toward that participant.
    #[error("no route to participant {0}")]
    NoRoute(usize),

    /// A received frame did not decode to a payload.
    #[error("malformed relay frame: {0}")]
    MalformedFrame(String),
}

/// Capability surface of the process-group transport.
pub trait Transport {
    /// This participant's rank in the group.
    fn rank(&self) -> usize;

    /// Number of participants in the group.
    fn size(&self) -> usize;

    /// Block until every participant has entered the barrier.
    fn barrier(&mut self) -> Result<(), TransportError>;

    /// Send one payload to a participant.
    fn send_payload(&mut self, to: usize, payload: &RelayPayload)
        -> Result<(), TransportError>;

    /// Receive one payload from a participant. Blocks until it arrives.
    fn recv_payload(&mut self, from: usize) -> Result<RelayPayload, TransportError>;
}

/// Encode a payload as a wire frame: lane count, then little-endian lanes.
pub fn encode_payload(payload: &RelayPayload) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + payload.width() * 4);
    frame.extend_from_slice(&(payload.width() as u32).to_le_bytes());
    for lane in payload.lanes() {
        frame.extend_from_slice(&lane.to_le_bytes());
    }
    frame
}

/// Decode a wire frame back into a payload.
pub fn decode_payload(frame: &[u8]) -> Result<RelayPayload, TransportError> {
    let mut cursor = Cursor::new(frame);
    let width = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| TransportError::MalformedFrame(e.to_string()))? as usize;

    let mut lanes = Vec::with_capacity(width);
    for _ in 0..width {
        let lane = cursor
            .read_f32::<LittleEndian>()
            .map_err(|e| TransportError::MalformedFrame(e.to_string()))?;
        lanes.push(lane);
    }
    if cursor.position() as usize != frame.len() {
        return Err(TransportError::MalformedFrame(format!(
            "{} trailing bytes",
            frame.len() - cursor.position() as usize
        )));
    }
    Ok(RelayPayload::from_lanes(lanes))
}

/// In-process transport connecting two participants on separate threads.
///
/// Each endpoint owns one direction of a duplex channel pair plus a shared
/// barrier. Channels deliver in order, so the per-pair non-reordering
/// guarantee holds by construction.
pub struct LocalTransport {
    rank: usize,
    peer: usize,
    barrier: Arc<Barrier>,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl LocalTransport {
    /// Create both endpoints of a two-participant group.
    pub fn pair() -> (LocalTransport, LocalTransport) {
        let barrier = Arc::new(Barrier::new(2));
        let (tx_01, rx_01) = channel();
        let (tx_10, rx_10) = channel();

        let rank0 = LocalTransport {
            rank: 0,
            peer: 1,
            barrier: Arc::clone(&barrier),
            tx: tx_01,
            rx: rx_10,
        };
        let rank1 = LocalTransport {
            rank: 1,
            peer: 0,
            barrier,
            tx: tx_10,
            rx: rx_01,
        };
        (rank0, rank1)
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        2
    }

    fn barrier(&mut self) -> Result<(), TransportError> {
        log::debug!("rank {} entering barrier", self.rank);
        self.barrier.wait();
        Ok(())
    }

    fn send_payload(
        &mut self,
        to: usize,
        payload: &RelayPayload,
    ) -> Result<(), TransportError> {
        if to != self.peer {
            return Err(TransportError::NoRoute(to));
        }
        self.tx
            .send(encode_payload(payload))
            .map_err(|_| TransportError::Disconnected(to))
    }

    fn recv_payload(&mut self, from: usize) -> Result<RelayPayload, TransportError> {
        if from != self.peer {
            return Err(TransportError::NoRoute(from));
        }
        let frame = self
            .rx
            .recv()
            .map_err(|_| TransportError::Disconnected(from))?;
        decode_payload(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_round_trip() {
        let payload = RelayPayload::from_lanes(vec![0.5, -1.25, 0.0, 3.75]);
        let frame = encode_payload(&payload);
        let decoded = decode_payload(&frame).unwrap();
        assert_eq!(decoded.lanes(), payload.lanes());
    }

    #[test]
    fn test_decode_rejects_truncated_frame() {
        let payload = RelayPayload::from_lanes(vec![1.0, 2.0]);
        let mut frame = encode_payload(&payload);
        frame.pop();
        assert!(matches!(
            decode_payload(&frame),
            Err(TransportError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let payload = RelayPayload::from_lanes(vec![1.0]);
        let mut frame = encode_payload(&payload);
        frame.push(0xFF);
        assert!(matches!(
            decode_payload(&frame),
            Err(TransportError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_pair_delivers_in_order() {
        let (mut a, mut b) = LocalTransport::pair();
        assert_eq!(a.rank(), 0);
        assert_eq!(b.rank(), 1);
        assert_eq!(a.size(), 2);

        let first = RelayPayload::from_lanes(vec![1.0]);
        let second = RelayPayload::from_lanes(vec![2.0]);
        a.send_payload(1, &first).unwrap();
        a.send_payload(1, &second).unwrap();

        assert_eq!(b.recv_payload(0).unwrap().lanes(), first.lanes());
        assert_eq!(b.recv_payload(0).unwrap().lanes(), second.lanes());
    }

    #[test]
    fn test_no_route_to_self() {
        let (mut a, _b) = LocalTransport::pair();
        let payload = RelayPayload::from_lanes(vec![1.0]);
        assert!(matches!(
            a.send_payload(0, &payload),
            Err(TransportError::NoRoute(0))
        ));
    }

    #[test]
    fn test_disconnected_peer() {
        let (mut a, b) = LocalTransport::pair();
        drop(b);
        let payload = RelayPayload::from_lanes(vec![1.0]);
        assert!(matches!(
            a.send_payload(1, &payload),
            Err(TransportError::Disconnected(1))
        ));
        assert!(matches!(
            a.recv_payload(1),
            Err(TransportError::Disconnected(1))
        ));
    }

    #[test]
    fn test_barrier_synchronizes_threads() {
        let (mut a, mut b) = LocalTransport::pair();
        let handle = std::thread::spawn(move || {
            b.barrier().unwrap();
            b.rank()
        });
        a.barrier().unwrap();
        assert_eq!(handle.join().unwrap(), 1);
    }
}
