use crate::debug;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

const HEADER_LEN: usize = 4;
const MIN_CAPACITY: usize = HEADER_LEN + 2;

/// Outcome of handing a message to a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingStats {
    pub sent: u64,
    pub dropped: u64,
    pub received: u64,
    pub corrupt: u64,
}

struct Ring {
    buf: Box<[AtomicU8]>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    sent: AtomicU64,
    dropped: AtomicU64,
    received: AtomicU64,
    corrupt: AtomicU64,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            buf: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            received: AtomicU64::new(0),
            corrupt: AtomicU64::new(0),
        }
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn used(&self, write_pos: usize, read_pos: usize) -> usize {
        (write_pos + self.capacity() - read_pos) % self.capacity()
    }

    fn copy_in(&self, pos: usize, data: &[u8]) {
        let first = (self.capacity() - pos).min(data.len());
        let (head, tail) = data.split_at(first);
        for (slot, byte) in self.buf[pos..pos + first].iter().zip(head) {
            slot.store(*byte, Ordering::Relaxed);
        }
        for (slot, byte) in self.buf.iter().zip(tail) {
            slot.store(*byte, Ordering::Relaxed);
        }
    }

    fn copy_out(&self, pos: usize, out: &mut [u8]) {
        let first = (self.capacity() - pos).min(out.len());
        let (head, tail) = out.split_at_mut(first);
        for (byte, slot) in head.iter_mut().zip(&self.buf[pos..pos + first]) {
            *byte = slot.load(Ordering::Relaxed);
        }
        for (byte, slot) in tail.iter_mut().zip(self.buf.iter()) {
            *byte = slot.load(Ordering::Relaxed);
        }
    }

    fn stats(&self) -> RingStats {
        RingStats {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
        }
    }
}

/// Creates one ring direction holding `capacity` bytes. The consumer treats
/// frames longer than `max_message` as corrupt.
pub fn channel(capacity: usize, max_message: usize) -> (RingProducer, RingConsumer) {
    let ring = Arc::new(Ring::new(capacity.max(MIN_CAPACITY)));
    (
        RingProducer { ring: ring.clone() },
        RingConsumer { ring, max_message },
    )
}

pub struct RingProducer {
    ring: Arc<Ring>,
}

impl RingProducer {
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Bytes a frame may occupy right now, header included.
    pub fn free_space(&self) -> usize {
        let ring = &self.ring;
        let used = ring.used(
            ring.write_pos.load(Ordering::Relaxed),
            ring.read_pos.load(Ordering::Acquire),
        );
        ring.capacity() - used - 1
    }

    // Frame: u32 LE length, then the payload. Either part may wrap. Empty
    // and oversize payloads are dropped whole.
    pub fn send(&mut self, payload: &[u8]) -> Delivery {
        let ring = &self.ring;
        let write_pos = ring.write_pos.load(Ordering::Relaxed);
        let read_pos = ring.read_pos.load(Ordering::Acquire);
        let free = ring.capacity() - ring.used(write_pos, read_pos) - 1;
        let framed = HEADER_LEN + payload.len();

        let len = match u32::try_from(payload.len()) {
            Ok(len) if len > 0 && framed <= free => len,
            _ => {
                ring.dropped.fetch_add(1, Ordering::Relaxed);
                debug::trace_ring_drop(framed, free);
                return Delivery::Dropped;
            }
        };

        ring.copy_in(write_pos, &len.to_le_bytes());
        ring.copy_in((write_pos + HEADER_LEN) % ring.capacity(), payload);
        ring.write_pos
            .store((write_pos + framed) % ring.capacity(), Ordering::Release);
        ring.sent.fetch_add(1, Ordering::Relaxed);
        Delivery::Sent
    }

    pub fn stats(&self) -> RingStats {
        self.ring.stats()
    }
}

pub struct RingConsumer {
    ring: Arc<Ring>,
    max_message: usize,
}

impl RingConsumer {
    pub fn max_message(&self) -> usize {
        self.max_message
    }

    pub fn is_empty(&self) -> bool {
        self.ring.read_pos.load(Ordering::Relaxed) == self.ring.write_pos.load(Ordering::Acquire)
    }

    /// Pops one frame into `out`.
    pub fn receive_into(&mut self, out: &mut [u8]) -> Option<usize> {
        let limit = self.max_message.min(out.len());
        self.pop(limit, |ring, pos, len| {
            ring.copy_out(pos, &mut out[..len]);
            len
        })
    }

    /// Pops one frame into a buffer of exactly its length.
    pub fn receive(&mut self) -> Option<Bytes> {
        self.pop(self.max_message, |ring, pos, len| {
            let mut out = vec![0u8; len];
            ring.copy_out(pos, &mut out);
            Bytes::from(out)
        })
    }

    // A header whose length is zero, over `limit`, or longer than the bytes
    // actually written is corrupt: only the header is skipped.
    fn pop<T>(&mut self, limit: usize, read: impl FnOnce(&Ring, usize, usize) -> T) -> Option<T> {
        let ring = &*self.ring;
        let read_pos = ring.read_pos.load(Ordering::Relaxed);
        let write_pos = ring.write_pos.load(Ordering::Acquire);
        if read_pos == write_pos {
            return None;
        }

        let readable = ring.used(write_pos, read_pos);
        if readable < HEADER_LEN {
            log::warn!("ring holds {} bytes, less than a header, discarding", readable);
            ring.corrupt.fetch_add(1, Ordering::Relaxed);
            ring.read_pos.store(write_pos, Ordering::Release);
            return None;
        }

        let mut header = [0u8; HEADER_LEN];
        ring.copy_out(read_pos, &mut header);
        let len = u32::from_le_bytes(header) as usize;
        let payload_pos = (read_pos + HEADER_LEN) % ring.capacity();

        if len == 0 || len > limit || len > ring.capacity() || len > readable - HEADER_LEN {
            log::warn!(
                "corrupt ring frame: length {} (limit {}, readable {}), skipping header",
                len,
                limit,
                readable - HEADER_LEN
            );
            ring.corrupt.fetch_add(1, Ordering::Relaxed);
            ring.read_pos.store(payload_pos, Ordering::Release);
            return None;
        }

        let value = read(ring, payload_pos, len);
        ring.read_pos
            .store((payload_pos + len) % ring.capacity(), Ordering::Release);
        ring.received.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    pub fn stats(&self) -> RingStats {
        self.ring.stats()
    }
}

pub struct RingEnd {
    pub tx: RingProducer,
    pub rx: RingConsumer,
}

/// Two ring directions between an authority context and a presentation
/// context.
pub struct SharedMemory {
    pub authority: RingEnd,
    pub presentation: RingEnd,
}

impl SharedMemory {
    pub fn new(capacity: usize, max_message: usize) -> Self {
        let (down_tx, down_rx) = channel(capacity, max_message);
        let (up_tx, up_rx) = channel(capacity, max_message);
        Self {
            authority: RingEnd {
                tx: down_tx,
                rx: up_rx,
            },
            presentation: RingEnd {
                tx: up_tx,
                rx: down_rx,
            },
        }
    }
}
