use crate::error::{ReplicaError, Result};
use crate::ring::{RingEnd, RingStats, SharedMemory};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};

pub use crate::ring::Delivery;

#[cfg(feature = "async")]
use async_trait::async_trait;

const FRAME_HEADER_LEN: usize = 4;

/// Moves whole protocol messages between an authority and a presentation
/// side. Lossy transports report drops as [`Delivery::Dropped`], not as
/// errors.
pub trait Transport {
    fn send(&mut self, payload: &[u8]) -> Result<Delivery>;
    fn receive(&mut self) -> Result<Option<Bytes>>;
    fn close(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
}

#[cfg(feature = "async")]
#[async_trait]
pub trait AsyncTransport: Send {
    async fn send(&mut self, payload: &[u8]) -> Result<Delivery>;
    async fn receive(&mut self) -> Result<Option<Bytes>>;
    async fn close(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
}

type Queue = Arc<Mutex<VecDeque<Bytes>>>;

fn lock_failed<T>(_: T) -> ReplicaError {
    ReplicaError::Transport("memory queue lock poisoned".to_string())
}

pub struct MemoryTransport {
    outbound: Queue,
    inbound: Queue,
    max_message: usize,
    connected: bool,
}

impl MemoryTransport {
    pub fn pair(max_message: usize) -> (Self, Self) {
        let a_to_b = Queue::default();
        let b_to_a = Queue::default();
        (
            Self {
                outbound: a_to_b.clone(),
                inbound: b_to_a.clone(),
                max_message,
                connected: true,
            },
            Self {
                outbound: b_to_a,
                inbound: a_to_b,
                max_message,
                connected: true,
            },
        )
    }

    /// Messages waiting to be received on this end.
    pub fn pending(&self) -> Result<usize> {
        Ok(self.inbound.lock().map_err(lock_failed)?.len())
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, payload: &[u8]) -> Result<Delivery> {
        if !self.connected {
            return Err(ReplicaError::ConnectionClosed);
        }
        if payload.len() > self.max_message {
            return Err(ReplicaError::MessageTooLarge {
                size: payload.len(),
                max: self.max_message,
            });
        }

        self.outbound
            .lock()
            .map_err(lock_failed)?
            .push_back(Bytes::copy_from_slice(payload));
        Ok(Delivery::Sent)
    }

    fn receive(&mut self) -> Result<Option<Bytes>> {
        if !self.connected {
            return Err(ReplicaError::ConnectionClosed);
        }
        Ok(self.inbound.lock().map_err(lock_failed)?.pop_front())
    }

    fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.inbound.lock().map_err(lock_failed)?.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// One end of a [`SharedMemory`] ring pair.
pub struct RingTransport {
    end: RingEnd,
    connected: bool,
}

impl RingTransport {
    pub fn new(end: RingEnd) -> Self {
        Self {
            end,
            connected: true,
        }
    }

    pub fn pair(capacity: usize, max_message: usize) -> (Self, Self) {
        let shared = SharedMemory::new(capacity, max_message);
        (Self::new(shared.authority), Self::new(shared.presentation))
    }

    pub fn outbound_stats(&self) -> RingStats {
        self.end.tx.stats()
    }

    pub fn inbound_stats(&self) -> RingStats {
        self.end.rx.stats()
    }
}

impl Transport for RingTransport {
    fn send(&mut self, payload: &[u8]) -> Result<Delivery> {
        if !self.connected {
            return Err(ReplicaError::ConnectionClosed);
        }
        Ok(self.end.tx.send(payload))
    }

    fn receive(&mut self) -> Result<Option<Bytes>> {
        if !self.connected {
            return Err(ReplicaError::ConnectionClosed);
        }
        Ok(self.end.rx.receive())
    }

    fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Appends `payload` with its 4-byte little-endian length prefix.
pub fn encode_frame(payload: &[u8], out: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| ReplicaError::MessageTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    out.reserve(FRAME_HEADER_LEN + payload.len());
    out.put_u32_le(len);
    out.put_slice(payload);
    Ok(())
}

/// Reassembles length-prefixed frames from arbitrary stream chunks.
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame: usize,
}

impl FrameDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_frame,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete frame, if one is buffered. An oversize length is an
    /// error since a byte stream cannot skip it safely.
    pub fn try_next(&mut self) -> Result<Option<Bytes>> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_le_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;

        if len > self.max_frame {
            return Err(ReplicaError::MessageTooLarge {
                size: len,
                max: self.max_frame,
            });
        }
        if self.buffer.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }

        self.buffer.advance(FRAME_HEADER_LEN);
        Ok(Some(self.buffer.split_to(len).freeze()))
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

pub struct StreamTransport<S: Read + Write> {
    stream: S,
    decoder: FrameDecoder,
    scratch: Box<[u8]>,
    frame: BytesMut,
    max_message: usize,
    connected: bool,
}

impl<S: Read + Write> StreamTransport<S> {
    pub fn new(stream: S, max_message: usize) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(max_message),
            scratch: vec![0u8; 8192].into_boxed_slice(),
            frame: BytesMut::new(),
            max_message,
            connected: true,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write> Transport for StreamTransport<S> {
    fn send(&mut self, payload: &[u8]) -> Result<Delivery> {
        if !self.connected {
            return Err(ReplicaError::ConnectionClosed);
        }
        if payload.len() > self.max_message {
            return Err(ReplicaError::MessageTooLarge {
                size: payload.len(),
                max: self.max_message,
            });
        }

        self.frame.clear();
        encode_frame(payload, &mut self.frame)?;
        self.stream.write_all(&self.frame)?;
        self.stream.flush()?;
        Ok(Delivery::Sent)
    }

    /// Blocks on a blocking stream until a whole frame arrives. A
    /// non-blocking stream with nothing ready yields `None`.
    fn receive(&mut self) -> Result<Option<Bytes>> {
        if !self.connected {
            return Err(ReplicaError::ConnectionClosed);
        }

        loop {
            if let Some(frame) = self.decoder.try_next()? {
                return Ok(Some(frame));
            }

            match self.stream.read(&mut self.scratch) {
                Ok(0) => {
                    self.connected = false;
                    if self.decoder.buffered() > 0 {
                        log::warn!(
                            "stream closed with {} bytes of a partial frame",
                            self.decoder.buffered()
                        );
                    }
                    return Err(ReplicaError::ConnectionClosed);
                }
                Ok(n) => self.decoder.feed(&self.scratch[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.decoder.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(feature = "async")]
pub mod tcp {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpStream, ToSocketAddrs};

    /// [`StreamTransport`] framing over a tokio TCP stream.
    pub struct TcpTransport {
        stream: Option<TcpStream>,
        decoder: FrameDecoder,
        scratch: Box<[u8]>,
        max_message: usize,
    }

    impl TcpTransport {
        pub fn new(stream: TcpStream, max_message: usize) -> Self {
            Self {
                stream: Some(stream),
                decoder: FrameDecoder::new(max_message),
                scratch: vec![0u8; 8192].into_boxed_slice(),
                max_message,
            }
        }

        pub async fn connect(addr: impl ToSocketAddrs, max_message: usize) -> Result<Self> {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(Self::new(stream, max_message))
        }
    }

    #[async_trait]
    impl AsyncTransport for TcpTransport {
        async fn send(&mut self, payload: &[u8]) -> Result<Delivery> {
            if payload.len() > self.max_message {
                return Err(ReplicaError::MessageTooLarge {
                    size: payload.len(),
                    max: self.max_message,
                });
            }
            let stream = self.stream.as_mut().ok_or(ReplicaError::ConnectionClosed)?;

            let mut frame = BytesMut::new();
            encode_frame(payload, &mut frame)?;
            stream.write_all(&frame).await?;
            Ok(Delivery::Sent)
        }

        async fn receive(&mut self) -> Result<Option<Bytes>> {
            loop {
                if let Some(frame) = self.decoder.try_next()? {
                    return Ok(Some(frame));
                }

                let stream = self.stream.as_mut().ok_or(ReplicaError::ConnectionClosed)?;
                let n = stream.read(&mut self.scratch).await?;
                if n == 0 {
                    self.stream = None;
                    return Err(ReplicaError::ConnectionClosed);
                }
                self.decoder.feed(&self.scratch[..n]);
            }
        }

        async fn close(&mut self) -> Result<()> {
            if let Some(mut stream) = self.stream.take() {
                stream.shutdown().await?;
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.stream.is_some()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Loopback {
        incoming: Cursor<Vec<u8>>,
        outgoing: Vec<u8>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.incoming.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outgoing.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_memory_transport() {
        let (mut a, mut b) = MemoryTransport::pair(64);

        assert_eq!(a.send(b"tick").unwrap(), Delivery::Sent);
        assert_eq!(b.pending().unwrap(), 1);
        assert_eq!(b.receive().unwrap().unwrap().as_ref(), b"tick");
        assert!(b.receive().unwrap().is_none());

        assert!(matches!(
            a.send(&[0u8; 65]),
            Err(ReplicaError::MessageTooLarge { size: 65, max: 64 })
        ));
    }

    #[test]
    fn test_transport_close() {
        let (mut a, _b) = MemoryTransport::pair(64);
        assert!(a.is_connected());

        a.close().unwrap();
        assert!(!a.is_connected());
        assert!(matches!(a.send(b"x"), Err(ReplicaError::ConnectionClosed)));
    }

    #[test]
    fn test_ring_transport_reports_drops() {
        let (mut authority, mut presentation) = RingTransport::pair(64, 64);

        for _ in 0..3 {
            assert_eq!(authority.send(&[9u8; 16]).unwrap(), Delivery::Sent);
        }
        assert_eq!(authority.send(&[9u8; 16]).unwrap(), Delivery::Dropped);
        assert_eq!(authority.outbound_stats().dropped, 1);

        let mut received = 0;
        while presentation.receive().unwrap().is_some() {
            received += 1;
        }
        assert_eq!(received, 3);
        assert_eq!(presentation.inbound_stats().received, 3);
    }

    #[test]
    fn test_frame_decoder_reassembles_chunks() {
        let mut wire = BytesMut::new();
        encode_frame(b"alpha", &mut wire).unwrap();
        encode_frame(b"be", &mut wire).unwrap();

        let mut decoder = FrameDecoder::new(64);
        for chunk in wire.chunks(3) {
            decoder.feed(chunk);
        }

        assert_eq!(decoder.try_next().unwrap().unwrap().as_ref(), b"alpha");
        assert_eq!(decoder.try_next().unwrap().unwrap().as_ref(), b"be");
        assert!(decoder.try_next().unwrap().is_none());
    }

    #[test]
    fn test_frame_decoder_rejects_oversize() {
        let mut wire = BytesMut::new();
        encode_frame(&[0u8; 32], &mut wire).unwrap();

        let mut decoder = FrameDecoder::new(16);
        decoder.feed(&wire);
        assert!(matches!(
            decoder.try_next(),
            Err(ReplicaError::MessageTooLarge { size: 32, max: 16 })
        ));
    }

    #[test]
    fn test_stream_transport() {
        let mut wire = BytesMut::new();
        encode_frame(b"hello", &mut wire).unwrap();
        encode_frame(b"world", &mut wire).unwrap();

        let stream = Loopback {
            incoming: Cursor::new(wire.to_vec()),
            outgoing: Vec::new(),
        };
        let mut transport = StreamTransport::new(stream, 64);

        transport.send(b"up").unwrap();
        assert_eq!(transport.get_ref().outgoing, vec![2, 0, 0, 0, b'u', b'p']);

        assert_eq!(transport.receive().unwrap().unwrap().as_ref(), b"hello");
        assert_eq!(transport.receive().unwrap().unwrap().as_ref(), b"world");
        assert!(matches!(
            transport.receive(),
            Err(ReplicaError::ConnectionClosed)
        ));
        assert!(!transport.is_connected());
    }
}
