use crate::error::{ReplicaError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

// Varints carry 7 bits per byte, low group first. Fixed-width values are
// little-endian.
pub const MAX_VARINT_LEN: usize = 10;

/// Bounded writer. Every write checks the limit first and fails without
/// writing anything when the value would not fit.
pub struct Encoder {
    buf: BytesMut,
    limit: usize,
}

impl Encoder {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit.min(8192)),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Hands out the written bytes and leaves the encoder empty for reuse.
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    fn reserve(&self, n: usize) -> Result<()> {
        let needed = self.buf.len() + n;
        if needed > self.limit {
            return Err(ReplicaError::BufferFull {
                needed,
                limit: self.limit,
            });
        }
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.reserve(1)?;
        self.buf.put_u8(value);
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.reserve(4)?;
        self.buf.put_u32_le(value);
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.reserve(8)?;
        self.buf.put_u64_le(value);
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.reserve(4)?;
        self.buf.put_f32_le(value);
        Ok(())
    }

    pub fn write_varuint(&mut self, mut value: u64) -> Result<()> {
        self.reserve(varuint_len(value))?;
        while value >= 0x80 {
            self.buf.put_u8((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
        Ok(())
    }

    /// Writes at most `max_len` bytes of `data`, length-prefixed.
    pub fn write_bytes(&mut self, data: &[u8], max_len: usize) -> Result<()> {
        let data = &data[..data.len().min(max_len)];
        self.reserve(varuint_len(data.len() as u64) + data.len())?;
        self.write_varuint(data.len() as u64)?;
        self.buf.put_slice(data);
        Ok(())
    }

    /// Writes at most `max_len` bytes of `value`, cut back to a char boundary.
    pub fn write_string(&mut self, value: &str, max_len: usize) -> Result<()> {
        let mut end = value.len().min(max_len);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.write_bytes(&value.as_bytes()[..end], max_len)
    }
}

pub fn varuint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

pub struct Decoder<'a> {
    cur: &'a [u8],
    total: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cur: data,
            total: data.len(),
        }
    }

    pub fn position(&self) -> usize {
        self.total - self.cur.len()
    }

    pub fn remaining(&self) -> usize {
        self.cur.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cur.is_empty()
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.cur.len() < needed {
            return Err(ReplicaError::UnexpectedEof {
                needed,
                remaining: self.cur.len(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.cur.get_u8())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.cur.get_u32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.cur.get_u64_le())
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.ensure(4)?;
        Ok(self.cur.get_f32_le())
    }

    pub fn read_varuint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            let group = u64::from(byte & 0x7f);
            let shift = 7 * i as u32;
            if shift == 63 && group > 1 {
                return Err(ReplicaError::VarintOverflow);
            }
            value |= group << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ReplicaError::VarintOverflow)
    }

    /// Reads a length-prefixed byte string, keeping at most `max_len` bytes.
    /// The full encoded length is always consumed.
    pub fn read_bytes(&mut self, max_len: usize) -> Result<&'a [u8]> {
        let len = self.read_varuint()?;
        let len = usize::try_from(len).map_err(|_| ReplicaError::UnexpectedEof {
            needed: usize::MAX,
            remaining: self.cur.len(),
        })?;
        self.ensure(len)?;
        let cur: &'a [u8] = self.cur;
        self.cur.advance(len);
        Ok(&cur[..len.min(max_len)])
    }

    pub fn read_string(&mut self, max_len: usize) -> Result<String> {
        let data = self.read_bytes(max_len)?;
        Ok(String::from_utf8_lossy(data).into_owned())
    }
}
