//! Primitive readers and writers for the wire format

use bytes::{Buf, BufMut, BytesMut};

use warpsync_core::{ClockTicks, SubspaceId, WarpError, WarpResult};

/// Longest string the codec accepts (player names, origin labels)
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Append-only payload writer
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        WireWriter {
            buf: BytesMut::with_capacity(64),
        }
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_f64_le(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    pub fn put_ticks(&mut self, v: ClockTicks) {
        self.put_i64(v.as_ticks());
    }

    pub fn put_subspace(&mut self, id: SubspaceId) {
        self.put_i32(id.to_wire());
    }

    /// Write a length-prefixed string, truncated at a char boundary if too long
    pub fn put_str(&mut self, s: &str) {
        let mut end = s.len().min(MAX_STRING_LEN);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.put_u16_le(end as u16);
        self.buf.put_slice(&s.as_bytes()[..end]);
    }

    pub fn finish(self) -> bytes::Bytes {
        self.buf.freeze()
    }
}

/// Bounds-checked payload reader
pub struct WireReader<'a> {
    buf: &'a [u8],
    consumed: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        WireReader { buf, consumed: 0 }
    }

    fn need(&self, n: usize) -> WarpResult<()> {
        if self.buf.remaining() < n {
            return Err(WarpError::BufferTooShort {
                expected: self.consumed + n,
                actual: self.consumed + self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn i32(&mut self) -> WarpResult<i32> {
        self.need(4)?;
        self.consumed += 4;
        Ok(self.buf.get_i32_le())
    }

    pub fn i64(&mut self) -> WarpResult<i64> {
        self.need(8)?;
        self.consumed += 8;
        Ok(self.buf.get_i64_le())
    }

    pub fn f32(&mut self) -> WarpResult<f32> {
        self.need(4)?;
        self.consumed += 4;
        Ok(self.buf.get_f32_le())
    }

    pub fn f64(&mut self) -> WarpResult<f64> {
        self.need(8)?;
        self.consumed += 8;
        Ok(self.buf.get_f64_le())
    }

    pub fn bool(&mut self) -> WarpResult<bool> {
        self.need(1)?;
        self.consumed += 1;
        match self.buf.get_u8() {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WarpError::InvalidWireFormat(format!(
                "invalid bool byte {other:#04x}"
            ))),
        }
    }

    pub fn ticks(&mut self) -> WarpResult<ClockTicks> {
        self.i64().map(ClockTicks::new)
    }

    pub fn subspace(&mut self) -> WarpResult<SubspaceId> {
        let raw = self.i32()?;
        SubspaceId::from_wire(raw)
            .ok_or_else(|| WarpError::InvalidWireFormat(format!("negative subspace id {raw}")))
    }

    pub fn string(&mut self) -> WarpResult<String> {
        self.need(2)?;
        let len = self.buf.get_u16_le() as usize;
        self.consumed += 2;
        self.need(len)?;
        let s = std::str::from_utf8(&self.buf[..len])
            .map_err(|e| WarpError::InvalidWireFormat(format!("invalid utf-8 string: {e}")))?
            .to_owned();
        self.buf.advance(len);
        self.consumed += len;
        Ok(s)
    }

    /// Fail if any bytes are left over
    pub fn finish(self) -> WarpResult<()> {
        if self.buf.has_remaining() {
            return Err(WarpError::InvalidWireFormat(format!(
                "{} trailing bytes",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}
