//! Growable message buffer and its bounds-checked reader.

use super::WireError;

/// Round `n` up to the next multiple of 8.
pub fn align64(n: usize) -> usize {
    (n + 7) & !7
}

/// Append-only little-endian byte buffer.
///
/// Variable-length sections are written with the append-then-patch pattern:
/// reserve a fixed head, append the payloads, then [`MessageBuilder::patch_u16`]
/// / [`MessageBuilder::patch_u32`] the offsets once they are known.
#[derive(Debug, Default, Clone)]
pub struct MessageBuilder {
    buf: Vec<u8>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            buf: Vec::with_capacity(n),
        }
    }

    /// Current write position (bytes written so far).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn put_bool(&mut self, v: bool) -> &mut Self {
        self.put_u8(u8::from(v))
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_f64(&mut self, v: f64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// String followed by a NUL terminator.
    pub fn put_cstr(&mut self, s: &str) -> &mut Self {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        self
    }

    /// Fixed-width, NUL-padded string field. Longer input is truncated so that
    /// at least one NUL remains.
    pub fn put_fixed_str(&mut self, s: &str, width: usize) -> &mut Self {
        let take = s.len().min(width.saturating_sub(1));
        self.buf.extend_from_slice(&s.as_bytes()[..take]);
        self.buf.resize(self.buf.len() + (width - take), 0);
        self
    }

    /// Zero-pad to the next 64-bit boundary.
    pub fn pad64(&mut self) -> &mut Self {
        let target = align64(self.buf.len());
        self.buf.resize(target, 0);
        self
    }

    pub fn patch_u16(&mut self, at: usize, v: u16) {
        self.buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    pub fn patch_u32(&mut self, at: usize, v: u32) {
        self.buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received body. Every read checks bounds.
#[derive(Debug, Clone)]
pub struct MessageReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MessageReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), WireError> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, WireError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32, WireError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i64(&mut self) -> Result<i64, WireError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(raw))
    }

    pub fn f64(&mut self) -> Result<f64, WireError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(f64::from_le_bytes(raw))
    }

    /// NUL-terminated string starting at the cursor.
    pub fn cstr(&mut self) -> Result<&'a str, WireError> {
        let start = self.pos;
        let rest = &self.buf[start.min(self.buf.len())..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(WireError::Unterminated(start))?;
        let s = std::str::from_utf8(&rest[..nul]).map_err(|_| WireError::BadUtf8(start))?;
        self.pos += nul + 1;
        Ok(s)
    }

    /// Fixed-width NUL-padded string field.
    pub fn fixed_str(&mut self, width: usize) -> Result<&'a str, WireError> {
        let start = self.pos;
        let raw = self.take(width)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        std::str::from_utf8(&raw[..end]).map_err(|_| WireError::BadUtf8(start))
    }

    /// Advance to the next 64-bit boundary. Missing trailing padding at the
    /// very end of the buffer is tolerated.
    pub fn align64(&mut self) {
        self.pos = align64(self.pos).min(self.buf.len().max(self.pos));
    }
}
