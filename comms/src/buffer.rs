//! A growable byte buffer with a read cursor, the payload of every message.

use std::io;

use half::f16;
use unsigned_varint::{decode, encode};

/// The size in bytes of a half precision float on the wire.
pub const F16_SIZE: usize = size_of::<f16>();

/// Growable byte buffer, appended at the end and read through a cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
    cursor: usize,
}

impl Buffer {
    /// Creates a new empty `Buffer`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The amount of bytes left between the cursor and the end.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// Whether the cursor reached the end of the written data.
    pub fn read_eof(&self) -> bool {
        self.cursor == self.data.len()
    }

    /// Clears the contents and rewinds the cursor.
    pub fn reset(&mut self) {
        self.data.clear();
        self.cursor = 0;
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn put_u8(&mut self, byte: u8) {
        self.data.push(byte);
    }

    /// Appends `n` as an unsigned LEB128 varint.
    pub fn put_varint(&mut self, n: u64) {
        let mut scratch = encode::u64_buffer();
        self.data.extend_from_slice(encode::u64(n, &mut scratch));
    }

    /// Narrows `value` to half precision and appends it.
    pub fn put_f16(&mut self, value: f32) {
        self.data
            .extend_from_slice(&f16::from_f32(value).to_le_bytes());
    }

    /// Narrows every value to half precision and appends them.
    pub fn put_f16_slice(&mut self, values: &[f32]) {
        self.data.reserve(values.len() * F16_SIZE);
        for &value in values {
            self.put_f16(value);
        }
    }

    /// Appends a varint length prefix followed by the bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_varint(bytes.len() as u64);
        self.append(bytes);
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let [byte] = self.read_array::<1>()?;
        Ok(byte)
    }

    /// Reads an unsigned LEB128 varint.
    pub fn read_varint(&mut self) -> io::Result<u64> {
        let rest = &self.data[self.cursor..];
        let (n, tail) = decode::u64(rest)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        self.cursor += rest.len() - tail.len();
        Ok(n)
    }

    /// Reads a half precision float widened back to `f32`.
    pub fn read_f16(&mut self) -> io::Result<f32> {
        let bytes = self.read_array::<F16_SIZE>()?;
        Ok(f16::from_le_bytes(bytes).to_f32())
    }

    /// Reads `n` half precision floats into `out`.
    ///
    /// The count is checked against the unread bytes before `out` grows.
    pub fn read_f16_into(&mut self, n: usize, out: &mut Vec<f32>) -> io::Result<()> {
        let Some(len) = n.checked_mul(F16_SIZE) else {
            return Self::buf_is_too_small(self.remaining(), usize::MAX);
        };

        let bytes = self.read_slice(len)?;
        let halves: &[[u8; F16_SIZE]] = bytemuck::cast_slice(bytes);

        out.reserve(n);
        out.extend(halves.iter().map(|&b| f16::from_le_bytes(b).to_f32()));
        Ok(())
    }

    /// Reads a varint length prefix and that many bytes.
    pub fn read_bytes(&mut self) -> io::Result<&[u8]> {
        let len = self.read_varint()? as usize;
        self.read_slice(len)
    }

    /// Returns the unread bytes and moves the cursor to the end.
    pub fn read_rest(&mut self) -> &[u8] {
        let start = self.cursor;
        self.cursor = self.data.len();
        &self.data[start..]
    }

    fn read_slice(&mut self, len: usize) -> io::Result<&[u8]> {
        if self.remaining() < len {
            return Self::buf_is_too_small(self.remaining(), len);
        }

        let start = self.cursor;
        self.cursor += len;
        Ok(&self.data[start..self.cursor])
    }

    fn read_array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut array = [0; N];
        array.copy_from_slice(self.read_slice(N)?);
        Ok(array)
    }

    fn buf_is_too_small<T>(remaining: usize, needed: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("buffer has {remaining} unread bytes, needed {needed}"),
        ))
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data, cursor: 0 }
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Self {
        Self::from(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_uses_few_bytes() {
        let mut buf = Buffer::new();
        buf.put_varint(7);
        buf.put_varint(300);
        buf.put_varint(u64::MAX);
        assert_eq!(buf.len(), 1 + 2 + 10);

        assert_eq!(buf.read_varint().unwrap(), 7);
        assert_eq!(buf.read_varint().unwrap(), 300);
        assert_eq!(buf.read_varint().unwrap(), u64::MAX);
        assert!(buf.read_eof());
    }

    #[test]
    fn test_half_precision_is_lossy() {
        let mut buf = Buffer::new();
        buf.put_f16(1.0);
        buf.put_f16(0.1);

        assert_eq!(buf.read_f16().unwrap(), 1.0);
        let narrowed = buf.read_f16().unwrap();
        assert_ne!(narrowed, 0.1);
        assert!((narrowed - 0.1).abs() < 1e-3);
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut buf = Buffer::from(vec![1u8]);
        assert_eq!(buf.read_u8().unwrap(), 1);
        assert_eq!(
            buf.read_u8().unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );

        let mut truncated = Buffer::from(vec![0x80u8]);
        assert!(truncated.read_varint().is_err());
    }

    #[test]
    fn test_f16_slice_and_bytes() {
        let mut buf = Buffer::new();
        buf.put_bytes(b"tcp://1.2.3.4:5");
        buf.put_f16_slice(&[1.0, 2.0, -4.0]);

        assert_eq!(buf.read_bytes().unwrap(), b"tcp://1.2.3.4:5");
        let mut out = Vec::new();
        buf.read_f16_into(3, &mut out).unwrap();
        assert_eq!(out, [1.0, 2.0, -4.0]);
        assert!(buf.read_eof());
    }

    #[test]
    fn test_f16_count_is_checked_before_growing() {
        let mut buf = Buffer::new();
        buf.put_f16(1.0);

        let mut out = Vec::new();
        assert!(buf.read_f16_into(usize::MAX, &mut out).is_err());
        assert!(buf.read_f16_into(2, &mut out).is_err());
        assert_eq!(out.capacity(), 0);

        buf.read_f16_into(1, &mut out).unwrap();
        assert_eq!(out, [1.0]);
    }
}
