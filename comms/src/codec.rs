//! Body layouts for the parameter traffic.
//!
//! Every pull/push body starts with a tag byte:
//! * `'N'` sparse: repeated `varint key` (requests) or `varint key + f16 value`.
//! * `'T'` dense: repeated `varint offset + varint len` (requests) or
//!   `varint offset + varint len + len * f16`.

use std::io;

use half::f16;
use serde::{Deserialize, Serialize};

use crate::{Buffer, F16_SIZE, MAX_FRAME_LEN};

/// The most half precision values one frame can carry.
pub const MAX_TENSOR_LEN: usize = MAX_FRAME_LEN as usize / F16_SIZE;

/// The leading byte of a pull/push body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Sparse,
    Dense,
}

impl Tag {
    pub const SPARSE: u8 = b'N';
    pub const DENSE: u8 = b'T';

    /// Reads the tag at the cursor of `buf`.
    ///
    /// # Returns
    /// `None` if the buffer is empty, an error if the byte isn't a known tag.
    pub fn read(buf: &mut Buffer) -> io::Result<Option<Self>> {
        if buf.read_eof() {
            return Ok(None);
        }

        match buf.read_u8()? {
            Self::SPARSE => Ok(Some(Tag::Sparse)),
            Self::DENSE => Ok(Some(Tag::Dense)),
            byte => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("received an invalid body tag {byte:#04x}"),
            )),
        }
    }
}

/// A dense tensor addressed by its arena offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub offset: u64,
    pub values: Vec<f32>,
}

/// Encodes a sparse key list: `'N' (varint key)*`.
pub fn encode_keys<I: IntoIterator<Item = u64>>(keys: I) -> Buffer {
    let mut buf = Buffer::new();
    buf.put_u8(Tag::SPARSE);
    for key in keys {
        buf.put_varint(key);
    }
    buf
}

/// Encodes sparse pairs: `'N' (varint key, f16 value)*`.
pub fn encode_pairs<I: IntoIterator<Item = (u64, f32)>>(pairs: I) -> Buffer {
    let mut buf = Buffer::new();
    buf.put_u8(Tag::SPARSE);
    for (key, value) in pairs {
        buf.put_varint(key);
        buf.put_f16(value);
    }
    buf
}

/// Encodes tensor ranges: `'T' (varint offset, varint len)*`.
pub fn encode_ranges<I: IntoIterator<Item = (u64, usize)>>(ranges: I) -> Buffer {
    let mut buf = Buffer::new();
    buf.put_u8(Tag::DENSE);
    for (offset, len) in ranges {
        buf.put_varint(offset);
        buf.put_varint(len as u64);
    }
    buf
}

/// Starts a dense body, tensors are then added with `put_tensor`.
pub fn dense_body() -> Buffer {
    let mut buf = Buffer::new();
    buf.put_u8(Tag::DENSE);
    buf
}

/// Appends one tensor to a dense body: `varint offset, varint len, len * f16`.
pub fn put_tensor(buf: &mut Buffer, offset: u64, values: &[f32]) {
    buf.put_varint(offset);
    buf.put_varint(values.len() as u64);
    buf.put_f16_slice(values);
}

/// Decodes the remaining sparse keys.
pub fn decode_keys(buf: &mut Buffer) -> io::Result<Vec<u64>> {
    let mut keys = Vec::new();
    while !buf.read_eof() {
        keys.push(buf.read_varint()?);
    }
    Ok(keys)
}

/// Decodes the remaining sparse pairs.
pub fn decode_pairs(buf: &mut Buffer) -> io::Result<Vec<(u64, f32)>> {
    let mut pairs = Vec::new();
    while !buf.read_eof() {
        let key = buf.read_varint()?;
        let value = buf.read_f16()?;
        pairs.push((key, value));
    }
    Ok(pairs)
}

/// Decodes the remaining tensor ranges.
///
/// The answer to the ranges has to fit in one frame, so their summed length
/// is capped at `MAX_TENSOR_LEN`.
pub fn decode_ranges(buf: &mut Buffer) -> io::Result<Vec<(u64, usize)>> {
    let mut ranges = Vec::new();
    let mut total = 0usize;

    while !buf.read_eof() {
        let offset = buf.read_varint()?;
        let len = read_len(buf)?;

        total += len;
        if total > MAX_TENSOR_LEN {
            return Err(too_long(total));
        }
        ranges.push((offset, len));
    }
    Ok(ranges)
}

/// Decodes the remaining tensors.
pub fn decode_tensors(buf: &mut Buffer) -> io::Result<Vec<Tensor>> {
    let mut tensors = Vec::new();
    while !buf.read_eof() {
        let offset = buf.read_varint()?;
        let len = read_len(buf)?;
        let mut values = Vec::new();
        buf.read_f16_into(len, &mut values)?;
        tensors.push(Tensor { offset, values });
    }
    Ok(tensors)
}

fn read_len(buf: &mut Buffer) -> io::Result<usize> {
    let len = buf.read_varint()?;
    usize::try_from(len)
        .ok()
        .filter(|&len| len <= MAX_TENSOR_LEN)
        .ok_or_else(|| too_long(len))
}

fn too_long(len: impl std::fmt::Display) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("tensor length {len} exceeds the {MAX_TENSOR_LEN} values limit"),
    )
}

/// Accepts values whose magnitude lies in `[min, max]`.
///
/// The default window keeps everything that survives the narrowing to half precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MagnitudeFilter {
    pub min: f32,
    pub max: f32,
}

impl Default for MagnitudeFilter {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: f16::MAX.to_f32(),
        }
    }
}

impl MagnitudeFilter {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Returns whether `value` is finite and inside the magnitude window.
    pub fn accepts(&self, value: f32) -> bool {
        let magnitude = value.abs();
        value.is_finite() && magnitude >= self.min && magnitude <= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_pairs_layout() {
        let mut buf = encode_pairs([(7, 1.0), (300, -0.5)]);
        // tag + 1 byte key + f16 + 2 bytes key + f16
        assert_eq!(buf.len(), 1 + 1 + 2 + 2 + 2);

        assert_eq!(Tag::read(&mut buf).unwrap(), Some(Tag::Sparse));
        assert_eq!(decode_pairs(&mut buf).unwrap(), [(7, 1.0), (300, -0.5)]);
    }

    #[test]
    fn test_dense_tensors() {
        let mut buf = dense_body();
        put_tensor(&mut buf, 0, &[1.0, 2.0]);
        put_tensor(&mut buf, 2, &[3.0]);

        assert_eq!(Tag::read(&mut buf).unwrap(), Some(Tag::Dense));
        let tensors = decode_tensors(&mut buf).unwrap();
        assert_eq!(tensors.len(), 2);
        assert_eq!(tensors[0].values, [1.0, 2.0]);
        assert_eq!(tensors[1].offset, 2);
    }

    #[test]
    fn test_huge_tensor_len_is_rejected() {
        let mut buf = dense_body();
        buf.put_varint(0);
        buf.put_varint(u64::MAX / 2);
        buf.put_f16(1.0);

        Tag::read(&mut buf).unwrap();
        let err = decode_tensors(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        // Within the limit but longer than the body.
        let mut buf = dense_body();
        buf.put_varint(0);
        buf.put_varint(1000);
        buf.put_f16(1.0);

        Tag::read(&mut buf).unwrap();
        let err = decode_tensors(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_ranges_are_capped() {
        let mut buf = encode_ranges([(0, 4), (4, 2)]);
        Tag::read(&mut buf).unwrap();
        assert_eq!(decode_ranges(&mut buf).unwrap(), [(0, 4), (4, 2)]);

        let mut buf = encode_ranges([(0, MAX_TENSOR_LEN + 1)]);
        Tag::read(&mut buf).unwrap();
        assert!(decode_ranges(&mut buf).is_err());

        let mut buf = encode_ranges([(0, MAX_TENSOR_LEN), (1, 1)]);
        Tag::read(&mut buf).unwrap();
        assert!(decode_ranges(&mut buf).is_err());
    }

    #[test]
    fn test_empty_body_has_no_tag() {
        let mut buf = Buffer::new();
        assert_eq!(Tag::read(&mut buf).unwrap(), None);

        let mut bad = Buffer::from(vec![b'X']);
        assert!(Tag::read(&mut bad).is_err());
    }

    #[test]
    fn test_magnitude_filter() {
        let filter = MagnitudeFilter::default();
        assert!(filter.accepts(0.0));
        assert!(filter.accepts(-65504.0));
        assert!(!filter.accepts(70000.0));
        assert!(!filter.accepts(f32::NAN));
        assert!(!filter.accepts(f32::INFINITY));

        let narrow = MagnitudeFilter::new(1e-4, 10.0);
        assert!(!narrow.accepts(1e-6));
        assert!(narrow.accepts(-3.0));
    }
}
