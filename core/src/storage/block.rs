//! Block compression for timestamp/value columns.
//!
//! Timestamps are encoded as delta-of-delta: the first value raw, the first
//! delta and every later delta-of-delta ZigZag-mapped and LEB128
//! varint-encoded. Values are XORed against their predecessor and packed as a
//! control bit plus a (leading-zeros, meaningful-length) window, reusing the
//! previous window when the new XOR fits inside it. The codec is generic over
//! [`Value`]: each value's little-endian bytes are zero-extended into a
//! 64-bit lane for the XOR stream and written back through
//! [`Value::read_le`] on decode. Round-trips are exact for every input,
//! including NaN bit patterns.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::storage::Value;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("truncated block")]
    Truncated,

    #[error("column lengths differ: {timestamps} timestamps, {values} values")]
    LengthMismatch { timestamps: usize, values: usize },
}

/// Encodes parallel timestamp/value columns into a compressed block.
pub fn encode_block<T: Value>(timestamps: &[i64], values: &[T]) -> Result<Vec<u8>, BlockError> {
    if timestamps.len() != values.len() {
        return Err(BlockError::LengthMismatch {
            timestamps: timestamps.len(),
            values: values.len(),
        });
    }

    let mut out = Vec::with_capacity(16 + timestamps.len() * 4);
    let mut len_buf = [0u8; 4];
    LittleEndian::write_u32(&mut len_buf, timestamps.len() as u32);
    out.extend_from_slice(&len_buf);

    encode_timestamps(timestamps, &mut out);
    encode_values(values, &mut out);
    Ok(out)
}

/// Decodes a block produced by [`encode_block`] with the same value type.
pub fn decode_block<T: Value>(block: &[u8]) -> Result<(Vec<i64>, Vec<T>), BlockError> {
    if block.len() < 4 {
        return Err(BlockError::Truncated);
    }
    let count = LittleEndian::read_u32(&block[..4]) as usize;
    let mut pos = 4;

    let timestamps = decode_timestamps(block, &mut pos, count)?;
    let values = decode_values(block, pos, count)?;
    Ok((timestamps, values))
}

fn encode_timestamps(timestamps: &[i64], out: &mut Vec<u8>) {
    let Some(&first) = timestamps.first() else {
        return;
    };
    let mut buf = [0u8; 8];
    LittleEndian::write_i64(&mut buf, first);
    out.extend_from_slice(&buf);

    let mut prev = first;
    let mut prev_delta: i64 = 0;
    for (i, &ts) in timestamps.iter().enumerate().skip(1) {
        let delta = ts.wrapping_sub(prev);
        if i == 1 {
            write_varint(zigzag(delta), out);
        } else {
            write_varint(zigzag(delta.wrapping_sub(prev_delta)), out);
        }
        prev = ts;
        prev_delta = delta;
    }
}

fn decode_timestamps(block: &[u8], pos: &mut usize, count: usize) -> Result<Vec<i64>, BlockError> {
    let mut timestamps = Vec::with_capacity(count);
    if count == 0 {
        return Ok(timestamps);
    }
    if block.len() < *pos + 8 {
        return Err(BlockError::Truncated);
    }
    let first = LittleEndian::read_i64(&block[*pos..*pos + 8]);
    *pos += 8;
    timestamps.push(first);

    let mut prev = first;
    let mut prev_delta: i64 = 0;
    for i in 1..count {
        let raw = read_varint(block, pos)?;
        let delta = if i == 1 {
            unzigzag(raw)
        } else {
            prev_delta.wrapping_add(unzigzag(raw))
        };
        prev = prev.wrapping_add(delta);
        prev_delta = delta;
        timestamps.push(prev);
    }
    Ok(timestamps)
}

fn encode_values<T: Value>(values: &[T], out: &mut Vec<u8>) {
    let Some(&first) = values.first() else {
        return;
    };
    let mut buf = [0u8; 8];
    first.write_le(&mut buf[..T::SIZE]);
    out.extend_from_slice(&buf[..T::SIZE]);

    let mut writer = BitWriter::new();
    let mut prev = LittleEndian::read_u64(&buf);
    // Window of the last non-zero XOR: (leading zeros, meaningful length).
    let mut window: Option<(u32, u32)> = None;

    for &value in &values[1..] {
        let bits = value_bits(value);
        let xor = bits ^ prev;
        prev = bits;

        if xor == 0 {
            writer.write_bit(false);
            continue;
        }
        writer.write_bit(true);

        let leading = xor.leading_zeros().min(31);
        let trailing = xor.trailing_zeros();
        let meaningful = 64 - leading - trailing;

        let fits_window = window.is_some_and(|(lead, len)| {
            leading >= lead && leading + meaningful <= lead + len
        });
        if fits_window {
            let (lead, len) = window.expect("window checked above");
            writer.write_bit(false);
            writer.write_bits(xor >> (64 - lead - len), len);
        } else {
            writer.write_bit(true);
            writer.write_bits(leading as u64, 5);
            writer.write_bits((meaningful - 1) as u64, 6);
            writer.write_bits(xor >> trailing, meaningful);
            window = Some((leading, meaningful));
        }
    }
    writer.finish(out);
}

fn decode_values<T: Value>(block: &[u8], pos: usize, count: usize) -> Result<Vec<T>, BlockError> {
    let mut values = Vec::with_capacity(count);
    if count == 0 {
        return Ok(values);
    }
    if block.len() < pos + T::SIZE {
        return Err(BlockError::Truncated);
    }
    let mut buf = [0u8; 8];
    buf[..T::SIZE].copy_from_slice(&block[pos..pos + T::SIZE]);
    let first = LittleEndian::read_u64(&buf);
    values.push(T::read_le(&buf[..T::SIZE]));

    let mut reader = BitReader::new(&block[pos + T::SIZE..]);
    let mut prev = first;
    let mut window: Option<(u32, u32)> = None;

    for _ in 1..count {
        if !reader.read_bit()? {
            values.push(value_from_bits(prev));
            continue;
        }
        let xor = if reader.read_bit()? {
            let leading = reader.read_bits(5)? as u32;
            let meaningful = reader.read_bits(6)? as u32 + 1;
            window = Some((leading, meaningful));
            reader.read_bits(meaningful)? << (64 - leading - meaningful)
        } else {
            let (leading, meaningful) = window.ok_or(BlockError::Truncated)?;
            reader.read_bits(meaningful)? << (64 - leading - meaningful)
        };
        prev ^= xor;
        values.push(value_from_bits(prev));
    }
    Ok(values)
}

/// A value's little-endian bytes, zero-extended into a 64-bit lane.
fn value_bits<T: Value>(value: T) -> u64 {
    let mut buf = [0u8; 8];
    value.write_le(&mut buf[..T::SIZE]);
    LittleEndian::read_u64(&buf)
}

fn value_from_bits<T: Value>(bits: u64) -> T {
    let mut buf = [0u8; 8];
    LittleEndian::write_u64(&mut buf, bits);
    T::read_le(&buf[..T::SIZE])
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn write_varint(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(block: &[u8], pos: &mut usize) -> Result<u64, BlockError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let &byte = block.get(*pos).ok_or(BlockError::Truncated)?;
        *pos += 1;
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(BlockError::Truncated);
        }
    }
}

/// MSB-first bit packer.
struct BitWriter {
    bytes: Vec<u8>,
    // Bits already used in the last byte of `bytes`.
    used: u32,
}

impl BitWriter {
    fn new() -> Self {
        BitWriter {
            bytes: Vec::new(),
            used: 8,
        }
    }

    fn write_bit(&mut self, bit: bool) {
        if self.used == 8 {
            self.bytes.push(0);
            self.used = 0;
        }
        if bit {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 1 << (7 - self.used);
        }
        self.used += 1;
    }

    fn write_bits(&mut self, value: u64, count: u32) {
        for i in (0..count).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    fn finish(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.bytes);
    }
}

/// MSB-first bit reader.
struct BitReader<'a> {
    bytes: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        BitReader { bytes, bit: 0 }
    }

    fn read_bit(&mut self) -> Result<bool, BlockError> {
        let byte = self.bytes.get(self.bit / 8).ok_or(BlockError::Truncated)?;
        let bit = (byte >> (7 - (self.bit % 8) as u32)) & 1 == 1;
        self.bit += 1;
        Ok(bit)
    }

    fn read_bits(&mut self, count: u32) -> Result<u64, BlockError> {
        let mut value = 0u64;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value)
    }
}
