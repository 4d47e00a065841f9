//! Fixed-precision encoding of 2-D float blocks
//!
//! Values are quantized in 4×4 blocks against a shared per-block
//! exponent and bit-packed at `precision` bits per value, so the stored
//! error is bounded by the block's dynamic range divided by 2^precision.
//! The stream is self-delimiting only given the block dimensions and
//! precision, which travel separately on the wire.

use crate::error::{Error, Result};

const BLOCK_DIM: usize = 4;
const EXPONENT_BITS: u32 = 16;

const MIN_PRECISION: u32 = 2;
const MAX_PRECISION: u32 = 31;

/// Packs little-endian bit fields into a byte stream
struct BitWriter {
    bytes: Vec<u8>,
    acc: u64,
    filled: u32,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            acc: 0,
            filled: 0,
        }
    }

    fn write_bits(&mut self, value: u64, count: u32) {
        let mask = if count == 64 { u64::MAX } else { (1u64 << count) - 1 };
        self.acc |= (value & mask) << self.filled;
        self.filled += count;
        while self.filled >= 8 {
            self.bytes.push((self.acc & 0xFF) as u8);
            self.acc >>= 8;
            self.filled -= 8;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.bytes.push((self.acc & 0xFF) as u8);
        }
        self.bytes
    }
}

/// Reads little-endian bit fields from a byte stream
struct BitReader<'a> {
    data: &'a [u8],
    byte_index: usize,
    acc: u64,
    filled: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_index: 0,
            acc: 0,
            filled: 0,
        }
    }

    fn read_bits(&mut self, count: u32) -> Option<u64> {
        while self.filled < count {
            if self.byte_index >= self.data.len() {
                return None;
            }
            self.acc |= (self.data[self.byte_index] as u64) << self.filled;
            self.byte_index += 1;
            self.filled += 8;
        }
        let mask = if count == 64 { u64::MAX } else { (1u64 << count) - 1 };
        let value = self.acc & mask;
        self.acc >>= count;
        self.filled -= count;
        Some(value)
    }
}

fn check_precision(precision: u32) -> Result<()> {
    if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
        return Err(Error::InvalidParameter(format!(
            "precision {} outside supported range {}..={}",
            precision, MIN_PRECISION, MAX_PRECISION
        )));
    }
    Ok(())
}

/// Smallest e such that every finite |v| in the block is < 2^e
fn block_exponent(max_abs: f32) -> i32 {
    if max_abs == 0.0 {
        0
    } else {
        (((max_abs.to_bits() >> 23) & 0xFF) as i32) - 127 + 1
    }
}

fn sign_extend(raw: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

/// Encodes a `width` × `height` block at the given precision.
///
/// The input must already be NaN-free (see the `nan` module); remaining
/// non-finite values are clamped to the block range.
pub fn compress(block: &[f32], width: usize, height: usize, precision: u32) -> Result<Vec<u8>> {
    check_precision(precision)?;
    if block.len() < width * height {
        return Err(Error::InvalidParameter(format!(
            "block of {} values is smaller than {}x{}",
            block.len(),
            width,
            height
        )));
    }

    let mut writer = BitWriter::new();
    let limit = (1i64 << (precision - 1)) - 1;

    for by in (0..height).step_by(BLOCK_DIM) {
        for bx in (0..width).step_by(BLOCK_DIM) {
            let block_width = BLOCK_DIM.min(width - bx);
            let block_height = BLOCK_DIM.min(height - by);

            let mut max_abs = 0.0f32;
            for y in 0..block_height {
                for x in 0..block_width {
                    let v = block[(by + y) * width + bx + x];
                    if v.is_finite() {
                        max_abs = max_abs.max(v.abs());
                    }
                }
            }

            let exponent = block_exponent(max_abs);
            writer.write_bits((exponent as i16 as u16) as u64, EXPONENT_BITS);

            let scale = 2.0f64.powi(precision as i32 - 1 - exponent);
            for y in 0..block_height {
                for x in 0..block_width {
                    let v = block[(by + y) * width + bx + x];
                    let q = if v.is_finite() {
                        ((v as f64 * scale).round() as i64).clamp(-limit, limit)
                    } else if v > 0.0 {
                        limit
                    } else {
                        -limit
                    };
                    writer.write_bits(q as u64, precision);
                }
            }
        }
    }

    Ok(writer.finish())
}

/// Decodes a stream produced by [`compress`] with the same geometry and
/// precision
pub fn decompress(data: &[u8], width: usize, height: usize, precision: u32) -> Result<Vec<f32>> {
    check_precision(precision)?;

    let mut reader = BitReader::new(data);
    let mut out = vec![0.0f32; width * height];

    for by in (0..height).step_by(BLOCK_DIM) {
        for bx in (0..width).step_by(BLOCK_DIM) {
            let block_width = BLOCK_DIM.min(width - bx);
            let block_height = BLOCK_DIM.min(height - by);

            let exponent = reader
                .read_bits(EXPONENT_BITS)
                .ok_or_else(|| Error::DecodeFailure("truncated block header".to_string()))?
                as u16 as i16 as i32;
            let inv_scale = 2.0f64.powi(exponent - (precision as i32 - 1));

            for y in 0..block_height {
                for x in 0..block_width {
                    let raw = reader
                        .read_bits(precision)
                        .ok_or_else(|| Error::DecodeFailure("truncated value stream".to_string()))?;
                    let q = sign_extend(raw, precision);
                    out[(by + y) * width + bx + x] = (q as f64 * inv_scale) as f32;
                }
            }
        }
    }

    Ok(out)
}
