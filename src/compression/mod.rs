//! Tile compression pipeline
//!
//! Compressing a tile is a three-step pipeline: record NaN positions as
//! run lengths, substitute the NaNs with compressible surrogates, then
//! encode the block at a fixed precision. Decompression runs the same
//! steps backwards, so NaN positions survive the lossy codec exactly.

pub mod nan;
pub mod precision;

use crate::error::{Error, Result};

/// Compresses one block in place.
///
/// The block is modified by NaN substitution. Returns the encoded bytes
/// and the NaN run lengths; fails iff the encoder produced no output.
pub fn compress_tile(
    block: &mut [f32],
    width: usize,
    height: usize,
    precision_bits: u32,
) -> Result<(Vec<u8>, Vec<i32>)> {
    let nan_runs = nan::nan_encodings_block(block, width, height);
    let bytes = precision::compress(block, width, height, precision_bits)?;
    if bytes.is_empty() {
        return Err(Error::DecodeFailure(
            "compressor produced no output".to_string(),
        ));
    }
    Ok((bytes, nan_runs))
}

/// Restores a block from its encoded bytes and NaN run lengths
pub fn decompress_tile(
    bytes: &[u8],
    width: usize,
    height: usize,
    precision_bits: u32,
    nan_runs: &[i32],
) -> Result<Vec<f32>> {
    let mut values = precision::decompress(bytes, width, height, precision_bits)?;
    nan::restore_nans(&mut values, nan_runs);
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_round_trip_restores_nans() {
        // S2: [1, NaN, NaN, 2] at precision 16
        let original = vec![1.0, f32::NAN, f32::NAN, 2.0];
        let mut block = original.clone();

        let (bytes, runs) = compress_tile(&mut block, 4, 1, 16).unwrap();
        assert_eq!(runs, vec![1, 2, 1]);

        let restored = decompress_tile(&bytes, 4, 1, 16, &runs).unwrap();
        assert_eq!(restored[0], 1.0);
        assert!(restored[1].is_nan());
        assert!(restored[2].is_nan());
        assert_eq!(restored[3], 2.0);
    }

    #[test]
    fn test_pipeline_round_trip_bounded_error() {
        let original: Vec<f32> = (0..256)
            .map(|i| {
                if i % 17 == 0 {
                    f32::NAN
                } else {
                    (i as f32 * 0.113).sin() * 40.0
                }
            })
            .collect();
        let mut block = original.clone();

        let precision = 16;
        let (bytes, runs) = compress_tile(&mut block, 16, 16, precision).unwrap();
        let restored = decompress_tile(&bytes, 16, 16, precision, &runs).unwrap();

        // Magnitudes stay below 64, so one quantization step is 2^(6-16)
        let bound = 2.0f32.powi(6 - precision as i32);
        for (a, b) in original.iter().zip(restored.iter()) {
            assert_eq!(a.is_nan(), b.is_nan());
            if !a.is_nan() {
                assert!((a - b).abs() <= bound, "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_all_nan_tile() {
        let mut block = vec![f32::NAN; 64];
        let (bytes, runs) = compress_tile(&mut block, 8, 8, 12).unwrap();
        let restored = decompress_tile(&bytes, 8, 8, 12, &runs).unwrap();
        assert!(restored.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_compress_rejects_empty_block() {
        let mut block = Vec::new();
        assert!(compress_tile(&mut block, 0, 0, 16).is_err());
    }
}
