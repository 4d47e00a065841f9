//! NaN run-length encoding and substitution
//!
//! The fixed-precision compressor must never see NaNs: a NaN in a block
//! poisons every value quantized against it. Before encoding, NaN
//! positions are recorded as alternating run lengths (starting with a
//! count of non-NaN values, possibly zero) and the NaNs themselves are
//! replaced with plausible neighbours so the block stays compressible.
//! The client walks the runs to restore the NaNs exactly.

/// Records NaN runs for a `width` × `height` block and replaces each NaN
/// with the mean of the valid values in its aligned 4×4 super-block.
///
/// Super-blocks that are entirely valid or entirely NaN are left
/// untouched; blocks on the far edges are clamped to the image extent.
/// The run lengths always sum to `width * height`.
pub fn nan_encodings_block(array: &mut [f32], width: usize, height: usize) -> Vec<i32> {
    let length = width * height;
    let mut prev_index = 0;
    let mut prev = false;
    let mut encoded = Vec::new();

    for i in 0..length {
        let current = array[i].is_nan();
        if current != prev {
            encoded.push((i - prev_index) as i32);
            prev_index = i;
            prev = current;
        }
    }
    encoded.push((length - prev_index) as i32);

    // Skip NaN-free images entirely
    if encoded.len() > 1 {
        for i in (0..width).step_by(4) {
            for j in (0..height).step_by(4) {
                let block_start = j * width + i;
                let block_width = 4.min(width - i);
                let block_height = 4.min(height - j);

                let mut valid_count = 0;
                let mut sum = 0.0f32;
                for x in 0..block_width {
                    for y in 0..block_height {
                        let v = array[block_start + y * width + x];
                        if !v.is_nan() {
                            valid_count += 1;
                            sum += v;
                        }
                    }
                }

                // All-NaN blocks are restored from the runs anyway and
                // all-valid blocks need no substitute
                if valid_count > 0 && valid_count != block_width * block_height {
                    let average = sum / valid_count as f32;
                    for x in 0..block_width {
                        for y in 0..block_height {
                            let index = block_start + y * width + x;
                            if array[index].is_nan() {
                                array[index] = average;
                            }
                        }
                    }
                }
            }
        }
    }

    encoded
}

/// Records NaN runs for `array[offset..offset + length]` and replaces
/// each NaN with the most recent valid value.
///
/// A leading NaN run is replaced with the first valid value found
/// anywhere in the range, or 0 when there is none. Used on 1-D paths
/// where the blocked variant does not apply.
pub fn nan_encodings_simple(array: &mut [f32], offset: usize, length: usize) -> Vec<i32> {
    let mut prev_index = offset;
    let mut prev = false;
    let mut encoded = Vec::new();

    let mut prev_valid = 0.0f32;
    for i in offset..offset + length {
        if !array[i].is_nan() {
            prev_valid = array[i];
            break;
        }
    }

    for i in offset..offset + length {
        let current = array[i].is_nan();
        if current != prev {
            encoded.push((i - prev_index) as i32);
            prev_index = i;
            prev = current;
        }
        if current {
            array[i] = prev_valid;
        } else {
            prev_valid = array[i];
        }
    }
    encoded.push((offset + length - prev_index) as i32);

    encoded
}

/// Re-inserts NaNs by walking alternating run lengths, starting with a
/// non-NaN run
pub fn restore_nans(array: &mut [f32], runs: &[i32]) {
    let mut index = 0;
    let mut nan_run = false;

    for &run in runs {
        let run = run.max(0) as usize;
        let end = (index + run).min(array.len());
        if nan_run {
            for value in &mut array[index..end] {
                *value = f32::NAN;
            }
        }
        index = end;
        nan_run = !nan_run;
        if index >= array.len() {
            break;
        }
    }
}
