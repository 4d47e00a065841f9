//! NaN-aware separable Gaussian smoothing

use std::time::Instant;

use rayon::prelude::*;

/// Cap on the intermediate buffer used by the two-pass convolution
pub const SMOOTHING_TEMP_BUFFER_SIZE_MB: usize = 200;

fn norm_pdf(x: f64, sigma: f64) -> f64 {
    (-0.5 * x * x / (sigma * sigma)).exp() / sigma
}

/// Builds a symmetric, unnormalized Gaussian kernel of width 2r + 1.
///
/// Normalization happens per output pixel, by dividing through the sum
/// of the weights that actually landed on finite inputs.
pub fn make_kernel(radius: usize, sigma: f64) -> Vec<f32> {
    let mut kernel = vec![0.0f32; 2 * radius + 1];
    for j in 0..=radius {
        let weight = norm_pdf(j as f64, sigma) as f32;
        kernel[radius + j] = weight;
        kernel[radius - j] = weight;
    }
    kernel
}

/// One directional convolution pass.
///
/// Reads `src` (`src_width` wide) and writes `dest_height` rows of
/// `dest_width` values into `dest`. Non-finite inputs are masked out of
/// both the numerator and the weight sum; a window with no finite input
/// produces NaN.
fn run_kernel(
    kernel: &[f32],
    src: &[f32],
    dest: &mut [f32],
    src_width: usize,
    src_height: usize,
    dest_width: usize,
    dest_height: usize,
    vertical: bool,
) -> bool {
    let radius = (kernel.len() - 1) / 2;

    if vertical && dest_height < src_height.saturating_sub(radius * 2) {
        return false;
    }
    if dest_width < src_width.saturating_sub(radius * 2) {
        return false;
    }

    let jump_size = if vertical { src_width as isize } else { 1 };
    let x_offset = if vertical { 0 } else { radius };
    let y_offset = if vertical { radius } else { 0 };

    dest.par_chunks_mut(dest_width)
        .take(dest_height)
        .enumerate()
        .for_each(|(dest_y, dest_row)| {
            let src_y = dest_y + y_offset;
            for (dest_x, out) in dest_row.iter_mut().enumerate() {
                let src_x = dest_x + x_offset;
                let center = (src_x + src_width * src_y) as isize;

                let mut sum = 0.0f32;
                let mut weight = 0.0f32;
                for i in -(radius as isize)..=(radius as isize) {
                    let value = src[(center + i * jump_size) as usize];
                    if value.is_finite() {
                        let w = kernel[(i + radius as isize) as usize];
                        sum += value * w;
                        weight += w;
                    }
                }

                *out = if weight > 0.0 { sum / weight } else { f32::NAN };
            }
        });

    true
}

/// Smooths `src` with a Gaussian of the given factor (f ≥ 2), writing a
/// packed (src_width − 2r) × (src_height − 2r) image into `dest` with
/// r = f − 1.
///
/// The separable convolution runs in horizontal/vertical pass pairs over
/// row bands, so the intermediate buffer never exceeds `temp_buffer_mb`
/// (but always holds at least 4r rows). Returns false with no side
/// effects when the destination is smaller than the output extent or the
/// source is too small to smooth.
pub fn gaussian_smooth(
    src: &[f32],
    dest: &mut [f32],
    src_width: usize,
    src_height: usize,
    smoothing_factor: usize,
    temp_buffer_mb: usize,
) -> bool {
    if smoothing_factor < 2 {
        log::error!("Smoothing factor {} below minimum of 2", smoothing_factor);
        return false;
    }

    let apron = smoothing_factor - 1;
    let sigma = (smoothing_factor - 1) as f64 / 2.0;
    let mask_size = 2 * apron + 1;

    if src_width <= 2 * apron || src_height <= 2 * apron {
        log::error!(
            "Cannot smooth a {}x{} image with factor {}",
            src_width,
            src_height,
            smoothing_factor
        );
        return false;
    }

    let dest_width = src_width - 2 * apron;
    let dest_height = src_height - 2 * apron;

    if dest.len() < dest_width * dest_height || src.len() < src_width * src_height {
        log::error!(
            "Incorrectly sized destination array. Should be at least {}x{}",
            dest_width,
            dest_height
        );
        return false;
    }

    let kernel = make_kernel(apron, sigma);

    let target_pixels = (temp_buffer_mb * 1_000_000) / std::mem::size_of::<f32>();
    let mut target_buffer_height = target_pixels / dest_width;
    if target_buffer_height < 4 * apron {
        target_buffer_height = 4 * apron;
    }
    let buffer_height = target_buffer_height.min(src_height);

    let t_start = Instant::now();
    let mut temp = vec![0.0f32; dest_width * buffer_height];

    let mut line_offset = 0;
    while line_offset < dest_height {
        let mut num_lines = buffer_height - 2 * apron;
        // clamp last iteration
        if line_offset + num_lines > dest_height {
            num_lines = dest_height - line_offset;
        }
        let band_rows = num_lines + 2 * apron;

        let src_band = &src[line_offset * src_width..(line_offset + band_rows) * src_width];
        run_kernel(
            &kernel, src_band, &mut temp, src_width, band_rows, dest_width, band_rows, false,
        );
        run_kernel(
            &kernel,
            &temp,
            &mut dest[line_offset * dest_width..],
            dest_width,
            band_rows,
            dest_width,
            num_lines,
            true,
        );

        line_offset += num_lines;
    }

    let dt = t_start.elapsed().as_micros().max(1);
    log::debug!(
        "Smoothed with smoothing factor of {} and kernel size of {} in {:.3} ms at {:.1} MPix/s",
        smoothing_factor,
        mask_size,
        dt as f64 * 1e-3,
        (dest_width * dest_height) as f64 / dt as f64
    );
    true
}
