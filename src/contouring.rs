//! Iso-contour extraction by marching squares
//!
//! Cells are traced edge-to-edge until the path leaves the image or
//! returns to its starting cell and side. The crossing predicate
//! `a >= level > b` attaches equality to the higher corner, so degenerate
//! values produce a unique crossing and every trace terminates.

use std::time::Instant;

use rayon::prelude::*;

const TOP_EDGE: i32 = 0;
const RIGHT_EDGE: i32 = 1;
const BOTTOM_EDGE: i32 = 2;
const LEFT_EDGE: i32 = 3;

/// Traced output for one iso-level: image-space vertices as (x, y) float
/// pairs, and the element offset into the vertex stream where each
/// polyline begins
#[derive(Debug, Clone, Default)]
pub struct ContourLevel {
    pub level: f64,
    pub vertices: Vec<f32>,
    pub indices: Vec<i32>,
}

#[allow(clippy::too_many_arguments)]
fn trace_segment(
    image: &[f32],
    visited: &mut [bool],
    width: i32,
    height: i32,
    scale: f64,
    offset: f64,
    level: f64,
    x_cell: i32,
    y_cell: i32,
    start_side: i32,
    vertices: &mut Vec<f32>,
) {
    let mut i = x_cell;
    let mut j = y_cell;
    let orig_side = start_side;
    let mut side = start_side;

    let mut first_iteration = true;
    let mut done = i < 0 || i >= width - 1 || j < 0 || j >= height - 1;

    while !done {
        let a = image[(j * width + i) as usize] as f64;
        let b = image[(j * width + i + 1) as usize] as f64;
        let c = image[((j + 1) * width + i + 1) as usize] as f64;
        let d = image[((j + 1) * width + i) as usize] as f64;

        let mut x = 0.0;
        let mut y = 0.0;
        if first_iteration {
            first_iteration = false;
            match side {
                TOP_EDGE => {
                    x = (level - a) / (b - a) + i as f64;
                    y = j as f64;
                }
                RIGHT_EDGE => {
                    x = (i + 1) as f64;
                    y = (level - b) / (c - b) + j as f64;
                }
                BOTTOM_EDGE => {
                    x = (level - c) / (d - c) + i as f64;
                    y = (j + 1) as f64;
                }
                LEFT_EDGE => {
                    x = i as f64;
                    y = (level - a) / (d - a) + j as f64;
                }
                _ => {}
            }
        } else {
            if side == TOP_EDGE {
                visited[(j * width + i) as usize] = true;
            }

            let mut flag = false;
            for _ in 0..4 {
                side = (side + 1) % 4;
                match side {
                    TOP_EDGE => {
                        if a >= level && level > b {
                            flag = true;
                            x = (level - a) / (b - a) + i as f64;
                            y = j as f64;
                            j -= 1;
                        }
                    }
                    RIGHT_EDGE => {
                        if b >= level && level > c {
                            flag = true;
                            x = (i + 1) as f64;
                            y = (level - b) / (c - b) + j as f64;
                            i += 1;
                        }
                    }
                    BOTTOM_EDGE => {
                        if c >= level && level > d {
                            flag = true;
                            x = (level - d) / (c - d) + i as f64;
                            y = (j + 1) as f64;
                            j += 1;
                        }
                    }
                    LEFT_EDGE => {
                        if d >= level && level > a {
                            flag = true;
                            x = i as f64;
                            y = (level - a) / (d - a) + j as f64;
                            i -= 1;
                        }
                    }
                    _ => {}
                }
                if flag {
                    break;
                }
            }
            if !flag {
                // No exit side: isolated crossing, nothing more to trace
                return;
            }

            side = (side + 1) % 4;
            side = (side + 1) % 4;
            if i == x_cell && j == y_cell && side == orig_side {
                done = true;
            }
            if i < 0 || i >= width - 1 || j < 0 || j >= height - 1 {
                done = true;
            }
        }

        // Shift to pixel center
        let x_val = x + 0.5;
        let y_val = y + 0.5;
        vertices.push((scale * x_val + offset) as f32);
        vertices.push((scale * y_val + offset) as f32);
    }
}

fn trace_level(
    image: &[f32],
    width: i32,
    height: i32,
    scale: f64,
    offset: f64,
    level: f64,
    vertices: &mut Vec<f32>,
    indices: &mut Vec<i32>,
) {
    let n = (width as usize) * (height as usize);
    let mut visited = vec![false; n];
    let value = |x: i32, y: i32| image[(y * width + x) as usize] as f64;

    // Search top edge
    let mut i = 0;
    while i < width - 1 {
        if value(i, 0) < level && level <= value(i + 1, 0) {
            indices.push(vertices.len() as i32);
            trace_segment(
                image,
                &mut visited,
                width,
                height,
                scale,
                offset,
                level,
                i,
                0,
                TOP_EDGE,
                vertices,
            );
        }
        i += 1;
    }

    // Search right edge
    let mut j = 0;
    while j < height - 1 {
        if value(width - 1, j) < level && level <= value(width - 1, j + 1) {
            indices.push(vertices.len() as i32);
            trace_segment(
                image,
                &mut visited,
                width,
                height,
                scale,
                offset,
                level,
                width - 2,
                j,
                RIGHT_EDGE,
                vertices,
            );
        }
        j += 1;
    }

    // Search bottom edge
    let mut i = width - 2;
    while i >= 0 {
        if value(i + 1, height - 1) < level && level <= value(i, height - 1) {
            indices.push(vertices.len() as i32);
            trace_segment(
                image,
                &mut visited,
                width,
                height,
                scale,
                offset,
                level,
                i,
                height - 2,
                BOTTOM_EDGE,
                vertices,
            );
        }
        i -= 1;
    }

    // Search left edge
    let mut j = height - 2;
    while j >= 0 {
        if value(0, j + 1) < level && level <= value(0, j) {
            indices.push(vertices.len() as i32);
            trace_segment(
                image,
                &mut visited,
                width,
                height,
                scale,
                offset,
                level,
                0,
                j,
                LEFT_EDGE,
                vertices,
            );
        }
        j -= 1;
    }

    // Search each interior row
    for j in 1..height - 1 {
        for i in 0..width - 1 {
            if !visited[(j * width + i) as usize] && value(i, j) < level && level <= value(i + 1, j)
            {
                indices.push(vertices.len() as i32);
                trace_segment(
                    image,
                    &mut visited,
                    width,
                    height,
                    scale,
                    offset,
                    level,
                    i,
                    j,
                    TOP_EDGE,
                    vertices,
                );
            }
        }
    }
}

/// Traces every requested level over the image, in parallel.
///
/// The image is modified by a single pre-pass that replaces NaNs with
/// -f32::MAX, which keeps iso-lines out of blanked regions. Identical
/// inputs produce bitwise-identical output.
pub fn trace_contours(
    image: &mut [f32],
    width: usize,
    height: usize,
    scale: f64,
    offset: f64,
    levels: &[f64],
) -> Vec<ContourLevel> {
    let t_start = Instant::now();

    for value in image.iter_mut() {
        if value.is_nan() {
            *value = f32::MIN;
        }
    }

    let image = &*image;
    let results: Vec<ContourLevel> = levels
        .par_iter()
        .map(|&level| {
            let mut result = ContourLevel {
                level,
                ..Default::default()
            };
            trace_level(
                image,
                width as i32,
                height as i32,
                scale,
                offset,
                level,
                &mut result.vertices,
                &mut result.indices,
            );
            result
        })
        .collect();

    let dt = t_start.elapsed().as_micros().max(1);
    let vertex_count: usize = results.iter().map(|r| r.vertices.len()).sum();
    let segment_count: usize = results.iter().map(|r| r.indices.len()).sum();
    log::debug!(
        "Contoured {}x{} image in {:.3} ms at {:.1} MPix/s. Found {} vertices in {} segments across {} levels",
        width,
        height,
        dt as f64 * 1e-3,
        (width * height) as f64 / dt as f64,
        vertex_count,
        segment_count,
        levels.len()
    );

    results
}
