//! Image plane access
//!
//! Decoding of on-disk astronomy formats lives outside this crate; the
//! cache only needs something that can fill a planar float buffer for a
//! given slice. The raw-cube loader here is the concrete implementation
//! used by tests and the demo binary.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::types::Dimensions;

/// A rectangular window of one (channel, stokes) plane
#[derive(Debug, Clone, Copy)]
pub struct PlaneSlice {
    pub x: u64,
    pub y: u64,
    pub width: u64,
    pub height: u64,
    pub channel: i32,
    pub stokes: i32,
}

/// Capability to fill a planar float buffer for a slice of an N-D cube.
///
/// `get_slice` writes only the pixels inside the image extent and leaves
/// the rest of `dest` untouched; callers prefill the buffer (the tile
/// cache uses NaN). Implementations are not required to be internally
/// synchronized — the caller serializes access with an image mutex.
pub trait FileLoader: Send + Sync {
    fn dimensions(&self) -> Dimensions;

    fn num_channels(&self) -> i32;

    fn num_stokes(&self) -> i32;

    /// Fills `dest` (row-major, `slice.width` × `slice.height`) from the
    /// selected plane
    fn get_slice(&self, slice: &PlaneSlice, dest: &mut [f32]) -> Result<()>;
}

fn check_slice(dims: Dimensions, channels: i32, stokes: i32, slice: &PlaneSlice, dest_len: usize) -> Result<()> {
    let pixels = (slice.width * slice.height) as usize;
    if dest_len < pixels {
        return Err(Error::InvalidParameter(format!(
            "slice buffer holds {} pixels, {} required",
            dest_len, pixels
        )));
    }
    if slice.channel < 0 || slice.channel >= channels || slice.stokes < 0 || slice.stokes >= stokes {
        return Err(Error::ResourceMissing(format!(
            "plane [channel {}, stokes {}] outside cube ({} channels, {} stokes)",
            slice.channel, slice.stokes, channels, stokes
        )));
    }
    if slice.x >= dims.width || slice.y >= dims.height {
        return Err(Error::OutOfBounds(format!(
            "slice origin ({}, {}) outside {}x{} image",
            slice.x, slice.y, dims.width, dims.height
        )));
    }
    Ok(())
}

/// In-memory cube, used by tests and the demo binary.
///
/// Layout is x-fastest: `[stokes][channel][y][x]`.
pub struct MemoryLoader {
    data: Arc<Vec<f32>>,
    dims: Dimensions,
    channels: i32,
    stokes: i32,
}

impl MemoryLoader {
    pub fn new(data: Vec<f32>, dims: Dimensions, channels: i32, stokes: i32) -> Result<Self> {
        let expected = dims.pixel_count() as usize * channels.max(0) as usize * stokes.max(0) as usize;
        if channels < 1 || stokes < 1 || data.len() != expected {
            return Err(Error::InvalidParameter(format!(
                "cube of {} values does not match {}x{}x{}x{}",
                data.len(),
                dims.width,
                dims.height,
                channels,
                stokes
            )));
        }
        Ok(Self {
            data: Arc::new(data),
            dims,
            channels,
            stokes,
        })
    }
}

impl FileLoader for MemoryLoader {
    fn dimensions(&self) -> Dimensions {
        self.dims
    }

    fn num_channels(&self) -> i32 {
        self.channels
    }

    fn num_stokes(&self) -> i32 {
        self.stokes
    }

    fn get_slice(&self, slice: &PlaneSlice, dest: &mut [f32]) -> Result<()> {
        check_slice(self.dims, self.channels, self.stokes, slice, dest.len())?;

        let width = self.dims.width;
        let plane = (slice.stokes as u64 * self.channels as u64 + slice.channel as u64)
            * self.dims.pixel_count();
        let copy_width = slice.width.min(width - slice.x) as usize;
        let copy_height = slice.height.min(self.dims.height - slice.y);

        for row in 0..copy_height {
            let src_start = (plane + (slice.y + row) * width + slice.x) as usize;
            let dest_start = (row * slice.width) as usize;
            dest[dest_start..dest_start + copy_width]
                .copy_from_slice(&self.data[src_start..src_start + copy_width]);
        }
        Ok(())
    }
}

/// Memory-mapped loader over a flat little-endian f32 cube file.
///
/// Same `[stokes][channel][y][x]` layout as [`MemoryLoader`]; the file
/// carries no header, so the caller supplies the shape.
pub struct RawCubeLoader {
    mmap: Mmap,
    dims: Dimensions,
    channels: i32,
    stokes: i32,
}

impl RawCubeLoader {
    pub fn open<P: AsRef<Path>>(path: P, dims: Dimensions, channels: i32, stokes: i32) -> Result<Self> {
        if channels < 1 || stokes < 1 {
            return Err(Error::InvalidParameter(
                "cube must have at least one channel and one stokes plane".to_string(),
            ));
        }

        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let expected_bytes =
            dims.pixel_count() * channels as u64 * stokes as u64 * std::mem::size_of::<f32>() as u64;
        if (mmap.len() as u64) < expected_bytes {
            return Err(Error::InvalidFormat(format!(
                "cube file holds {} bytes, {} required for {}x{}x{}x{}",
                mmap.len(),
                expected_bytes,
                dims.width,
                dims.height,
                channels,
                stokes
            )));
        }

        Ok(Self {
            mmap,
            dims,
            channels,
            stokes,
        })
    }
}

impl FileLoader for RawCubeLoader {
    fn dimensions(&self) -> Dimensions {
        self.dims
    }

    fn num_channels(&self) -> i32 {
        self.channels
    }

    fn num_stokes(&self) -> i32 {
        self.stokes
    }

    fn get_slice(&self, slice: &PlaneSlice, dest: &mut [f32]) -> Result<()> {
        check_slice(self.dims, self.channels, self.stokes, slice, dest.len())?;

        let width = self.dims.width;
        let plane = (slice.stokes as u64 * self.channels as u64 + slice.channel as u64)
            * self.dims.pixel_count();
        let copy_width = slice.width.min(width - slice.x) as usize;
        let copy_height = slice.height.min(self.dims.height - slice.y);

        for row in 0..copy_height {
            let src_start = ((plane + (slice.y + row) * width + slice.x) as usize) * 4;
            let src_row = &self.mmap[src_start..src_start + copy_width * 4];
            let dest_start = (row * slice.width) as usize;
            for (i, chunk) in src_row.chunks_exact(4).enumerate() {
                dest[dest_start + i] = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_cube(width: u64, height: u64, channels: i32, stokes: i32) -> Vec<f32> {
        let plane = (width * height) as usize;
        let mut data = Vec::with_capacity(plane * channels as usize * stokes as usize);
        for p in 0..(channels * stokes) as usize {
            for i in 0..plane {
                data.push((p * plane + i) as f32);
            }
        }
        data
    }

    #[test]
    fn test_memory_loader_interior_slice() {
        let dims = Dimensions::new(8, 8);
        let loader = MemoryLoader::new(test_cube(8, 8, 2, 1), dims, 2, 1).unwrap();

        let slice = PlaneSlice {
            x: 2,
            y: 3,
            width: 2,
            height: 2,
            channel: 1,
            stokes: 0,
        };
        let mut dest = vec![f32::NAN; 4];
        loader.get_slice(&slice, &mut dest).unwrap();

        assert_eq!(dest, vec![90.0, 91.0, 98.0, 99.0]);
    }

    #[test]
    fn test_memory_loader_edge_slice_leaves_padding() {
        let dims = Dimensions::new(4, 4);
        let loader = MemoryLoader::new(test_cube(4, 4, 1, 1), dims, 1, 1).unwrap();

        let slice = PlaneSlice {
            x: 3,
            y: 3,
            width: 2,
            height: 2,
            channel: 0,
            stokes: 0,
        };
        let mut dest = vec![f32::NAN; 4];
        loader.get_slice(&slice, &mut dest).unwrap();

        assert_eq!(dest[0], 15.0);
        assert!(dest[1].is_nan());
        assert!(dest[2].is_nan());
        assert!(dest[3].is_nan());
    }

    #[test]
    fn test_memory_loader_rejects_bad_plane() {
        let dims = Dimensions::new(4, 4);
        let loader = MemoryLoader::new(test_cube(4, 4, 1, 1), dims, 1, 1).unwrap();

        let slice = PlaneSlice {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
            channel: 5,
            stokes: 0,
        };
        let mut dest = vec![0.0; 4];
        assert!(matches!(
            loader.get_slice(&slice, &mut dest),
            Err(Error::ResourceMissing(_))
        ));
    }

    #[test]
    fn test_memory_loader_rejects_wrong_size() {
        let dims = Dimensions::new(4, 4);
        assert!(MemoryLoader::new(vec![0.0; 10], dims, 1, 1).is_err());
    }

    #[test]
    fn test_raw_cube_loader_round_trip() {
        let dims = Dimensions::new(6, 5);
        let data = test_cube(6, 5, 2, 2);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        for value in &data {
            file.write_all(&value.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();

        let loader = RawCubeLoader::open(file.path(), dims, 2, 2).unwrap();
        assert_eq!(loader.dimensions(), dims);

        let slice = PlaneSlice {
            x: 1,
            y: 1,
            width: 3,
            height: 2,
            channel: 1,
            stokes: 1,
        };
        let mut dest = vec![f32::NAN; 6];
        loader.get_slice(&slice, &mut dest).unwrap();

        let memory = MemoryLoader::new(data, dims, 2, 2).unwrap();
        let mut expected = vec![f32::NAN; 6];
        memory.get_slice(&slice, &mut expected).unwrap();
        assert_eq!(dest, expected);
    }

    #[test]
    fn test_raw_cube_loader_rejects_short_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 16]).unwrap();
        file.flush().unwrap();

        let result = RawCubeLoader::open(file.path(), Dimensions::new(16, 16), 1, 1);
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }
}
